use std::fmt;
use std::path::Path;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Provider type strings that map to [`Category::Lora`].
const LORA_ALIASES: &[&str] = &["lora", "locon", "loha", "dora"];

/// Tag names eligible as a LoRA subcategory, highest priority first.
const SUBCATEGORY_PRIORITY: &[&str] = &[
    "style",
    "character",
    "concept",
    "clothing",
    "poses",
    "background",
    "tool",
    "vehicle",
    "objects",
    "animal",
];

/// Filename keywords checked when the directory gives no hint. Order matters:
/// lora aliases are checked before the broad "model" keyword.
const FILENAME_KEYWORDS: &[(Category, &[&str])] = &[
    (Category::Lora, &["lora", "locon", "loha"]),
    (Category::Checkpoint, &["checkpoint", "model"]),
    (Category::Embedding, &["embedding", "textualinversion", "ti"]),
];

/// The closed set of model categories civdl manages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Lora,
    Checkpoint,
    Embedding,
}

impl Category {
    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Lora => "lora",
            Category::Checkpoint => "checkpoint",
            Category::Embedding => "embedding",
        }
    }

    pub const ALL: [Category; 3] = [Category::Lora, Category::Checkpoint, Category::Embedding];
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Category {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "lora" => Ok(Category::Lora),
            "checkpoint" => Ok(Category::Checkpoint),
            "embedding" => Ok(Category::Embedding),
            other => Err(format!(
                "unknown category '{other}' (expected lora, checkpoint or embedding)"
            )),
        }
    }
}

/// Map a provider-supplied type string onto a [`Category`].
///
/// Returns the category (when resolvable) and a human-readable reason that
/// callers log. Matching is a case-insensitive exact match against the alias
/// table; unknown or empty input resolves to `None`.
pub fn classify_provider_type(raw: &str) -> (Option<Category>, String) {
    let normalized = raw.trim().to_lowercase();

    if normalized.is_empty() {
        return (None, "no model type in provider metadata".to_string());
    }

    if normalized == "checkpoint" {
        (Some(Category::Checkpoint), format!("provider type: {normalized}"))
    } else if LORA_ALIASES.contains(&normalized.as_str()) {
        (
            Some(Category::Lora),
            format!("provider type: {normalized} (LoRA family)"),
        )
    } else if normalized == "textualinversion" {
        (Some(Category::Embedding), format!("provider type: {normalized}"))
    } else {
        (None, format!("unsupported provider type: {normalized}"))
    }
}

/// Derive a category from a local file's location and name.
///
/// A parent-directory match (`loras/`, `checkpoints/`, `embeddings/`) takes
/// priority over filename keywords; with neither, checkpoint is assumed.
pub fn detect_category_from_path(path: &Path) -> Category {
    let path_lower = path.to_string_lossy().to_lowercase();

    for (dir, category) in [
        ("loras", Category::Lora),
        ("checkpoints", Category::Checkpoint),
        ("embeddings", Category::Embedding),
    ] {
        if path_lower.contains(&format!("/{dir}/")) || path_lower.contains(&format!("\\{dir}\\")) {
            return category;
        }
    }

    let name_lower = path
        .file_name()
        .map(|n| n.to_string_lossy().to_lowercase())
        .unwrap_or_default();

    for (category, keywords) in FILENAME_KEYWORDS {
        if keywords.iter().any(|k| name_lower.contains(k)) {
            return *category;
        }
    }

    Category::Checkpoint
}

/// Guess the base-model family from filename keywords.
pub fn detect_base_model(file_name: &str) -> &'static str {
    let lower = file_name.to_lowercase();

    if lower.contains("sdxl") {
        "SDXL"
    } else if lower.contains("sd3") {
        "SD3"
    } else if lower.contains("sd2") {
        "SD2.1"
    } else if lower.contains("sd1") || lower.contains("sd15") {
        "SD1.5"
    } else if lower.contains("flux") {
        "Flux"
    } else if lower.contains("pony") {
        "Pony"
    } else if lower.contains("illustrious") {
        "Illustrious"
    } else {
        "Unknown"
    }
}

/// Pick a subcategory from a provider tag list.
///
/// The first entry of [`SUBCATEGORY_PRIORITY`] present in the tags wins.
/// Tags with no known entry yield `"other"`; an empty tag list yields
/// `"none"`.
pub fn classify_subcategory(tags: &[String]) -> String {
    if tags.is_empty() {
        return "none".to_string();
    }

    let lowered: Vec<String> = tags.iter().map(|t| t.to_lowercase()).collect();
    for candidate in SUBCATEGORY_PRIORITY {
        if lowered.iter().any(|t| t == candidate) {
            return (*candidate).to_string();
        }
    }

    "other".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn lora_family_aliases_resolve_to_lora() {
        for alias in ["lora", "locon", "loha", "dora", "LoCon"] {
            let (category, reason) = classify_provider_type(alias);
            assert_eq!(category, Some(Category::Lora), "alias {alias}");
            assert!(!reason.is_empty());
        }
    }

    #[test]
    fn checkpoint_and_embedding_aliases() {
        assert_eq!(
            classify_provider_type("checkpoint").0,
            Some(Category::Checkpoint)
        );
        assert_eq!(
            classify_provider_type("TextualInversion").0,
            Some(Category::Embedding)
        );
    }

    #[test]
    fn unknown_type_is_unresolved_with_reason() {
        let (category, reason) = classify_provider_type("unknown_type");
        assert_eq!(category, None);
        assert!(!reason.is_empty());

        let (category, reason) = classify_provider_type("");
        assert_eq!(category, None);
        assert!(!reason.is_empty());
    }

    #[test]
    fn directory_beats_filename() {
        // The filename says lora, but the directory says checkpoints.
        let path = PathBuf::from("/data/checkpoints/cool_lora.safetensors");
        assert_eq!(detect_category_from_path(&path), Category::Checkpoint);
    }

    #[test]
    fn filename_keywords_apply_without_directory_hint() {
        let path = PathBuf::from("/downloads/style_lora_v2.safetensors");
        assert_eq!(detect_category_from_path(&path), Category::Lora);
    }

    #[test]
    fn unmatched_path_defaults_to_checkpoint() {
        let path = PathBuf::from("/downloads/mystery.safetensors");
        assert_eq!(detect_category_from_path(&path), Category::Checkpoint);
    }

    #[test]
    fn base_model_detection() {
        assert_eq!(detect_base_model("great_SDXL_mix.safetensors"), "SDXL");
        assert_eq!(detect_base_model("sd15_portrait.ckpt"), "SD1.5");
        assert_eq!(detect_base_model("flux-dev-lora.safetensors"), "Flux");
        assert_eq!(detect_base_model("something_else.pt"), "Unknown");
    }

    #[test]
    fn subcategory_priority_order() {
        let tags = vec!["character".to_string(), "style".to_string()];
        assert_eq!(classify_subcategory(&tags), "style");
    }

    #[test]
    fn subcategory_sentinels() {
        assert_eq!(classify_subcategory(&[]), "none");
        let tags = vec!["anime".to_string(), "cyberpunk".to_string()];
        assert_eq!(classify_subcategory(&tags), "other");
    }

    #[test]
    fn category_round_trips_through_str() {
        for category in Category::ALL {
            assert_eq!(Category::from_str(category.as_str()).unwrap(), category);
        }
        assert!(Category::from_str("vae").is_err());
    }
}
