use std::path::PathBuf;

use civdl_core::Category;
use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};

/// Full runtime configuration loaded from TOML + env vars.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AppConfig {
    pub api: ApiConfig,
    pub paths: PathsConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ApiConfig {
    /// Civitai API token. Empty means unauthenticated reads only.
    pub token: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PathsConfig {
    pub lora: String,
    pub checkpoint: String,
    pub embedding: String,
    pub ledger_file: String,
}

impl AppConfig {
    /// The bearer token, if one is configured.
    pub fn api_token(&self) -> Option<String> {
        let token = self.api.token.trim();
        if token.is_empty() {
            None
        } else {
            Some(token.to_string())
        }
    }

    /// Destination directory for a category, created on demand.
    pub fn download_dir(&self, category: Category) -> std::io::Result<PathBuf> {
        let raw = match category {
            Category::Lora => &self.paths.lora,
            Category::Checkpoint => &self.paths.checkpoint,
            Category::Embedding => &self.paths.embedding,
        };
        let dir = expand_path(raw);
        std::fs::create_dir_all(&dir)?;
        Ok(dir)
    }

    /// Raw (not necessarily existing) directory for a category.
    pub fn category_dir(&self, category: Category) -> PathBuf {
        let raw = match category {
            Category::Lora => &self.paths.lora,
            Category::Checkpoint => &self.paths.checkpoint,
            Category::Embedding => &self.paths.embedding,
        };
        expand_path(raw)
    }

    pub fn ledger_path(&self) -> PathBuf {
        expand_path(&self.paths.ledger_file)
    }
}

/// Load configuration from:
/// 1. Built-in defaults
/// 2. `config/default.toml` (if present)
/// 3. A custom config file path (if provided)
/// 4. Environment variables prefixed with `CIVDL_`
pub fn load_config(config_file: Option<&PathBuf>) -> Result<AppConfig, ConfigError> {
    let mut builder = Config::builder()
        // Layer 1: defaults baked in
        .set_default("api.token", "")?
        .set_default("paths.lora", "~/models/loras")?
        .set_default("paths.checkpoint", "~/models/checkpoints")?
        .set_default("paths.embedding", "~/models/embeddings")?
        .set_default("paths.ledger_file", "~/models/download_history.csv")?
        // Layer 2: project default.toml
        .add_source(File::with_name("config/default").required(false));

    // Layer 3: optional user-supplied config file
    if let Some(path) = config_file {
        builder = builder.add_source(File::from(path.as_path()).required(true));
    }

    // Layer 4: environment variables (CIVDL_API_TOKEN, CIVDL_PATHS_LORA, …)
    builder = builder.add_source(
        Environment::with_prefix("CIVDL")
            .separator("_")
            .try_parsing(true),
    );

    builder.build()?.try_deserialize()
}

/// Expand a leading `~` to the home directory.
pub fn expand_path(raw: &str) -> PathBuf {
    if raw.starts_with('~') {
        if let Some(home) = dirs::home_dir() {
            return home.join(raw.trim_start_matches('~').trim_start_matches('/'));
        }
    }
    PathBuf::from(raw)
}

#[cfg(test)]
mod tests {
    use super::*;

    // ── load_config defaults ──────────────────────────────────────────────────

    #[test]
    fn test_default_paths() {
        let cfg = load_config(None).unwrap();
        assert!(cfg.paths.lora.contains("loras"));
        assert!(cfg.paths.checkpoint.contains("checkpoints"));
        assert!(cfg.paths.embedding.contains("embeddings"));
        assert!(cfg.paths.ledger_file.ends_with("download_history.csv"));
    }

    #[test]
    fn test_default_token_is_empty() {
        let cfg = load_config(None).unwrap();
        assert_eq!(cfg.api_token(), None);
    }

    // ── load_config from a custom file ────────────────────────────────────────

    #[test]
    fn test_custom_config_file_overrides_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("custom.toml");
        std::fs::write(
            &file,
            "[api]\ntoken = \"abc123\"\n\n[paths]\nlora = \"/data/loras\"\n",
        )
        .unwrap();

        let cfg = load_config(Some(&file)).unwrap();
        assert_eq!(cfg.api_token().as_deref(), Some("abc123"));
        assert_eq!(cfg.paths.lora, "/data/loras");
        // Untouched keys keep their defaults
        assert!(cfg.paths.checkpoint.contains("checkpoints"));
    }

    // ── path helpers ──────────────────────────────────────────────────────────

    #[test]
    fn test_expand_absolute_path_unchanged() {
        assert_eq!(expand_path("/data/models"), PathBuf::from("/data/models"));
    }

    #[test]
    fn test_expand_tilde_produces_non_tilde_prefix() {
        let path = expand_path("~/models/loras");
        let s = path.to_string_lossy();
        assert!(!s.starts_with('~'), "expanded path must not start with '~', got: {s}");
        assert!(s.contains("loras"));
    }

    #[test]
    fn test_download_dir_creates_directory() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = AppConfig {
            api: ApiConfig { token: String::new() },
            paths: PathsConfig {
                lora: dir.path().join("loras").to_string_lossy().to_string(),
                checkpoint: dir.path().join("checkpoints").to_string_lossy().to_string(),
                embedding: dir.path().join("embeddings").to_string_lossy().to_string(),
                ledger_file: dir.path().join("history.csv").to_string_lossy().to_string(),
            },
        };

        let lora_dir = cfg.download_dir(Category::Lora).unwrap();
        assert!(lora_dir.is_dir());
    }
}
