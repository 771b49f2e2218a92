use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::api::{CivitaiClient, VersionInfo};
use crate::classify::{
    classify_provider_type, classify_subcategory, detect_base_model, detect_category_from_path,
    Category,
};
use crate::error::{CoreError, CoreResult};
use crate::integrity::sha256_file;
use crate::ledger::DownloadRecord;
use crate::providers::ProviderChain;

/// File extensions treated as model artifacts.
pub const SUPPORTED_EXTENSIONS: &[&str] = &["safetensors", "ckpt", "pt", "pth", "bin"];

/// Everything civdl knows about one local model artifact.
///
/// Serialized as the JSON interchange format that moves scan results into
/// the ledger-import step.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelMetadata {
    pub file_name: String,
    pub file_path: PathBuf,
    pub file_size: u64,
    pub sha256: String,
    pub model_type: Category,
    pub base_model: String,
    pub subcategory: Option<String>,
    pub civitai_url: Option<String>,
    #[serde(default)]
    pub download_urls: Vec<String>,
    pub model_id: Option<u64>,
    pub version_id: Option<u64>,
    pub model_name: Option<String>,
    pub description: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    pub creator: Option<String>,
    #[serde(default)]
    pub nsfw: bool,
    pub raw_provider_type: Option<String>,
    /// True when a remote provider identified this file.
    #[serde(default)]
    pub from_provider: bool,
}

impl ModelMetadata {
    /// Convert to a ledger row. The Civitai page URL is preferred as the
    /// source; a raw download URL stands in when identity is unknown. Files
    /// with no URL at all cannot be re-downloaded and yield `None`.
    pub fn to_record(&self) -> Option<DownloadRecord> {
        let url = self
            .civitai_url
            .clone()
            .or_else(|| self.download_urls.first().cloned())?;
        Some(DownloadRecord::new(
            self.model_type,
            url,
            self.file_name.clone(),
            self.model_id,
            self.version_id,
            Some(self.file_size),
        ))
    }
}

pub fn is_supported_model_file(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| SUPPORTED_EXTENSIONS.contains(&e.to_lowercase().as_str()))
        .unwrap_or(false)
}

/// Resolves metadata for local model files via the provider chain.
pub struct MetadataScanner {
    chain: ProviderChain,
}

impl MetadataScanner {
    pub fn new(client: &CivitaiClient) -> Self {
        Self {
            chain: ProviderChain::standard(client),
        }
    }

    /// Build a scanner over an explicit provider chain. Tests inject stub
    /// providers through this.
    pub fn with_chain(chain: ProviderChain) -> Self {
        Self { chain }
    }

    /// Resolve metadata for one model file.
    ///
    /// Local fields (hash, heuristic category, base model) are always
    /// populated; provider identity is filled in when some provider knows
    /// the hash. Failing to identify the file remotely is a degraded
    /// result, not an error.
    pub async fn scan_file(&self, path: &Path) -> CoreResult<ModelMetadata> {
        if !is_supported_model_file(path) {
            return Err(CoreError::UnsupportedType(format!(
                "unsupported file extension: {}",
                path.display()
            )));
        }

        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        let file_size = std::fs::metadata(path)?.len();

        let mut metadata = ModelMetadata {
            file_name: file_name.clone(),
            file_path: path.to_path_buf(),
            file_size,
            sha256: sha256_file(path)?,
            model_type: detect_category_from_path(path),
            base_model: detect_base_model(&file_name).to_string(),
            subcategory: None,
            civitai_url: None,
            download_urls: Vec::new(),
            model_id: None,
            version_id: None,
            model_name: None,
            description: None,
            tags: Vec::new(),
            creator: None,
            nsfw: false,
            raw_provider_type: None,
            from_provider: false,
        };

        match self.chain.resolve(&metadata.sha256).await {
            Some(version) => {
                apply_provider_metadata(&mut metadata, &version);
                info!(
                    file = %file_name,
                    model_id = metadata.model_id,
                    version_id = metadata.version_id,
                    urls = metadata.download_urls.len(),
                    "Identified file remotely"
                );
            }
            None => {
                info!(file = %file_name, "No provider identified this file, keeping local metadata");
            }
        }

        Ok(metadata)
    }

    /// Scan a directory for model files and resolve each independently.
    /// One file failing does not stop the rest.
    pub async fn scan_directory(
        &self,
        dir: &Path,
        recursive: bool,
    ) -> CoreResult<Vec<ModelMetadata>> {
        let mut files = Vec::new();
        collect_model_files(dir, recursive, &mut files)?;
        files.sort();

        debug!(dir = %dir.display(), count = files.len(), "Scanning model files");

        let mut results = Vec::new();
        for file in files {
            match self.scan_file(&file).await {
                Ok(metadata) => results.push(metadata),
                Err(e) => warn!(file = %file.display(), error = %e, "Skipping file"),
            }
        }
        Ok(results)
    }
}

/// Fold a provider response into locally derived metadata. The provider's
/// type field overrides the path heuristic when it maps to a known
/// category; otherwise the heuristic stands.
fn apply_provider_metadata(metadata: &mut ModelMetadata, version: &VersionInfo) {
    metadata.from_provider = true;
    metadata.version_id = version.id;
    metadata.model_id = version.model_id;
    metadata.model_name = version.name.clone();
    metadata.creator = version
        .creator
        .as_ref()
        .and_then(|c| c.username.clone());

    if let Some(model) = &version.model {
        metadata.description = model.description.clone();
        metadata.tags = model.tags.clone();
        metadata.nsfw = model.nsfw.unwrap_or(false);
        metadata.raw_provider_type = model.kind.clone();

        if let Some(raw) = &model.kind {
            let (category, reason) = classify_provider_type(raw);
            match category {
                Some(category) => metadata.model_type = category,
                None => debug!(%reason, "Keeping heuristic category"),
            }
        }
    }

    if metadata.model_type == Category::Lora {
        metadata.subcategory = Some(classify_subcategory(&metadata.tags));
    }

    if let Some(base) = &version.base_model {
        metadata.base_model = base.clone();
    }

    metadata.civitai_url = version.page_url();
    metadata.download_urls = version.download_urls();
}

fn collect_model_files(dir: &Path, recursive: bool, out: &mut Vec<PathBuf>) -> std::io::Result<()> {
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_dir() {
            if recursive {
                collect_model_files(&path, true, out)?;
            }
        } else if is_supported_model_file(&path) {
            out.push(path);
        }
    }
    Ok(())
}

/// Write a metadata list as the JSON interchange file.
pub fn save_metadata(metadata: &[ModelMetadata], path: &Path) -> CoreResult<()> {
    let json = serde_json::to_string_pretty(metadata)?;
    std::fs::write(path, json)?;
    info!(path = %path.display(), count = metadata.len(), "Saved metadata");
    Ok(())
}

/// Load a metadata list from a JSON interchange file.
pub fn load_metadata(path: &Path) -> CoreResult<Vec<ModelMetadata>> {
    let json = std::fs::read_to_string(path)?;
    Ok(serde_json::from_str(&json)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::HashProvider;
    use async_trait::async_trait;

    struct Miss;

    #[async_trait]
    impl HashProvider for Miss {
        fn name(&self) -> &'static str {
            "miss"
        }
        async fn lookup_by_hash(&self, _sha256: &str) -> CoreResult<Option<VersionInfo>> {
            Ok(None)
        }
    }

    struct LoraHit;

    #[async_trait]
    impl HashProvider for LoraHit {
        fn name(&self) -> &'static str {
            "lora-hit"
        }
        async fn lookup_by_hash(&self, _sha256: &str) -> CoreResult<Option<VersionInfo>> {
            Ok(Some(
                serde_json::from_value(serde_json::json!({
                    "id": 726676,
                    "modelId": 649516,
                    "name": "v2.0",
                    "baseModel": "SDXL 1.0",
                    "model": {
                        "name": "Some Style",
                        "type": "LoCon",
                        "tags": ["character", "style"],
                        "nsfw": true
                    },
                    "creator": { "username": "someone" },
                    "files": [{
                        "type": "Model",
                        "primary": true,
                        "downloadUrl": "https://civitai.com/api/download/models/726676"
                    }]
                }))
                .unwrap(),
            ))
        }
    }

    fn offline_scanner() -> MetadataScanner {
        MetadataScanner::with_chain(ProviderChain::new(vec![Box::new(Miss)]))
    }

    #[tokio::test]
    async fn degraded_scan_keeps_local_fields() {
        let dir = tempfile::tempdir().unwrap();
        let subdir = dir.path().join("checkpoints");
        std::fs::create_dir_all(&subdir).unwrap();
        let file = subdir.join("sdxl_mix.safetensors");
        std::fs::write(&file, b"hello").unwrap();

        let metadata = offline_scanner().scan_file(&file).await.unwrap();
        assert!(!metadata.from_provider);
        assert_eq!(metadata.model_type, Category::Checkpoint);
        assert_eq!(metadata.base_model, "SDXL");
        assert_eq!(metadata.file_size, 5);
        assert_eq!(
            metadata.sha256,
            "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824"
        );
        assert!(metadata.download_urls.is_empty());
    }

    #[tokio::test]
    async fn provider_type_overrides_heuristic() {
        let dir = tempfile::tempdir().unwrap();
        // Filename suggests checkpoint; the provider says LoCon.
        let file = dir.path().join("some_model.safetensors");
        std::fs::write(&file, b"weights").unwrap();

        let scanner = MetadataScanner::with_chain(ProviderChain::new(vec![Box::new(LoraHit)]));
        let metadata = scanner.scan_file(&file).await.unwrap();

        assert!(metadata.from_provider);
        assert_eq!(metadata.model_type, Category::Lora);
        assert_eq!(metadata.subcategory.as_deref(), Some("style"));
        assert_eq!(metadata.raw_provider_type.as_deref(), Some("LoCon"));
        assert_eq!(metadata.base_model, "SDXL 1.0");
        assert!(metadata.nsfw);
        assert_eq!(metadata.creator.as_deref(), Some("someone"));
        assert_eq!(
            metadata.civitai_url.as_deref(),
            Some("https://civitai.com/models/649516?modelVersionId=726676")
        );
    }

    #[tokio::test]
    async fn unsupported_extension_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("notes.txt");
        std::fs::write(&file, b"not a model").unwrap();

        let result = offline_scanner().scan_file(&file).await;
        assert!(matches!(result, Err(CoreError::UnsupportedType(_))));
    }

    #[tokio::test]
    async fn directory_scan_filters_and_recurses() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.safetensors"), b"a").unwrap();
        std::fs::write(dir.path().join("readme.md"), b"skip me").unwrap();
        let nested = dir.path().join("nested");
        std::fs::create_dir_all(&nested).unwrap();
        std::fs::write(nested.join("b.ckpt"), b"b").unwrap();

        let scanner = offline_scanner();
        let flat = scanner.scan_directory(dir.path(), false).await.unwrap();
        assert_eq!(flat.len(), 1);

        let deep = scanner.scan_directory(dir.path(), true).await.unwrap();
        assert_eq!(deep.len(), 2);
    }

    #[tokio::test]
    async fn interchange_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("lora_thing.safetensors");
        std::fs::write(&file, b"x").unwrap();

        let metadata = vec![offline_scanner().scan_file(&file).await.unwrap()];
        let out = dir.path().join("metadata.json");
        save_metadata(&metadata, &out).unwrap();

        let loaded = load_metadata(&out).unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].sha256, metadata[0].sha256);
        assert_eq!(loaded[0].model_type, metadata[0].model_type);
    }

    #[test]
    fn to_record_prefers_page_url_and_requires_some_url() {
        let mut metadata = ModelMetadata {
            file_name: "m.safetensors".into(),
            file_path: PathBuf::from("/tmp/m.safetensors"),
            file_size: 10,
            sha256: "ff".into(),
            model_type: Category::Lora,
            base_model: "SDXL".into(),
            subcategory: None,
            civitai_url: Some("https://civitai.com/models/1?modelVersionId=2".into()),
            download_urls: vec!["https://dl.example/x".into()],
            model_id: Some(1),
            version_id: Some(2),
            model_name: None,
            description: None,
            tags: Vec::new(),
            creator: None,
            nsfw: false,
            raw_provider_type: None,
            from_provider: true,
        };

        let record = metadata.to_record().unwrap();
        assert_eq!(record.url, "https://civitai.com/models/1?modelVersionId=2");
        assert_eq!(record.model_id, Some(1));

        metadata.civitai_url = None;
        assert_eq!(metadata.to_record().unwrap().url, "https://dl.example/x");

        metadata.download_urls.clear();
        assert!(metadata.to_record().is_none());
    }
}
