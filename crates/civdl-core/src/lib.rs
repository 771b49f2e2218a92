//! # civdl-core
//!
//! Civitai model downloading for civdl: URL identity parsing, model type
//! classification, the download ledger, hash-based metadata resolution with
//! a provider fallback chain, and the resumable transfer engine.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use civdl_core::{CivitaiClient, CoreResult, TransferEngine, parse_model_url};
//!
//! #[tokio::main]
//! async fn main() -> CoreResult<()> {
//!     let (model_id, version_id) = parse_model_url(
//!         "https://civitai.com/models/649516?modelVersionId=726676",
//!     )?;
//!     let client = CivitaiClient::new(Some("token".to_string()))?;
//!     let version = client.version_info(model_id, version_id).await?;
//!     let file = version.primary_model_file().expect("no primary file");
//!     let url = file.download_url.as_deref().expect("no download URL");
//!     let engine = TransferEngine::new(&client);
//!     engine.download(url, "model.safetensors".as_ref(), None, None).await?;
//!     Ok(())
//! }
//! ```

pub mod api;
pub mod classify;
pub mod error;
pub mod integrity;
pub mod ledger;
pub mod providers;
pub mod scanner;
pub mod transfer;
pub mod urls;

pub use api::{CivitaiClient, FileEntry, ModelBlock, ModelResponse, VersionInfo};
pub use classify::{classify_provider_type, classify_subcategory, Category};
pub use error::{CoreError, CoreResult};
pub use integrity::sha256_file;
pub use ledger::{human_size, DownloadRecord, Ledger};
pub use providers::{CivArchiveProvider, CivitaiProvider, HashProvider, ProviderChain};
pub use scanner::{load_metadata, save_metadata, MetadataScanner, ModelMetadata};
pub use transfer::{TransferEngine, TransferOutcome};
pub use urls::parse_model_url;
