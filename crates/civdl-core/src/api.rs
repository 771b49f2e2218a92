use std::collections::HashSet;
use std::time::Duration;

use rand::Rng;
use reqwest::header::{AUTHORIZATION, RETRY_AFTER};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{CoreError, CoreResult};

pub const CIVITAI_API_BASE: &str = "https://civitai.com/api/v1";
pub const CIVARCHIVE_API_BASE: &str = "https://civarchive.com/api";

const USER_AGENT: &str = "civdl/0.1";
const MAX_RETRIES: u32 = 3;
const BACKOFF_BASE_SECS: f64 = 1.0;
/// Ceiling on a server-supplied Retry-After wait.
const MAX_RETRY_AFTER_SECS: u64 = 300;

// ─── Wire types ───────────────────────────────────────────────────────────────

/// A model version as returned by `/model-versions/{id}` or the by-hash
/// endpoints. CivArchive responses are shaped similarly but may carry
/// `downloadUrl` at the top level instead of inside `files`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct VersionInfo {
    pub id: Option<u64>,
    pub model_id: Option<u64>,
    pub name: Option<String>,
    pub base_model: Option<String>,
    pub model: Option<ModelBlock>,
    pub files: Vec<FileEntry>,
    pub creator: Option<Creator>,
    pub download_url: Option<String>,
}

/// The nested `model` block of a version response.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ModelBlock {
    pub name: Option<String>,
    #[serde(rename = "type")]
    pub kind: Option<String>,
    pub description: Option<String>,
    pub tags: Vec<String>,
    pub nsfw: Option<bool>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct FileEntry {
    pub name: Option<String>,
    #[serde(rename = "type")]
    pub kind: Option<String>,
    pub primary: Option<bool>,
    #[serde(rename = "sizeKB")]
    pub size_kb: Option<f64>,
    pub download_url: Option<String>,
    pub mirrors: Vec<Mirror>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Mirror {
    pub url: Option<String>,
    pub deleted_at: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Creator {
    pub username: Option<String>,
}

/// A parent model as returned by `/models/{id}`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ModelResponse {
    pub id: Option<u64>,
    pub name: Option<String>,
    #[serde(rename = "type")]
    pub kind: Option<String>,
    pub description: Option<String>,
    pub tags: Vec<String>,
    pub nsfw: Option<bool>,
    pub creator: Option<Creator>,
    pub model_versions: Vec<VersionInfo>,
}

impl VersionInfo {
    /// The file the version considers its main artifact: marked `primary`
    /// and of type `Model`.
    pub fn primary_model_file(&self) -> Option<&FileEntry> {
        self.files
            .iter()
            .find(|f| f.primary == Some(true) && f.kind.as_deref() == Some("Model"))
    }

    /// All usable download URLs: the primary Model file's main URL plus its
    /// non-deleted mirrors, deduplicated. Falls back to a top-level
    /// `downloadUrl` (CivArchive shape) when no file entry qualifies.
    pub fn download_urls(&self) -> Vec<String> {
        let mut seen = HashSet::new();
        let mut urls: Vec<String> = Vec::new();

        for file in &self.files {
            if file.primary != Some(true) || file.kind.as_deref() != Some("Model") {
                continue;
            }
            let mirrors = file
                .mirrors
                .iter()
                .filter(|m| m.deleted_at.is_none())
                .filter_map(|m| m.url.as_deref());
            for url in file.download_url.as_deref().into_iter().chain(mirrors) {
                if seen.insert(url.to_string()) {
                    urls.push(url.to_string());
                }
            }
        }

        if urls.is_empty() {
            if let Some(url) = self.download_url.as_deref() {
                urls.push(url.to_string());
            }
        }

        urls
    }

    /// Canonical Civitai page URL for this version, when identity is known.
    pub fn page_url(&self) -> Option<String> {
        match (self.model_id, self.id) {
            (Some(m), Some(v)) => Some(format!(
                "https://civitai.com/models/{m}?modelVersionId={v}"
            )),
            _ => None,
        }
    }
}

// ─── Client ───────────────────────────────────────────────────────────────────

/// Authenticated Civitai API client.
///
/// One client backs a whole batch of operations; the underlying pool is
/// capped at 8 idle connections per host. Connect and idle-read timeouts
/// are set independently and no total timeout is imposed, since model
/// downloads can run for hours.
#[derive(Debug, Clone)]
pub struct CivitaiClient {
    http: reqwest::Client,
    token: Option<String>,
}

impl CivitaiClient {
    pub fn new(token: Option<String>) -> CoreResult<Self> {
        let http = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .connect_timeout(Duration::from_secs(60))
            .read_timeout(Duration::from_secs(300))
            .pool_max_idle_per_host(8)
            .build()?;
        Ok(Self {
            http,
            token: token.filter(|t| !t.is_empty()),
        })
    }

    pub fn http(&self) -> &reqwest::Client {
        &self.http
    }

    pub fn token(&self) -> Option<&str> {
        self.token.as_deref()
    }

    fn get(&self, url: &str) -> reqwest::RequestBuilder {
        let mut req = self.http.get(url);
        if let Some(token) = &self.token {
            req = req.header(AUTHORIZATION, format!("Bearer {token}"));
        }
        req
    }

    /// Resolve version info from a URL identity: a version id is fetched
    /// directly, a bare model id resolves to its latest version.
    pub async fn version_info(
        &self,
        model_id: u64,
        version_id: Option<u64>,
    ) -> CoreResult<VersionInfo> {
        match version_id {
            Some(v) => self.version_by_id(v).await,
            None => self.latest_version_of(model_id).await,
        }
    }

    /// Fetch `/model-versions/{id}` and augment the result with the parent
    /// model's description, tags and creator.
    pub async fn version_by_id(&self, version_id: u64) -> CoreResult<VersionInfo> {
        let url = format!("{CIVITAI_API_BASE}/model-versions/{version_id}");
        let response = self.get(&url).send().await?;

        match response.status() {
            StatusCode::OK => {
                let mut version: VersionInfo = response.json().await?;
                self.augment_with_model(&mut version).await;
                Ok(version)
            }
            StatusCode::UNAUTHORIZED => {
                Err(CoreError::Auth("API token rejected".to_string()))
            }
            StatusCode::NOT_FOUND => Err(CoreError::NotFound(format!(
                "model version {version_id}"
            ))),
            status => Err(CoreError::Server {
                status: status.as_u16(),
                attempts: 1,
            }),
        }
    }

    /// Fetch `/models/{id}` and descend into its newest version.
    pub async fn latest_version_of(&self, model_id: u64) -> CoreResult<VersionInfo> {
        let model = self.model_by_id(model_id).await?;
        let latest = model
            .model_versions
            .first()
            .and_then(|v| v.id)
            .ok_or_else(|| {
                CoreError::NotFound(format!("model {model_id} has no versions"))
            })?;
        self.version_by_id(latest).await
    }

    pub async fn model_by_id(&self, model_id: u64) -> CoreResult<ModelResponse> {
        let url = format!("{CIVITAI_API_BASE}/models/{model_id}");
        let response = self.get(&url).send().await?;

        match response.status() {
            StatusCode::OK => Ok(response.json().await?),
            StatusCode::UNAUTHORIZED => {
                Err(CoreError::Auth("API token rejected".to_string()))
            }
            StatusCode::NOT_FOUND => Err(CoreError::NotFound(format!("model {model_id}"))),
            status => Err(CoreError::Server {
                status: status.as_u16(),
                attempts: 1,
            }),
        }
    }

    /// Look up a version by SHA-256 content hash with the retry policy:
    /// 429 waits for the server-supplied Retry-After (capped), 5xx backs off
    /// exponentially with jitter, both up to [`MAX_RETRIES`] attempts.
    /// 404 is "no result", not an error; 401 is permanent.
    pub async fn version_by_hash(&self, sha256: &str) -> CoreResult<Option<VersionInfo>> {
        let url = format!("{CIVITAI_API_BASE}/model-versions/by-hash/{sha256}");

        for attempt in 1..=MAX_RETRIES {
            let response = self.get(&url).send().await?;
            let status = response.status();

            match status {
                StatusCode::OK => {
                    let mut version: VersionInfo = response.json().await?;
                    self.augment_with_model(&mut version).await;
                    return Ok(Some(version));
                }
                StatusCode::NOT_FOUND => {
                    debug!(hash = %&sha256[..16.min(sha256.len())], "No Civitai match for hash");
                    return Ok(None);
                }
                StatusCode::UNAUTHORIZED => {
                    return Err(CoreError::Auth("API token rejected".to_string()));
                }
                StatusCode::TOO_MANY_REQUESTS => {
                    if attempt == MAX_RETRIES {
                        return Err(CoreError::RateLimited { attempts: attempt });
                    }
                    let wait = retry_after_secs(&response).min(MAX_RETRY_AFTER_SECS);
                    warn!(attempt, wait, "Rate limited, waiting before retry");
                    tokio::time::sleep(Duration::from_secs(wait)).await;
                }
                s if s.is_server_error() => {
                    if attempt == MAX_RETRIES {
                        return Err(CoreError::Server {
                            status: s.as_u16(),
                            attempts: attempt,
                        });
                    }
                    let wait = backoff_with_jitter(attempt);
                    warn!(attempt, status = s.as_u16(), wait_secs = wait, "Server error, backing off");
                    tokio::time::sleep(Duration::from_secs_f64(wait)).await;
                }
                s => {
                    return Err(CoreError::Server {
                        status: s.as_u16(),
                        attempts: attempt,
                    });
                }
            }
        }

        Err(CoreError::RateLimited { attempts: MAX_RETRIES })
    }

    /// Secondary request filling in parent-model fields. A failure here must
    /// not invalidate the already-fetched version, so errors are only logged.
    async fn augment_with_model(&self, version: &mut VersionInfo) {
        let Some(model_id) = version.model_id else {
            return;
        };

        match self.model_by_id(model_id).await {
            Ok(model) => {
                let block = version.model.get_or_insert_with(ModelBlock::default);
                block.description = model.description;
                block.tags = model.tags;
                if block.nsfw.is_none() {
                    block.nsfw = model.nsfw;
                }
                if version.creator.is_none() {
                    version.creator = model.creator;
                }
            }
            Err(e) => {
                warn!(model_id, error = %e, "Could not fetch parent model details");
            }
        }
    }
}

fn retry_after_secs(response: &reqwest::Response) -> u64 {
    response
        .headers()
        .get(RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.parse().ok())
        .unwrap_or(60)
}

fn backoff_with_jitter(attempt: u32) -> f64 {
    let base = BACKOFF_BASE_SECS * f64::from(2u32.pow(attempt - 1));
    base + rand::thread_rng().gen_range(0.0..1.0)
}
