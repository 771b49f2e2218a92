use async_trait::async_trait;
use reqwest::StatusCode;
use tracing::{debug, info, warn};

use crate::api::{CivitaiClient, VersionInfo, CIVARCHIVE_API_BASE};
use crate::error::{CoreError, CoreResult};

/// A remote service that can resolve model identity from a content hash.
#[async_trait]
pub trait HashProvider: Send + Sync {
    fn name(&self) -> &'static str;

    /// `Ok(None)` means the provider answered but knows nothing about the
    /// hash; `Err` means the provider could not be consulted.
    async fn lookup_by_hash(&self, sha256: &str) -> CoreResult<Option<VersionInfo>>;
}

/// Primary provider: the authenticated Civitai API.
pub struct CivitaiProvider {
    client: CivitaiClient,
}

impl CivitaiProvider {
    pub fn new(client: CivitaiClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl HashProvider for CivitaiProvider {
    fn name(&self) -> &'static str {
        "Civitai API"
    }

    async fn lookup_by_hash(&self, sha256: &str) -> CoreResult<Option<VersionInfo>> {
        self.client.version_by_hash(sha256).await
    }
}

/// Fallback provider: the unauthenticated CivArchive mirror. Same response
/// shape, except `downloadUrl` may sit at the top level.
pub struct CivArchiveProvider {
    client: CivitaiClient,
}

impl CivArchiveProvider {
    pub fn new(client: CivitaiClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl HashProvider for CivArchiveProvider {
    fn name(&self) -> &'static str {
        "CivArchive"
    }

    async fn lookup_by_hash(&self, sha256: &str) -> CoreResult<Option<VersionInfo>> {
        let url = format!("{CIVARCHIVE_API_BASE}/sha256/{}", sha256.to_lowercase());
        // No bearer token: CivArchive reads are public.
        let response = self.client.http().get(&url).send().await?;

        match response.status() {
            StatusCode::OK => Ok(Some(response.json().await?)),
            StatusCode::NOT_FOUND => Ok(None),
            status => Err(CoreError::Server {
                status: status.as_u16(),
                attempts: 1,
            }),
        }
    }
}

/// Ordered chain of providers, consulted until one yields a result.
pub struct ProviderChain {
    providers: Vec<Box<dyn HashProvider>>,
}

impl ProviderChain {
    pub fn new(providers: Vec<Box<dyn HashProvider>>) -> Self {
        Self { providers }
    }

    /// The production chain: Civitai first, CivArchive as the archive
    /// fallback.
    pub fn standard(client: &CivitaiClient) -> Self {
        Self::new(vec![
            Box::new(CivitaiProvider::new(client.clone())),
            Box::new(CivArchiveProvider::new(client.clone())),
        ])
    }

    /// Ask each provider in order. Failures are logged and the next provider
    /// is tried; `None` means every provider either failed or had no match.
    pub async fn resolve(&self, sha256: &str) -> Option<VersionInfo> {
        let short = &sha256[..16.min(sha256.len())];
        for provider in &self.providers {
            info!(provider = provider.name(), hash = short, "Looking up hash");
            match provider.lookup_by_hash(sha256).await {
                Ok(Some(version)) => {
                    info!(provider = provider.name(), "Hash lookup succeeded");
                    return Some(version);
                }
                Ok(None) => {
                    debug!(provider = provider.name(), "No match for hash");
                }
                Err(e) => {
                    warn!(provider = provider.name(), error = %e, "Provider lookup failed");
                }
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

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

    struct Broken;

    #[async_trait]
    impl HashProvider for Broken {
        fn name(&self) -> &'static str {
            "broken"
        }
        async fn lookup_by_hash(&self, _sha256: &str) -> CoreResult<Option<VersionInfo>> {
            Err(CoreError::Server { status: 503, attempts: 3 })
        }
    }

    struct Hit;

    #[async_trait]
    impl HashProvider for Hit {
        fn name(&self) -> &'static str {
            "hit"
        }
        async fn lookup_by_hash(&self, _sha256: &str) -> CoreResult<Option<VersionInfo>> {
            Ok(Some(VersionInfo {
                id: Some(7),
                model_id: Some(8),
                ..Default::default()
            }))
        }
    }

    #[tokio::test]
    async fn falls_through_miss_to_next_provider() {
        let chain = ProviderChain::new(vec![Box::new(Miss), Box::new(Hit)]);
        let version = chain.resolve("abc123").await.unwrap();
        assert_eq!(version.id, Some(7));
    }

    #[tokio::test]
    async fn provider_error_does_not_abort_the_chain() {
        let chain = ProviderChain::new(vec![Box::new(Broken), Box::new(Hit)]);
        assert!(chain.resolve("abc123").await.is_some());
    }

    #[tokio::test]
    async fn all_providers_failing_yields_none() {
        let chain = ProviderChain::new(vec![Box::new(Broken), Box::new(Miss)]);
        assert!(chain.resolve("abc123").await.is_none());
    }
}
