use crate::model::Package;
use crate::traits::{CrawlError, MetadataProvider, ProviderError};
use futures::TryStreamExt;
use std::sync::Arc;
use tokio::sync::{Semaphore, SemaphorePermit};
use tracing::{debug, instrument};

/// Ordered set of metadata providers.
///
/// Each call is routed to the first registered provider that claims the
/// package. A semaphore caps how many provider calls run at once.
pub struct ProviderRegistry {
    providers: Vec<Arc<dyn MetadataProvider>>,
    semaphore: Arc<Semaphore>,
}

impl ProviderRegistry {
    pub fn new(concurrency_limit: usize) -> Self {
        Self {
            providers: Vec::new(),
            semaphore: Arc::new(Semaphore::new(concurrency_limit)),
        }
    }

    /// Appends a provider. Earlier registrations take precedence.
    pub fn register(&mut self, provider: Arc<dyn MetadataProvider>) -> &mut Self {
        self.providers.push(provider);
        self
    }

    pub fn with_provider(mut self, provider: Arc<dyn MetadataProvider>) -> Self {
        self.register(provider);
        self
    }

    pub fn len(&self) -> usize {
        self.providers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }

    fn route(&self, package: &Package) -> Result<&dyn MetadataProvider, CrawlError> {
        self.providers
            .iter()
            .find(|provider| provider.claims(package))
            .map(|provider| &**provider)
            .ok_or_else(|| CrawlError::NoProvider {
                source_id: package.source.clone(),
            })
    }

    async fn permit(&self) -> Result<SemaphorePermit<'_>, CrawlError> {
        self.semaphore
            .acquire()
            .await
            .map_err(|e| CrawlError::Concurrency(e.to_string()))
    }

    #[instrument(level = "debug", skip(self, package), fields(package = %package))]
    pub async fn normalize(&self, package: &Package) -> Result<Package, CrawlError> {
        package
            .validate()
            .map_err(|e| ProviderError::validation(package, e.to_string()))?;
        let provider = self.route(package)?;
        let _permit = self.permit().await?;

        let normalized = provider.normalize(package).await?;
        debug!(provider = provider.source_id(), normalized = %normalized, "Normalized package");
        Ok(normalized)
    }

    /// Drains the routed provider's child stream.
    ///
    /// The concurrency permit is held until the stream is exhausted, so a
    /// slow registry counts against the limit for the whole fetch.
    #[instrument(level = "debug", skip(self, package), fields(package = %package))]
    pub async fn children(&self, package: &Package) -> Result<Vec<Package>, CrawlError> {
        let provider = self.route(package)?;
        let _permit = self.permit().await?;

        let children: Vec<Package> = provider.children(package).try_collect().await?;
        // A nameless child means the metadata itself is broken.
        if let Some(err) = children.iter().find_map(|child| child.validate().err()) {
            return Err(ProviderError::dependencies_fetch(package, format!("malformed child: {err}")).into());
        }
        debug!(count = children.len(), "Fetched children");
        Ok(children)
    }
}

impl Default for ProviderRegistry {
    fn default() -> Self {
        Self::new(crate::config::DEFAULT_CONCURRENCY_LIMIT)
    }
}
