use crate::model::Package;
use async_trait::async_trait;
use futures::stream::BoxStream;
use thiserror::Error;

/// Failures a metadata provider reports back to the crawler.
///
/// Cloneable so a single failed fetch can be handed to every caller that was
/// waiting on it.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProviderError {
    /// The package does not exist or its condition cannot be canonicalized.
    #[error("Invalid package {package}: {reason}")]
    Validation { package: Package, reason: String },

    /// Direct dependencies could not be retrieved (network, timeout, ...).
    #[error("Failed to fetch dependencies of {package}: {reason}")]
    DependenciesFetch { package: Package, reason: String },

    #[error("Provider error: {0}")]
    Unexpected(String),
}

impl ProviderError {
    pub fn validation(package: &Package, reason: impl Into<String>) -> Self {
        Self::Validation {
            package: package.clone(),
            reason: reason.into(),
        }
    }

    pub fn dependencies_fetch(package: &Package, reason: impl Into<String>) -> Self {
        Self::DependenciesFetch {
            package: package.clone(),
            reason: reason.into(),
        }
    }
}

#[derive(Error, Debug)]
pub enum CrawlError {
    #[error(transparent)]
    Provider(#[from] ProviderError),
    #[error("No provider registered for source '{source_id}'")]
    NoProvider { source_id: String },
    #[error("Semaphore error: {0}")]
    Concurrency(String),
}

/// Lazily produced direct dependencies of a package, in discovery order.
pub type ChildStream<'a> = BoxStream<'a, Result<Package, ProviderError>>;

#[async_trait]
pub trait MetadataProvider: Send + Sync {
    /// Returns the source ID this provider answers for (e.g., "pypi").
    fn source_id(&self) -> &str;

    /// Whether this provider is responsible for `package`.
    ///
    /// Defaults to an exact match on the source ID.
    fn claims(&self, package: &Package) -> bool {
        package.source == self.source_id()
    }

    /// Returns the canonical form of `package`.
    ///
    /// Canonical name and source are used, and the condition is re-serialized
    /// through a parse/print round-trip. Normalizing an already-normalized
    /// package must return an equal package.
    async fn normalize(&self, package: &Package) -> Result<Package, ProviderError>;

    /// Yields direct children of `package`.
    ///
    /// With a condition set, only dependencies pulled in by exactly that
    /// condition are yielded. Without one, unconditional dependencies are
    /// yielded directly, followed by one conditional variant of `package`
    /// itself per condition found in the metadata. Children are neither
    /// normalized nor deduplicated.
    fn children<'a>(&'a self, package: &'a Package) -> ChildStream<'a>;
}
