//! In-process metadata registry.
//!
//! Serves project records held in memory (typically loaded from a JSON
//! fixture) through the shared [`MetadataCache`], so it behaves like a
//! network-backed registry from the crawler's point of view: lookups are
//! coalesced, cached, and can be made to fail transiently.

use crate::cache::MetadataCache;
use crate::condition::Condition;
use crate::model::{non_empty, Package};
use crate::traits::{ChildStream, MetadataProvider, ProviderError};
use async_trait::async_trait;
use futures::stream::{self, StreamExt, TryStreamExt};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, LazyLock, Mutex, PoisonError};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, instrument};

static NAME_SEPARATORS: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[-_.]+").expect("invalid regex"));

/// Folds a project name for lookups: lowercase, separator runs become `-`.
pub fn fold_name(name: &str) -> String {
    NAME_SEPARATORS.replace_all(name, "-").to_lowercase()
}

/// A dependency declared by a project.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Requirement {
    #[serde(deserialize_with = "non_empty")]
    pub name: String,
    /// When this dependency applies. Absent means always.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<String>,
    /// Optional features of the dependency that are switched on.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub features: Vec<String>,
}

/// Metadata record for one project.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectRecord {
    /// Canonical project name
    #[serde(deserialize_with = "non_empty")]
    pub name: String,
    #[serde(default)]
    pub requires: Vec<Requirement>,
}

/// Why a record lookup failed.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FetchError {
    #[error("Project '{0}' not found")]
    NotFound(String),
    #[error("Registry unavailable while fetching '{0}'")]
    Unavailable(String),
}

/// Cache type shared by memory providers.
pub type RecordCache = MetadataCache<String, Arc<ProjectRecord>, FetchError>;

/// Metadata provider answering from an in-memory table.
pub struct MemoryProvider {
    source: String,
    records: HashMap<String, Arc<ProjectRecord>>,
    cache: Arc<RecordCache>,
    /// Remaining forced failures per folded name
    outages: Mutex<HashMap<String, usize>>,
    latency: Duration,
    fetches: AtomicUsize,
}

impl MemoryProvider {
    pub fn new(source: impl Into<String>, cache: Arc<RecordCache>) -> Self {
        Self {
            source: source.into(),
            records: HashMap::new(),
            cache,
            outages: Mutex::new(HashMap::new()),
            latency: Duration::ZERO,
            fetches: AtomicUsize::new(0),
        }
    }

    /// Loads records from a JSON array of [`ProjectRecord`]s.
    pub fn from_json(source: impl Into<String>, json: &str, cache: Arc<RecordCache>) -> Result<Self, serde_json::Error> {
        let records: Vec<ProjectRecord> = serde_json::from_str(json)?;
        Ok(records
            .into_iter()
            .fold(Self::new(source, cache), |provider, record| provider.with_record(record)))
    }

    pub fn with_record(mut self, record: ProjectRecord) -> Self {
        self.records.insert(fold_name(&record.name), Arc::new(record));
        self
    }

    /// Makes the next `failures` lookups of `name` fail as unavailable.
    pub fn with_outage(mut self, name: &str, failures: usize) -> Self {
        self.outages
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(fold_name(name), failures);
        self
    }

    /// Simulated round-trip time of every lookup that reaches the table.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Lookups that missed the cache and reached the table.
    pub fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }

    fn cache_key(&self, name: &str) -> String {
        format!("{}/{}", self.source.to_lowercase(), fold_name(name))
    }

    async fn project(&self, name: &str) -> Result<Arc<ProjectRecord>, FetchError> {
        let folded = fold_name(name);
        self.cache
            .fetch(&self.cache_key(name), || async move {
                self.fetches.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(self.latency).await;

                let failing = {
                    let mut outages = self.outages.lock().unwrap_or_else(PoisonError::into_inner);
                    match outages.get_mut(&folded) {
                        Some(remaining) if *remaining > 0 => {
                            *remaining -= 1;
                            true
                        }
                        _ => false,
                    }
                };
                if failing {
                    return Err(FetchError::Unavailable(name.to_string()));
                }

                debug!(project = %folded, "Fetched project record");
                self.records
                    .get(&folded)
                    .cloned()
                    .ok_or_else(|| FetchError::NotFound(name.to_string()))
            })
            .await
    }

    fn package(&self, name: &str, condition: Option<String>) -> Package {
        Package {
            name: name.to_string(),
            source: self.source.clone(),
            condition,
        }
    }

    /// The requirement itself plus one variant per selected feature.
    fn with_features(&self, requirement: &Requirement) -> Vec<Package> {
        std::iter::once(None)
            .chain(
                requirement
                    .features
                    .iter()
                    .map(|feature| Some(Condition::equals("feature", feature.as_str()).to_string())),
            )
            .map(|condition| self.package(&requirement.name, condition))
            .collect()
    }

    fn select_children(&self, package: &Package, record: &ProjectRecord) -> Vec<Package> {
        let mut children = Vec::new();

        match package.condition.as_deref() {
            Some(condition) => {
                let wanted = canonical_or_raw(condition);
                for requirement in &record.requires {
                    if requirement.condition.as_deref().map(canonical_or_raw).as_ref() == Some(&wanted) {
                        children.extend(self.with_features(requirement));
                    }
                }
            }
            None => {
                let mut conditions = HashSet::new();
                for requirement in &record.requires {
                    match requirement.condition.as_deref() {
                        Some(condition) => {
                            let condition = canonical_or_raw(condition);
                            if conditions.insert(condition.clone()) {
                                children.push(self.package(&package.name, Some(condition)));
                            }
                        }
                        None => children.extend(self.with_features(requirement)),
                    }
                }
            }
        }

        children
    }
}

/// Canonical spelling of a condition, or the text as-is when it does not
/// parse. Normalization rejects the latter later on.
fn canonical_or_raw(condition: &str) -> String {
    Condition::canonicalize(condition).unwrap_or_else(|_| condition.to_string())
}

#[async_trait]
impl MetadataProvider for MemoryProvider {
    fn source_id(&self) -> &str {
        &self.source
    }

    fn claims(&self, package: &Package) -> bool {
        package.source.eq_ignore_ascii_case(&self.source)
    }

    #[instrument(level = "debug", skip(self, package), fields(package = %package))]
    async fn normalize(&self, package: &Package) -> Result<Package, ProviderError> {
        let project = self
            .project(&package.name)
            .await
            .map_err(|e| ProviderError::validation(package, e.to_string()))?;

        let condition = package
            .condition
            .as_deref()
            .map(Condition::canonicalize)
            .transpose()
            .map_err(|e| ProviderError::validation(package, e.to_string()))?;

        Ok(self.package(&project.name, condition))
    }

    fn children<'a>(&'a self, package: &'a Package) -> ChildStream<'a> {
        let selected = async move {
            let project = self
                .project(&package.name)
                .await
                .map_err(|e| ProviderError::dependencies_fetch(package, e.to_string()))?;
            Ok(self.select_children(package, &project))
        };

        stream::once(selected)
            .map_ok(|children| stream::iter(children.into_iter().map(Ok)))
            .try_flatten()
            .boxed()
    }
}
