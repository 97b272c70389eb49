use crate::depgraph::filters::{exclude_features, FilterSet};
use crate::model::DepthBudget;
use serde::{Deserialize, Serialize};
use std::num::NonZeroUsize;
use thiserror::Error;

pub const DEFAULT_CONCURRENCY_LIMIT: usize = 32;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to parse options: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("Invalid option '{field}': {reason}")]
    Invalid { field: &'static str, reason: String },
}

/// Options for a single crawl.
///
/// All fields are optional in the serialized form; unknown fields are
/// rejected.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CrawlOptions {
    /// Maximum depth level. `None` crawls until the graph is exhausted.
    pub max_depth: Option<u32>,

    /// Records kept by the shared metadata cache
    pub cache_capacity: usize,

    /// Provider calls allowed in flight at once
    pub concurrency_limit: usize,

    /// Glob patterns of optional features whose dependencies are skipped
    pub exclude_features: Vec<String>,
}

impl Default for CrawlOptions {
    fn default() -> Self {
        Self {
            max_depth: None,
            cache_capacity: crate::cache::DEFAULT_CAPACITY.get(),
            concurrency_limit: DEFAULT_CONCURRENCY_LIMIT,
            exclude_features: Vec::new(),
        }
    }
}

impl CrawlOptions {
    /// Parses options from JSON and validates them.
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let options: Self = serde_json::from_str(json)?;
        options.validate()?;
        Ok(options)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_depth == Some(0) {
            return Err(ConfigError::Invalid {
                field: "max_depth",
                reason: "must be greater than zero".to_string(),
            });
        }
        if self.cache_capacity == 0 {
            return Err(ConfigError::Invalid {
                field: "cache_capacity",
                reason: "must be greater than zero".to_string(),
            });
        }
        if self.concurrency_limit == 0 {
            return Err(ConfigError::Invalid {
                field: "concurrency_limit",
                reason: "must be greater than zero".to_string(),
            });
        }
        for pattern in &self.exclude_features {
            glob::Pattern::new(pattern).map_err(|e| ConfigError::Invalid {
                field: "exclude_features",
                reason: format!("{pattern}: {e}"),
            })?;
        }
        Ok(())
    }

    pub fn depth_budget(&self) -> DepthBudget {
        DepthBudget::from(self.max_depth)
    }

    /// Cache capacity, falling back to the default for a zero value.
    pub fn cache_capacity(&self) -> NonZeroUsize {
        NonZeroUsize::new(self.cache_capacity).unwrap_or(crate::cache::DEFAULT_CAPACITY)
    }

    /// Builds the package filter described by these options.
    pub fn package_filter(&self) -> Result<FilterSet, ConfigError> {
        let mut filters = FilterSet::new();
        if !self.exclude_features.is_empty() {
            let filter = exclude_features(&self.exclude_features).map_err(|e| ConfigError::Invalid {
                field: "exclude_features",
                reason: e.to_string(),
            })?;
            filters.push(filter);
        }
        Ok(filters)
    }
}
