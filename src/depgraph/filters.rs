//! Package filters applied to children before they are normalized.

use crate::condition::{Condition, Operator};
use crate::model::Package;
use glob::{Pattern, PatternError};
use std::fmt;
use std::sync::Arc;

/// Predicate deciding whether a discovered package should be crawled.
pub type PackageFilter = Arc<dyn Fn(&Package) -> bool + Send + Sync>;

/// Clause keys that name an optional feature gate.
const FEATURE_KEYS: [&str; 2] = ["feature", "extra"];

/// Conjunction of package filters. An empty set admits every package.
#[derive(Clone, Default)]
pub struct FilterSet {
    filters: Vec<PackageFilter>,
}

impl FilterSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, filter: PackageFilter) {
        self.filters.push(filter);
    }

    pub fn with<F>(mut self, filter: F) -> Self
    where
        F: Fn(&Package) -> bool + Send + Sync + 'static,
    {
        self.push(Arc::new(filter));
        self
    }

    pub fn allows(&self, package: &Package) -> bool {
        self.filters.iter().all(|filter| filter(package))
    }

    pub fn len(&self) -> usize {
        self.filters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.filters.is_empty()
    }
}

impl fmt::Debug for FilterSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FilterSet")
            .field("filters", &self.filters.len())
            .finish()
    }
}

/// Rejects packages pulled in by an optional feature matching any of `globs`.
///
/// Unconditional packages always pass. So do packages whose condition does
/// not parse; normalization reports those as invalid.
pub fn exclude_features<S: AsRef<str>>(globs: &[S]) -> Result<PackageFilter, PatternError> {
    let patterns = globs
        .iter()
        .map(|glob| Pattern::new(glob.as_ref()))
        .collect::<Result<Vec<_>, _>>()?;

    Ok(Arc::new(move |package: &Package| {
        let Some(condition) = package.condition.as_deref() else {
            return true;
        };
        let Ok(condition) = Condition::parse(condition) else {
            return true;
        };

        let excluded = condition.clauses().any(|clause| {
            clause.op == Operator::Eq
                && FEATURE_KEYS.contains(&clause.key.as_str())
                && patterns.iter().any(|pattern| pattern.matches(&clause.value))
        });
        !excluded
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gated(condition: &str) -> Package {
        Package::new("pytest", "memory").with_condition(condition)
    }

    #[test]
    fn test_empty_set_allows_all() {
        let filters = FilterSet::new();
        assert!(filters.is_empty());
        assert!(filters.allows(&Package::new("anything", "memory")));
    }

    #[test]
    fn test_filters_combine_with_and() {
        let filters = FilterSet::new()
            .with(|p: &Package| p.name != "blocked")
            .with(|p: &Package| p.source == "memory");

        assert_eq!(filters.len(), 2);
        assert!(filters.allows(&Package::new("fine", "memory")));
        assert!(!filters.allows(&Package::new("blocked", "memory")));
        assert!(!filters.allows(&Package::new("fine", "elsewhere")));
    }

    #[test]
    fn test_exclude_features_globs() {
        let filter = exclude_features(&["test*", "docs"]).unwrap();

        assert!(!filter(&gated("feature == \"testing\"")));
        assert!(!filter(&gated("extra == 'docs'")));
        assert!(!filter(&gated("os == \"linux\" and feature == \"tests\"")));
        assert!(filter(&gated("feature == \"socks\"")));
        assert!(filter(&gated("feature != \"testing\"")));
        assert!(filter(&gated("os == \"test\"")));
        assert!(filter(&Package::new("pytest", "memory")));
        assert!(filter(&gated("not a condition")));
    }

    #[test]
    fn test_exclude_features_with_or_clauses() {
        let filter = exclude_features(&["doc*"]).unwrap();

        assert!(!filter(&gated("feature == 'socks' or extra == 'docs'")));
        assert!(filter(&gated("feature == 'socks' or extra == 'tests'")));
    }

    #[test]
    fn test_exclude_features_bad_glob() {
        assert!(exclude_features(&["[oops"]).is_err());
    }
}
