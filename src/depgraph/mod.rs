//! Dependency graph module - recursive discovery of a package's dependencies.
//!
//! - **Builder**: the concurrent crawler, [`GraphBuilder`]
//! - **Graph**: read-only results via [`DependencyGraph`]
//! - **Filters**: pruning of discovered packages via [`FilterSet`]

pub mod builder;
pub mod filters;
pub mod graph;

pub use builder::GraphBuilder;
pub use filters::{exclude_features, FilterSet, PackageFilter};
pub use graph::{DependencyGraph, GraphNode};
