pub mod cache;
pub mod condition;
pub mod config;
pub mod depgraph;
pub mod executor;
pub mod model;
pub mod providers;
pub mod telemetry;
pub mod traits;

// Re-export common types for convenience
pub use cache::MetadataCache;
pub use config::CrawlOptions;
pub use depgraph::{DependencyGraph, GraphBuilder};
pub use executor::*;
pub use model::*;
pub use traits::*;
