//! Metadata provider implementations.

pub mod memory;

pub use memory::{fold_name, FetchError, MemoryProvider, ProjectRecord, RecordCache, Requirement};
