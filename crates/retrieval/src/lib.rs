//! Vector index management and retrieval for Ragmill.
//!
//! A flat dense index with per-run persistence, a caching manager over
//! many runs per project, and a retrieval engine implementing the
//! count-limited and token-budgeted selection policies.

pub mod dense;
pub mod engine;
pub mod manager;
pub mod store;

pub use dense::DenseIndex;
pub use engine::{
    estimate_tokens, CompareOptions, ContextOptions, ContextResult, IndexComparison,
    RetrievalEngine, ScoredDocument,
};
pub use manager::IndexManager;
pub use store::{DocumentRecord, IndexConfig, LoadedIndex};
