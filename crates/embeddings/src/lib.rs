//! Embedding providers for Ragmill.
//!
//! Interchangeable vector models behind one batch-first trait, a factory,
//! and a registry that owns the per-model provider cache.

pub mod provider;
pub mod providers;
pub mod registry;

pub use provider::{create_provider, EmbeddingProvider};
pub use registry::ProviderRegistry;
