//! Command handlers for the Ragmill CLI.
//!
//! This module organizes all CLI commands into separate submodules.

pub mod chunk;
pub mod embed;
pub mod index;
pub mod query;

// Re-export command types for convenience
pub use chunk::ChunkCommand;
pub use embed::EmbedCommand;
pub use index::IndexCommand;
pub use query::QueryCommand;
