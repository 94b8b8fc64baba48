//! Ragmill Core Library
//!
//! Foundational utilities shared by every Ragmill crate:
//! - Error handling (`AppError`, `AppResult`)
//! - Logging infrastructure
//! - Configuration and the embedding model registry
//! - Project storage layout helpers

pub mod config;
pub mod error;
pub mod logging;
pub mod paths;

// Re-export commonly used types
pub use config::{AppConfig, EngineConfig, ModelConfig};
pub use error::{AppError, AppResult};
