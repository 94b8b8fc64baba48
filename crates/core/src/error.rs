//! Error types for the Ragmill pipeline.
//!
//! This module defines a unified error enum covering every error category
//! in the system: configuration, I/O, embedding models, chunk data,
//! vector indices, and the external chunking engine.

use thiserror::Error;

/// Unified error type for the Ragmill pipeline.
///
/// All fallible functions return `Result<T, AppError>`.
/// We never panic — errors must be represented and propagated.
///
/// Two situations deliberately have no variant here: a duplicate start
/// request joins the existing job (not a failure), and stale or corrupted
/// job records are repaired in place and logged, never surfaced.
#[derive(Error, Debug)]
pub enum AppError {
    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// I/O and filesystem errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Requested embedding model is not configured
    #[error("Unknown embedding model: '{0}'")]
    UnknownModel(String),

    /// Project has no chunk set to embed
    #[error("No chunks found for project '{0}'. Run chunking first.")]
    NoChunks(String),

    /// Vector index does not exist for the given reference
    #[error("Index '{0}' not found. Run embedding first to create it.")]
    IndexNotFound(String),

    /// One of an index's persisted artifacts is absent
    #[error("Index artifact missing: {0}")]
    MissingArtifact(String),

    /// The chunking engine exited with a nonzero status
    #[error("Chunking engine failed (exit {code:?}): {detail}")]
    ProcessExit { code: Option<i32>, detail: String },

    /// The engine claimed success but its output could not be parsed
    #[error("Failed to parse chunking engine output: {0}")]
    ResultParse(String),

    /// Embedding provider errors
    #[error("Embedding error: {0}")]
    Embedding(String),

    /// HTTP transport errors from remote providers
    #[error("HTTP error: {0}")]
    Http(String),

    /// Serialization/deserialization errors
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Generic errors
    #[error("{0}")]
    Other(String),
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::Serialization(err.to_string())
    }
}

impl From<serde_yaml::Error> for AppError {
    fn from(err: serde_yaml::Error) -> Self {
        AppError::Serialization(err.to_string())
    }
}

/// Convenience type alias for Results with AppError.
pub type AppResult<T> = Result<T, AppError>;
