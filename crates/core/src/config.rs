//! Configuration management for Ragmill.
//!
//! Configuration is file-based (`ragmill.yaml` in the data directory) with
//! CLI/environment overrides applied on top. It covers the external
//! chunking engine invocation, embedding model registry, and pipeline
//! tuning knobs.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{AppError, AppResult};

/// Main application configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Root directory for all persisted state (projects, indices, jobs)
    pub data_dir: PathBuf,

    /// External chunking engine invocation
    #[serde(default)]
    pub engine: EngineConfig,

    /// Number of chunks sent to the embedding provider per batch.
    /// Small batches keep progress events frequent; large ones amortize
    /// provider overhead. Valid range is 5-50.
    #[serde(default = "default_embed_batch_size")]
    pub embed_batch_size: usize,

    /// Registered embedding models
    #[serde(default = "default_models")]
    pub models: Vec<ModelConfig>,

    /// Log level override
    #[serde(default)]
    pub log_level: Option<String>,
}

/// How to invoke the external chunking engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Interpreter or executable (e.g. "python3")
    pub command: String,

    /// Script or program path passed as the first argument
    pub script: PathBuf,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            command: "python3".to_string(),
            script: PathBuf::from("server/python/docling_chunker.py"),
        }
    }
}

/// One registered embedding model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    /// Stable identifier used in index references (e.g. "hash-384")
    pub id: String,

    /// Human-readable name shown in comparisons
    pub name: String,

    /// Provider kind: "hash" or "ollama"
    pub provider: String,

    /// Fixed embedding dimension for this model
    pub dimension: usize,

    /// Provider endpoint override (remote providers only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
}

fn default_embed_batch_size() -> usize {
    16
}

fn default_models() -> Vec<ModelConfig> {
    vec![ModelConfig {
        id: "hash-384".to_string(),
        name: "Hashed n-gram (offline)".to_string(),
        provider: "hash".to_string(),
        dimension: 384,
        endpoint: None,
    }]
}

impl AppConfig {
    /// Create a config rooted at `data_dir` with defaults everywhere else.
    pub fn with_data_dir(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            engine: EngineConfig::default(),
            embed_batch_size: default_embed_batch_size(),
            models: default_models(),
            log_level: None,
        }
    }

    /// Load configuration from a YAML file, or defaults if it is absent.
    pub fn load(data_dir: &Path) -> AppResult<Self> {
        let config_path = data_dir.join("ragmill.yaml");

        if !config_path.exists() {
            tracing::debug!("No config file at {:?}, using defaults", config_path);
            return Ok(Self::with_data_dir(data_dir));
        }

        let content = std::fs::read_to_string(&config_path)?;
        let mut config: AppConfig = serde_yaml::from_str(&content).map_err(|e| {
            AppError::Config(format!("Failed to parse {:?}: {}", config_path, e))
        })?;
        config.data_dir = data_dir.to_path_buf();
        config.validate()?;

        tracing::debug!("Loaded config from {:?}", config_path);
        Ok(config)
    }

    /// Save configuration to `ragmill.yaml` under the data directory.
    pub fn save(&self) -> AppResult<()> {
        std::fs::create_dir_all(&self.data_dir)?;
        let config_path = self.data_dir.join("ragmill.yaml");
        let yaml = serde_yaml::to_string(self)?;
        std::fs::write(&config_path, yaml)?;
        Ok(())
    }

    /// Look up a registered model by id.
    pub fn model(&self, model_id: &str) -> Option<&ModelConfig> {
        self.models.iter().find(|m| m.id == model_id)
    }

    fn validate(&self) -> AppResult<()> {
        if !(5..=50).contains(&self.embed_batch_size) {
            return Err(AppError::Config(format!(
                "embed_batch_size must be between 5 and 50, got {}",
                self.embed_batch_size
            )));
        }
        for model in &self.models {
            if model.dimension == 0 {
                return Err(AppError::Config(format!(
                    "Model '{}' has zero dimension",
                    model.id
                )));
            }
        }
        Ok(())
    }
}
