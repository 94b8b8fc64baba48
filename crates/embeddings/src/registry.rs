//! Model registry with an explicit provider cache.
//!
//! The registry is the single owner of instantiated providers, keyed by
//! model id, replacing any ambient process-wide state. Lookups of
//! unregistered models fail with `UnknownModel` before any job is
//! started.

use crate::provider::{create_provider, EmbeddingProvider};
use ragmill_core::{AppError, AppResult, ModelConfig};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

/// Registered embedding models plus a cache of live providers.
pub struct ProviderRegistry {
    models: HashMap<String, ModelConfig>,
    cache: RwLock<HashMap<String, Arc<dyn EmbeddingProvider>>>,
}

impl ProviderRegistry {
    pub fn new(models: impl IntoIterator<Item = ModelConfig>) -> Self {
        Self {
            models: models.into_iter().map(|m| (m.id.clone(), m)).collect(),
            cache: RwLock::new(HashMap::new()),
        }
    }

    /// Look up a registered model's configuration.
    pub fn model(&self, model_id: &str) -> AppResult<&ModelConfig> {
        self.models
            .get(model_id)
            .ok_or_else(|| AppError::UnknownModel(model_id.to_string()))
    }

    /// All registered model ids.
    pub fn model_ids(&self) -> Vec<String> {
        self.models.keys().cloned().collect()
    }

    /// Register a model together with a pre-built provider instance,
    /// bypassing the factory. Intended for custom providers not covered
    /// by `create_provider`.
    pub fn register(&mut self, model: ModelConfig, provider: Arc<dyn EmbeddingProvider>) {
        self.cache
            .write()
            .unwrap()
            .insert(model.id.clone(), provider);
        self.models.insert(model.id.clone(), model);
    }

    /// Get or create the provider for a model.
    pub fn provider(&self, model_id: &str) -> AppResult<Arc<dyn EmbeddingProvider>> {
        {
            let cache = self.cache.read().unwrap();
            if let Some(provider) = cache.get(model_id) {
                return Ok(Arc::clone(provider));
            }
        }

        let config = self.model(model_id)?;

        tracing::debug!(
            "Creating embedding provider: model={}, kind={}, dimension={}",
            config.id,
            config.provider,
            config.dimension
        );

        let provider = create_provider(config)?;

        let mut cache = self.cache.write().unwrap();
        cache.insert(model_id.to_string(), Arc::clone(&provider));
        Ok(provider)
    }
}

impl std::fmt::Debug for ProviderRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderRegistry")
            .field("models", &self.models.keys().collect::<Vec<_>>())
            .finish()
    }
}
