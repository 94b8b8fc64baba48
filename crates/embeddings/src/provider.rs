//! Embedding provider trait and factory.

use ragmill_core::{AppError, AppResult, ModelConfig};
use std::sync::Arc;

/// Trait for embedding providers.
///
/// Providers are batch-first: the orchestrator calls `embed_batch` once
/// per batch of chunks, never once per chunk, so that fixed per-call
/// overhead is amortized. Returned vectors are normalized to unit length
/// and always have exactly `dimension()` components.
#[async_trait::async_trait]
pub trait EmbeddingProvider: Send + Sync + std::fmt::Debug {
    /// Provider kind (e.g. "hash", "ollama")
    fn provider_name(&self) -> &str;

    /// Model identifier
    fn model_name(&self) -> &str;

    /// Fixed embedding dimension
    fn dimension(&self) -> usize;

    /// Generate one embedding per input text.
    async fn embed_batch(&self, texts: &[String]) -> AppResult<Vec<Vec<f32>>>;

    /// Generate an embedding for a single text (query-time convenience).
    async fn embed(&self, text: &str) -> AppResult<Vec<f32>> {
        let mut results = self.embed_batch(std::slice::from_ref(&text.to_string())).await?;
        results
            .pop()
            .ok_or_else(|| AppError::Embedding("Provider returned no embedding".to_string()))
    }
}

/// Create an embedding provider for a registered model.
pub fn create_provider(model: &ModelConfig) -> AppResult<Arc<dyn EmbeddingProvider>> {
    match model.provider.as_str() {
        "hash" => Ok(Arc::new(super::providers::hash::HashProvider::new(
            model.id.clone(),
            model.dimension,
        ))),

        "ollama" => Ok(Arc::new(super::providers::ollama::OllamaProvider::new(
            model.name.clone(),
            model.dimension,
            model.endpoint.as_deref(),
        )?)),

        other => Err(AppError::Config(format!(
            "Unknown embedding provider kind '{}' for model '{}'. Supported: hash, ollama",
            other, model.id
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ragmill_core::ModelConfig;

    fn hash_model() -> ModelConfig {
        ModelConfig {
            id: "hash-384".to_string(),
            name: "Hashed n-gram".to_string(),
            provider: "hash".to_string(),
            dimension: 384,
            endpoint: None,
        }
    }

    #[test]
    fn test_create_hash_provider() {
        let provider = create_provider(&hash_model()).unwrap();
        assert_eq!(provider.provider_name(), "hash");
        assert_eq!(provider.dimension(), 384);
    }

    #[test]
    fn test_create_unknown_provider_kind() {
        let mut model = hash_model();
        model.provider = "quantum".to_string();
        let result = create_provider(&model);
        assert!(result.is_err());
        assert!(result
            .unwrap_err()
            .to_string()
            .contains("Unknown embedding provider kind"));
    }

    #[tokio::test]
    async fn test_single_embed_delegates_to_batch() {
        let provider = create_provider(&hash_model()).unwrap();
        let embedding = provider.embed("pipeline orchestration").await.unwrap();
        assert_eq!(embedding.len(), 384);
    }
}
