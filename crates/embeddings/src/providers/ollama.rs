//! Ollama embedding provider.
//!
//! Talks to a local Ollama daemon over its batch embedding API
//! (`/api/embed` accepts an array of inputs and returns one vector per
//! input). Vectors are normalized on the way out so downstream cosine
//! math can rely on unit length.

use crate::provider::EmbeddingProvider;
use ragmill_core::{AppError, AppResult};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;

const DEFAULT_ENDPOINT: &str = "http://localhost:11434";
const EMBED_PATH: &str = "/api/embed";
const REQUEST_TIMEOUT_SECS: u64 = 120;

/// Embedding provider backed by a local Ollama instance.
#[derive(Debug)]
pub struct OllamaProvider {
    client: Client,
    endpoint: String,
    model: String,
    dimension: usize,
}

#[derive(Debug, Serialize)]
struct EmbedRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Debug, Deserialize)]
struct EmbedResponse {
    embeddings: Vec<Vec<f32>>,
}

#[derive(Debug, Deserialize)]
struct ErrorResponse {
    error: String,
}

impl OllamaProvider {
    pub fn new(model: String, dimension: usize, endpoint: Option<&str>) -> AppResult<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .map_err(|e| AppError::Http(format!("Failed to build HTTP client: {}", e)))?;

        let endpoint = endpoint
            .map(str::to_string)
            .or_else(|| std::env::var("OLLAMA_URL").ok())
            .unwrap_or_else(|| DEFAULT_ENDPOINT.to_string());

        Ok(Self {
            client,
            endpoint,
            model,
            dimension,
        })
    }
}

#[async_trait::async_trait]
impl EmbeddingProvider for OllamaProvider {
    fn provider_name(&self) -> &str {
        "ollama"
    }

    fn model_name(&self) -> &str {
        &self.model
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    async fn embed_batch(&self, texts: &[String]) -> AppResult<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let url = format!("{}{}", self.endpoint, EMBED_PATH);
        let request = EmbedRequest {
            model: &self.model,
            input: texts,
        };

        tracing::debug!("Embedding batch of {} via {}", texts.len(), url);

        let response = self
            .client
            .post(&url)
            .json(&request)
            .send()
            .await
            .map_err(|e| AppError::Http(format!("Ollama request failed: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let detail = match response.json::<ErrorResponse>().await {
                Ok(err) => err.error,
                Err(_) => status.to_string(),
            };
            return Err(AppError::Embedding(format!(
                "Ollama returned {}: {}",
                status, detail
            )));
        }

        let body: EmbedResponse = response
            .json()
            .await
            .map_err(|e| AppError::Embedding(format!("Invalid Ollama response: {}", e)))?;

        if body.embeddings.len() != texts.len() {
            return Err(AppError::Embedding(format!(
                "Ollama returned {} embeddings for {} inputs",
                body.embeddings.len(),
                texts.len()
            )));
        }

        let mut embeddings = body.embeddings;
        for embedding in &mut embeddings {
            if embedding.len() != self.dimension {
                return Err(AppError::Embedding(format!(
                    "Model '{}' returned dimension {} but {} is configured",
                    self.model,
                    embedding.len(),
                    self.dimension
                )));
            }
            let norm: f32 = embedding.iter().map(|x| x * x).sum::<f32>().sqrt();
            if norm > 0.0 {
                for v in embedding.iter_mut() {
                    *v /= norm;
                }
            }
        }

        Ok(embeddings)
    }
}
