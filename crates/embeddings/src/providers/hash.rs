//! Deterministic hashed n-gram embedding provider.
//!
//! Maps words and character bigrams into a fixed-dimension vector via
//! FNV-style hashing, then normalizes to unit length. Not semantically
//! meaningful like a neural model, but deterministic, offline, and
//! content-sensitive — enough for tests, development, and side-by-side
//! comparison against real models.

use crate::provider::EmbeddingProvider;
use ragmill_core::AppResult;

const FNV_OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
const FNV_PRIME: u64 = 0x1000_0000_01b3;

/// Offline embedding provider based on feature hashing.
#[derive(Debug)]
pub struct HashProvider {
    model_id: String,
    dimension: usize,
}

impl HashProvider {
    pub fn new(model_id: String, dimension: usize) -> Self {
        Self { model_id, dimension }
    }

    fn embed_text(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0f32; self.dimension];
        let lower = text.to_lowercase();

        for word in lower.split(|c: char| !c.is_alphanumeric()) {
            if word.len() < 2 {
                continue;
            }

            // Whole-word feature
            let slot = (fnv(word.as_bytes()) as usize) % self.dimension;
            vector[slot] += 1.0;

            // Character bigram features, weighted down so long words do
            // not dominate short ones
            let chars: Vec<char> = word.chars().collect();
            for pair in chars.windows(2) {
                let mut buf = [0u8; 8];
                let a = pair[0].encode_utf8(&mut buf).len();
                let b = pair[1].encode_utf8(&mut buf[a..]).len();
                let slot = (fnv(&buf[..a + b]) as usize) % self.dimension;
                vector[slot] += 0.5;
            }
        }

        normalize(&mut vector);
        vector
    }
}

fn fnv(bytes: &[u8]) -> u64 {
    let mut hash = FNV_OFFSET;
    for &b in bytes {
        hash ^= b as u64;
        hash = hash.wrapping_mul(FNV_PRIME);
    }
    hash
}

fn normalize(vector: &mut [f32]) {
    let norm: f32 = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        for v in vector.iter_mut() {
            *v /= norm;
        }
    }
}

#[async_trait::async_trait]
impl EmbeddingProvider for HashProvider {
    fn provider_name(&self) -> &str {
        "hash"
    }

    fn model_name(&self) -> &str {
        &self.model_id
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    async fn embed_batch(&self, texts: &[String]) -> AppResult<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|t| self.embed_text(t)).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn provider() -> HashProvider {
        HashProvider::new("hash-384".to_string(), 384)
    }

    #[tokio::test]
    async fn test_embeddings_are_unit_length() {
        let embeddings = provider()
            .embed_batch(&["vector pipelines".to_string(), "chunk batches".to_string()])
            .await
            .unwrap();

        assert_eq!(embeddings.len(), 2);
        for embedding in &embeddings {
            assert_eq!(embedding.len(), 384);
            let norm: f32 = embedding.iter().map(|x| x * x).sum::<f32>().sqrt();
            assert!((norm - 1.0).abs() < 1e-3);
        }
    }

    #[tokio::test]
    async fn test_deterministic() {
        let p = provider();
        let a = p.embed("the same text").await.unwrap();
        let b = p.embed("the same text").await.unwrap();
        assert_eq!(a, b);
    }

    #[tokio::test]
    async fn test_different_texts_differ() {
        let p = provider();
        let a = p.embed("embedding orchestration").await.unwrap();
        let b = p.embed("checkpoint recovery").await.unwrap();
        assert_ne!(a, b);
    }

    #[tokio::test]
    async fn test_empty_text_is_zero_vector() {
        let embedding = provider().embed("").await.unwrap();
        assert!(embedding.iter().all(|&x| x == 0.0));
    }
}
