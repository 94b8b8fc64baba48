//! Retrieval engine.
//!
//! Turns raw nearest-neighbor searches into ranked, filtered document
//! selections. Two selection policies exist at different call sites and
//! both are kept, with their historically distinct defaults:
//!
//! - count-limited (comparison queries): similarity floor 0.55, top-k
//!   truncation;
//! - token-budgeted (context assembly): looser similarity floor 0.45,
//!   greedy accumulation under an estimated token budget.

use crate::manager::IndexManager;
use crate::store::DocumentRecord;
use ragmill_core::AppResult;
use ragmill_embeddings::ProviderRegistry;
use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;

/// Options for the count-limited policy.
#[derive(Debug, Clone)]
pub struct CompareOptions {
    pub top_k: usize,
    pub min_similarity: f32,
    pub min_tokens: u64,
}

impl Default for CompareOptions {
    fn default() -> Self {
        Self {
            top_k: 5,
            min_similarity: 0.55,
            min_tokens: 0,
        }
    }
}

/// Options for the token-budgeted policy.
#[derive(Debug, Clone)]
pub struct ContextOptions {
    pub limit: usize,
    pub max_tokens: usize,
    pub min_similarity: f32,
}

impl Default for ContextOptions {
    fn default() -> Self {
        Self {
            limit: 10,
            max_tokens: 3000,
            min_similarity: 0.45,
        }
    }
}

/// One selected document with its scores.
#[derive(Debug, Clone, Serialize)]
pub struct ScoredDocument {
    pub text: String,
    pub metadata: serde_json::Value,
    pub similarity: f32,
    pub distance: f32,
    pub tokens: u64,
}

/// Per-index result row for a side-by-side comparison.
#[derive(Debug, Serialize)]
pub struct IndexComparison {
    pub index_ref: String,
    pub model_id: String,
    pub documents: Vec<ScoredDocument>,
    /// Raw neighbors fetched before filtering
    pub retrieved_count: usize,
    /// Documents surviving filters and truncation
    pub selected_count: usize,
    pub avg_similarity: f32,
    pub duration_ms: u64,
    /// Set when this index failed; the other rows are unaffected
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Result of a token-budgeted context query.
#[derive(Debug, Serialize)]
pub struct ContextResult {
    pub documents: Vec<ScoredDocument>,
    pub retrieved_count: usize,
    pub selected_count: usize,
    pub total_tokens: usize,
    pub duration_ms: u64,
}

/// Estimate a text's token count as ceil(chars / 4).
///
/// A stable, cheap proxy; retrieval only needs a consistent upper-bound
/// heuristic, not tokenizer-exact counts.
pub fn estimate_tokens(text: &str) -> usize {
    text.chars().count().div_ceil(4)
}

/// Ranked, filtered document selection over one or many indices.
pub struct RetrievalEngine {
    manager: Arc<IndexManager>,
    registry: Arc<ProviderRegistry>,
}

impl RetrievalEngine {
    pub fn new(manager: Arc<IndexManager>, registry: Arc<ProviderRegistry>) -> Self {
        Self { manager, registry }
    }

    /// Count-limited query over several indices, producing one
    /// comparison row per index. A failing index degrades to an error
    /// row instead of failing the whole comparison.
    pub async fn compare(
        &self,
        project_id: &str,
        query: &str,
        index_refs: &[String],
        options: &CompareOptions,
    ) -> AppResult<Vec<IndexComparison>> {
        let mut rows = Vec::with_capacity(index_refs.len());

        for index_ref in index_refs {
            let started = Instant::now();
            match self
                .query_one(project_id, query, index_ref, options.top_k * 2)
                .await
            {
                Ok((model_id, candidates)) => {
                    let retrieved_count = candidates.len();
                    let documents = select_count_limited(candidates, options);
                    let selected_count = documents.len();
                    let avg_similarity = if documents.is_empty() {
                        0.0
                    } else {
                        documents.iter().map(|d| d.similarity).sum::<f32>()
                            / documents.len() as f32
                    };

                    rows.push(IndexComparison {
                        index_ref: index_ref.clone(),
                        model_id,
                        documents,
                        retrieved_count,
                        selected_count,
                        avg_similarity,
                        duration_ms: started.elapsed().as_millis() as u64,
                        error: None,
                    });
                }
                Err(e) => {
                    tracing::warn!("Comparison row failed for '{}': {}", index_ref, e);
                    rows.push(IndexComparison {
                        index_ref: index_ref.clone(),
                        model_id: String::new(),
                        documents: Vec::new(),
                        retrieved_count: 0,
                        selected_count: 0,
                        avg_similarity: 0.0,
                        duration_ms: started.elapsed().as_millis() as u64,
                        error: Some(e.to_string()),
                    });
                }
            }
        }

        Ok(rows)
    }

    /// Token-budgeted query over a single index, assembling a context
    /// set that fits within `max_tokens` estimated tokens.
    pub async fn context(
        &self,
        project_id: &str,
        query: &str,
        index_ref: &str,
        options: &ContextOptions,
    ) -> AppResult<ContextResult> {
        let started = Instant::now();

        // Fetch headroom beyond the document limit so filtering still
        // leaves enough candidates.
        let (_, candidates) = self
            .query_one(project_id, query, index_ref, options.limit * 3)
            .await?;
        let retrieved_count = candidates.len();

        let (documents, total_tokens) = select_token_budgeted(candidates, options);

        Ok(ContextResult {
            selected_count: documents.len(),
            documents,
            retrieved_count,
            total_tokens,
            duration_ms: started.elapsed().as_millis() as u64,
        })
    }

    /// Embed the query with the index's own model, search, and join the
    /// raw hits with their document records.
    async fn query_one(
        &self,
        project_id: &str,
        query: &str,
        index_ref: &str,
        k: usize,
    ) -> AppResult<(String, Vec<ScoredDocument>)> {
        let loaded = self.manager.load(project_id, index_ref)?;
        let provider = self.registry.provider(&loaded.config.model_id)?;
        let query_vector = provider.embed(query).await?;

        let hits = loaded.index.search(&query_vector, k)?;
        let candidates = hits
            .into_iter()
            .filter_map(|(point_id, distance)| {
                loaded
                    .documents
                    .get(point_id)
                    .map(|doc| scored(doc, distance))
            })
            .collect();

        Ok((loaded.config.model_id.clone(), candidates))
    }
}

fn scored(doc: &DocumentRecord, distance: f32) -> ScoredDocument {
    ScoredDocument {
        text: doc.text.clone(),
        metadata: doc.metadata.clone(),
        // Exact complement of the raw distance, by contract
        similarity: 1.0 - distance,
        distance,
        tokens: doc.tokens,
    }
}

/// Count-limited policy: similarity and token floors, sort by descending
/// similarity, truncate to top-k.
fn select_count_limited(
    mut candidates: Vec<ScoredDocument>,
    options: &CompareOptions,
) -> Vec<ScoredDocument> {
    candidates.retain(|d| d.similarity >= options.min_similarity && d.tokens >= options.min_tokens);
    candidates.sort_by(|a, b| {
        b.similarity
            .partial_cmp(&a.similarity)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    candidates.truncate(options.top_k);
    candidates
}

/// Token-budgeted policy: similarity floor, then greedy acceptance in
/// similarity order while the estimated token total stays within budget.
/// Selection stops at the first candidate that would overflow.
fn select_token_budgeted(
    mut candidates: Vec<ScoredDocument>,
    options: &ContextOptions,
) -> (Vec<ScoredDocument>, usize) {
    candidates.retain(|d| d.similarity >= options.min_similarity);
    candidates.sort_by(|a, b| {
        b.similarity
            .partial_cmp(&a.similarity)
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    let mut selected = Vec::new();
    let mut total_tokens = 0usize;

    for candidate in candidates {
        if selected.len() >= options.limit {
            break;
        }
        let estimate = estimate_tokens(&candidate.text);
        if total_tokens + estimate > options.max_tokens {
            break;
        }
        total_tokens += estimate;
        selected.push(candidate);
    }

    (selected, total_tokens)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc(similarity: f32, text: String, tokens: u64) -> ScoredDocument {
        ScoredDocument {
            text,
            metadata: serde_json::json!({}),
            similarity,
            distance: 1.0 - similarity,
            tokens,
        }
    }

    #[test]
    fn test_similarity_is_exact_complement_of_distance() {
        let record = DocumentRecord {
            id: 0,
            text: "t".to_string(),
            metadata: serde_json::json!({}),
            tokens: 1,
        };
        let d = scored(&record, 0.37);
        assert_eq!(d.similarity, 1.0 - 0.37);
        assert_eq!(d.distance, 0.37);
    }

    #[test]
    fn test_count_limited_drops_below_floor() {
        // Candidates 0.9/0.7/0.5/0.3 with floor 0.55 and top_k 3 leave
        // exactly [0.9, 0.7]: the floor removes two, and fewer than
        // top_k may remain.
        let candidates = vec![
            doc(0.5, "c".into(), 10),
            doc(0.9, "a".into(), 10),
            doc(0.3, "d".into(), 10),
            doc(0.7, "b".into(), 10),
        ];
        let options = CompareOptions {
            top_k: 3,
            min_similarity: 0.55,
            min_tokens: 0,
        };

        let selected = select_count_limited(candidates, &options);
        let sims: Vec<f32> = selected.iter().map(|d| d.similarity).collect();
        assert_eq!(sims, vec![0.9, 0.7]);
    }

    #[test]
    fn test_count_limited_truncates_to_top_k() {
        let candidates = vec![
            doc(0.9, "a".into(), 10),
            doc(0.8, "b".into(), 10),
            doc(0.7, "c".into(), 10),
            doc(0.6, "d".into(), 10),
        ];
        let options = CompareOptions {
            top_k: 2,
            min_similarity: 0.55,
            min_tokens: 0,
        };

        let selected = select_count_limited(candidates, &options);
        assert_eq!(selected.len(), 2);
        assert_eq!(selected[0].similarity, 0.9);
    }

    #[test]
    fn test_count_limited_min_tokens_filter() {
        let candidates = vec![doc(0.9, "a".into(), 3), doc(0.8, "b".into(), 50)];
        let options = CompareOptions {
            top_k: 5,
            min_similarity: 0.55,
            min_tokens: 10,
        };

        let selected = select_count_limited(candidates, &options);
        assert_eq!(selected.len(), 1);
        assert_eq!(selected[0].tokens, 50);
    }

    #[test]
    fn test_token_budget_stops_at_overflow() {
        // Estimated tokens 1000/1500/1000 against a 3000 budget: the
        // first two fit (2500), the third would overflow and is never
        // admitted.
        let candidates = vec![
            doc(0.9, "x".repeat(4000), 0),
            doc(0.8, "y".repeat(6000), 0),
            doc(0.7, "z".repeat(4000), 0),
        ];
        let options = ContextOptions {
            limit: 10,
            max_tokens: 3000,
            min_similarity: 0.45,
        };

        let (selected, total) = select_token_budgeted(candidates, &options);
        assert_eq!(selected.len(), 2);
        assert_eq!(total, 2500);
        assert_eq!(selected[0].similarity, 0.9);
        assert_eq!(selected[1].similarity, 0.8);
    }

    #[test]
    fn test_token_budget_respects_limit() {
        let candidates = vec![
            doc(0.9, "a".repeat(4), 0),
            doc(0.8, "b".repeat(4), 0),
            doc(0.7, "c".repeat(4), 0),
        ];
        let options = ContextOptions {
            limit: 2,
            max_tokens: 3000,
            min_similarity: 0.45,
        };

        let (selected, _) = select_token_budgeted(candidates, &options);
        assert_eq!(selected.len(), 2);
    }

    #[test]
    fn test_token_budget_uses_looser_similarity_floor() {
        let candidates = vec![doc(0.5, "a".repeat(4), 0), doc(0.4, "b".repeat(4), 0)];
        let options = ContextOptions::default();

        let (selected, _) = select_token_budgeted(candidates, &options);
        // 0.5 passes the 0.45 floor that would fail the 0.55 comparison
        // default; 0.4 fails both.
        assert_eq!(selected.len(), 1);
        assert_eq!(selected[0].similarity, 0.5);
    }

    #[test]
    fn test_estimate_tokens_rounds_up() {
        assert_eq!(estimate_tokens(""), 0);
        assert_eq!(estimate_tokens("abc"), 1);
        assert_eq!(estimate_tokens("abcd"), 1);
        assert_eq!(estimate_tokens("abcde"), 2);
        assert_eq!(estimate_tokens(&"x".repeat(4000)), 1000);
    }
}
