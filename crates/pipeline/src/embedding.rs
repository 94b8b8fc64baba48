//! Embedding orchestrator: chunk set in, persisted index run out.
//!
//! Runs in-process as a tokio task, unlike chunking which supervises an
//! external engine. Each run embeds the project's chunk set batch by
//! batch, publishes per-batch progress with a running speed estimate,
//! and finishes by persisting the three index artifacts in a fresh run
//! directory. Cancellation is cooperative: the token is checked between
//! batches, so a cancelled run stops without leaving a partial run
//! directory behind.

use crate::channel::ProgressChannel;
use crate::chunking::ChunkSet;
use crate::event::{EmbedProgress, PipelineEvent};
use chrono::Utc;
use ragmill_core::{paths, AppConfig, AppError, AppResult};
use ragmill_embeddings::ProviderRegistry;
use ragmill_retrieval::dense::DenseIndex;
use ragmill_retrieval::store::{self, DocumentRecord, IndexConfig};
use ragmill_retrieval::IndexManager;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Handle on a running embedding job.
#[derive(Debug, Clone)]
pub struct EmbeddingHandle {
    pub job_id: String,
    pub model_id: String,
    token: CancellationToken,
}

/// Runs embedding jobs, one per project at a time.
pub struct EmbeddingOrchestrator {
    config: AppConfig,
    registry: Arc<ProviderRegistry>,
    manager: Arc<IndexManager>,
    channel: Arc<ProgressChannel>,
    active: Mutex<HashMap<String, EmbeddingHandle>>,
}

impl EmbeddingOrchestrator {
    pub fn new(
        config: AppConfig,
        registry: Arc<ProviderRegistry>,
        manager: Arc<IndexManager>,
        channel: Arc<ProgressChannel>,
    ) -> Self {
        Self {
            config,
            registry,
            manager,
            channel,
            active: Mutex::new(HashMap::new()),
        }
    }

    /// Start embedding a project's chunk set with a model.
    ///
    /// Fails fast on an unknown model or a missing chunk set; a second
    /// start while a run is live joins the existing job.
    pub async fn start(
        self: &Arc<Self>,
        project_id: &str,
        model_id: &str,
    ) -> AppResult<EmbeddingHandle> {
        // Validate before spawning anything.
        self.registry.model(model_id)?;
        let chunk_set = ChunkSet::load(&self.config.data_dir, project_id).await?;
        if chunk_set.chunks.is_empty() {
            return Err(AppError::NoChunks(project_id.to_string()));
        }

        // Lookup-or-insert under one lock acquisition; concurrent starts
        // must agree on one job.
        let handle = {
            let mut active = self.active.lock().unwrap();
            if let Some(existing) = active.get(project_id) {
                tracing::info!(
                    "Embedding already running for project '{}', joining job {}",
                    project_id,
                    existing.job_id
                );
                return Ok(existing.clone());
            }
            let handle = EmbeddingHandle {
                job_id: Uuid::new_v4().to_string(),
                model_id: model_id.to_string(),
                token: CancellationToken::new(),
            };
            active.insert(project_id.to_string(), handle.clone());
            handle
        };

        tracing::info!(
            "Started embedding job {} for project '{}' with model '{}' ({} chunks)",
            handle.job_id,
            project_id,
            model_id,
            chunk_set.chunks.len()
        );

        let this = Arc::clone(self);
        let project = project_id.to_string();
        let run_handle = handle.clone();
        tokio::spawn(async move {
            let job_id = run_handle.job_id.clone();
            let outcome = this.run(&project, &run_handle, chunk_set).await;
            this.active.lock().unwrap().remove(&project);
            match outcome {
                Ok(Some((index_ref, chunk_count))) => {
                    this.channel.publish(
                        &job_id,
                        PipelineEvent::EmbeddingCompleted {
                            job_id: job_id.clone(),
                            index_ref,
                            chunk_count,
                        },
                    );
                }
                Ok(None) => {
                    tracing::info!("Embedding job {} cancelled", job_id);
                    this.channel.publish(
                        &job_id,
                        PipelineEvent::EmbeddingCancelled {
                            job_id: job_id.clone(),
                        },
                    );
                }
                Err(e) => {
                    let error = e.to_string();
                    tracing::error!("Embedding job {} failed: {}", job_id, error);
                    this.channel.publish(
                        &job_id,
                        PipelineEvent::EmbeddingFailed {
                            job_id: job_id.clone(),
                            error,
                        },
                    );
                }
            }
        });

        Ok(handle)
    }

    /// The embedding loop. `Ok(None)` means the run was cancelled.
    async fn run(
        &self,
        project_id: &str,
        handle: &EmbeddingHandle,
        chunk_set: ChunkSet,
    ) -> AppResult<Option<(String, usize)>> {
        let model = self.registry.model(&handle.model_id)?.clone();
        let provider = self.registry.provider(&handle.model_id)?;

        let total = chunk_set.chunks.len();
        let batch_size = self.config.embed_batch_size;
        let total_batches = total.div_ceil(batch_size);

        let mut index = DenseIndex::with_capacity(model.dimension, total);
        let mut documents = Vec::with_capacity(total);
        let started = Instant::now();

        for (batch_idx, batch) in chunk_set.chunks.chunks(batch_size).enumerate() {
            if handle.token.is_cancelled() {
                return Ok(None);
            }

            let texts: Vec<String> = batch.iter().map(|c| c.text.clone()).collect();
            let embeddings = provider.embed_batch(&texts).await?;
            if embeddings.len() != batch.len() {
                return Err(AppError::Embedding(format!(
                    "Provider returned {} embeddings for a batch of {}",
                    embeddings.len(),
                    batch.len()
                )));
            }

            for (chunk, embedding) in batch.iter().zip(embeddings.iter()) {
                if embedding.len() != model.dimension {
                    return Err(AppError::Embedding(format!(
                        "Model '{}' returned dimension {} (expected {})",
                        model.id,
                        embedding.len(),
                        model.dimension
                    )));
                }
                let id = index.add(embedding)?;
                documents.push(DocumentRecord {
                    id,
                    text: chunk.text.clone(),
                    metadata: chunk.metadata.clone(),
                    tokens: chunk.tokens,
                });
            }

            let processed = documents.len();
            let elapsed = started.elapsed().as_secs_f64().max(1e-6);
            let chunks_per_sec = processed as f64 / elapsed;
            let progress = EmbedProgress {
                processed,
                total,
                batch: batch_idx + 1,
                total_batches,
                chunks_per_sec,
                avg_secs_per_chunk: elapsed / processed as f64,
                eta_secs: (total - processed) as f64 / chunks_per_sec,
            };
            tracing::debug!(
                "Embedding job {}: batch {}/{} ({}/{} chunks, {:.1}/s)",
                handle.job_id,
                progress.batch,
                total_batches,
                processed,
                total,
                chunks_per_sec
            );
            self.channel.publish(
                &handle.job_id,
                PipelineEvent::Embedding {
                    job_id: handle.job_id.clone(),
                    progress,
                },
            );
        }

        if handle.token.is_cancelled() {
            return Ok(None);
        }

        let created_at = Utc::now();
        let index_ref = store::run_name(&model.id, created_at);
        let run_dir = paths::index_run_dir(&self.config.data_dir, project_id, &index_ref);
        let index_config = IndexConfig {
            model_id: model.id.clone(),
            model_name: model.name.clone(),
            dimension: model.dimension,
            chunk_count: total,
            created_at,
        };
        store::write_run(&run_dir, &index, &documents, &index_config)?;
        self.manager.invalidate(project_id);

        tracing::info!(
            "Embedding job {} completed: index '{}' with {} points",
            handle.job_id,
            index_ref,
            total
        );
        Ok(Some((index_ref, total)))
    }

    /// Request cancellation of a project's running job. Returns false
    /// when nothing is running.
    pub fn cancel(&self, project_id: &str) -> bool {
        let active = self.active.lock().unwrap();
        match active.get(project_id) {
            Some(handle) => {
                tracing::info!(
                    "Cancelling embedding job {} for project '{}'",
                    handle.job_id,
                    project_id
                );
                handle.token.cancel();
                true
            }
            None => false,
        }
    }

    /// Handle of the running job for a project, if any.
    pub fn status(&self, project_id: &str) -> Option<EmbeddingHandle> {
        self.active.lock().unwrap().get(project_id).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunking::ChunkRecord;
    use ragmill_core::ModelConfig;
    use std::path::Path;
    use std::time::Duration;
    use tempfile::TempDir;

    fn test_config(data_dir: &Path) -> AppConfig {
        AppConfig::with_data_dir(data_dir)
    }

    fn test_models() -> Vec<ModelConfig> {
        vec![ModelConfig {
            id: "hash-384".to_string(),
            name: "Hashed n-gram (offline)".to_string(),
            provider: "hash".to_string(),
            dimension: 384,
            endpoint: None,
        }]
    }

    fn orchestrator(data_dir: &Path) -> Arc<EmbeddingOrchestrator> {
        Arc::new(EmbeddingOrchestrator::new(
            test_config(data_dir),
            Arc::new(ProviderRegistry::new(test_models())),
            Arc::new(IndexManager::new(data_dir)),
            Arc::new(ProgressChannel::new()),
        ))
    }

    async fn write_chunks(data_dir: &Path, project_id: &str, count: usize) {
        let set = ChunkSet {
            method: "docling-hybrid".to_string(),
            config: serde_json::json!({}),
            processed_files: vec!["a.pdf".to_string()],
            chunks: (0..count)
                .map(|i| ChunkRecord {
                    text: format!("chunk number {} with some body text", i),
                    metadata: serde_json::json!({"source": "a.pdf"}),
                    tokens: 8,
                })
                .collect(),
            stats: serde_json::json!({}),
        };
        let path = paths::chunks_file(data_dir, project_id);
        tokio::fs::create_dir_all(path.parent().unwrap())
            .await
            .unwrap();
        tokio::fs::write(&path, serde_json::to_vec(&set).unwrap())
            .await
            .unwrap();
    }

    async fn wait_for_runs(data_dir: &Path, project_id: &str) -> Vec<String> {
        let indexes = paths::indexes_dir(data_dir, project_id);
        for _ in 0..200 {
            if let Ok(mut read_dir) = tokio::fs::read_dir(&indexes).await {
                let mut runs = Vec::new();
                while let Ok(Some(entry)) = read_dir.next_entry().await {
                    runs.push(entry.file_name().to_string_lossy().into_owned());
                }
                if !runs.is_empty() {
                    return runs;
                }
            }
            tokio::time::sleep(Duration::from_millis(25)).await;
        }
        Vec::new()
    }

    #[tokio::test]
    async fn test_unknown_model_fails_fast() {
        let temp = TempDir::new().unwrap();
        let orch = orchestrator(temp.path());
        write_chunks(temp.path(), "p1", 3).await;

        let err = orch.start("p1", "no-such-model").await.unwrap_err();
        assert!(matches!(err, AppError::UnknownModel(_)));
    }

    #[tokio::test]
    async fn test_missing_chunk_set_fails_fast() {
        let temp = TempDir::new().unwrap();
        let orch = orchestrator(temp.path());

        let err = orch.start("p1", "hash-384").await.unwrap_err();
        assert!(matches!(err, AppError::NoChunks(_)));
    }

    #[tokio::test]
    async fn test_run_persists_index_artifacts() {
        let temp = TempDir::new().unwrap();
        let orch = orchestrator(temp.path());
        write_chunks(temp.path(), "p1", 40).await;

        let handle = orch.start("p1", "hash-384").await.unwrap();
        let runs = wait_for_runs(temp.path(), "p1").await;
        assert_eq!(runs.len(), 1);
        assert!(runs[0].starts_with("hash-384-"), "run: {}", runs[0]);

        let run_dir = paths::index_run_dir(temp.path(), "p1", &runs[0]);
        let loaded = store::load_run(&run_dir).unwrap();
        assert_eq!(loaded.index.len(), 40);
        assert_eq!(loaded.documents.len(), 40);
        assert_eq!(loaded.config.model_id, "hash-384");
        assert_eq!(loaded.config.dimension, 384);
        assert_eq!(loaded.documents[7].id, 7);
        assert!(!handle.job_id.is_empty());
    }

    /// Provider that blocks on a semaphore, keeping a run alive until
    /// the test releases it.
    #[derive(Debug)]
    struct GatedProvider {
        gate: Arc<tokio::sync::Semaphore>,
        dimension: usize,
    }

    #[async_trait::async_trait]
    impl ragmill_embeddings::EmbeddingProvider for GatedProvider {
        fn provider_name(&self) -> &str {
            "gated"
        }

        fn model_name(&self) -> &str {
            "gated"
        }

        fn dimension(&self) -> usize {
            self.dimension
        }

        async fn embed_batch(&self, texts: &[String]) -> AppResult<Vec<Vec<f32>>> {
            let permit = self
                .gate
                .acquire()
                .await
                .map_err(|e| AppError::Embedding(e.to_string()))?;
            permit.forget();
            Ok(texts
                .iter()
                .map(|_| {
                    let mut vector = vec![0.0; self.dimension];
                    vector[0] = 1.0;
                    vector
                })
                .collect())
        }
    }

    fn gated_orchestrator(
        data_dir: &Path,
        gate: Arc<tokio::sync::Semaphore>,
    ) -> Arc<EmbeddingOrchestrator> {
        let model = ModelConfig {
            id: "gated-8".to_string(),
            name: "Gated".to_string(),
            provider: "gated".to_string(),
            dimension: 8,
            endpoint: None,
        };
        let mut registry = ProviderRegistry::new(Vec::new());
        registry.register(
            model,
            Arc::new(GatedProvider { gate, dimension: 8 }),
        );
        Arc::new(EmbeddingOrchestrator::new(
            test_config(data_dir),
            Arc::new(registry),
            Arc::new(IndexManager::new(data_dir)),
            Arc::new(ProgressChannel::new()),
        ))
    }

    #[tokio::test]
    async fn test_duplicate_start_joins_existing_job() {
        let temp = TempDir::new().unwrap();
        // Zero permits: the run blocks on its first batch until released,
        // so the second start always finds it live.
        let gate = Arc::new(tokio::sync::Semaphore::new(0));
        let orch = gated_orchestrator(temp.path(), Arc::clone(&gate));
        write_chunks(temp.path(), "p1", 40).await;

        let (first, second) = tokio::join!(
            orch.start("p1", "gated-8"),
            orch.start("p1", "gated-8")
        );
        let first = first.unwrap();
        let second = second.unwrap();
        assert_eq!(first.job_id, second.job_id);

        gate.add_permits(1000);
        let runs = wait_for_runs(temp.path(), "p1").await;
        // Exactly one index run for the joined job.
        assert_eq!(runs.len(), 1);
    }

    #[tokio::test]
    async fn test_cancelled_run_leaves_no_run_directory() {
        let temp = TempDir::new().unwrap();
        let orch = orchestrator(temp.path());
        write_chunks(temp.path(), "p1", 2000).await;

        let channel = Arc::new(ProgressChannel::new());
        let orch = Arc::new(EmbeddingOrchestrator::new(
            test_config(temp.path()),
            Arc::new(ProviderRegistry::new(test_models())),
            Arc::new(IndexManager::new(temp.path())),
            Arc::clone(&channel),
        ));

        let handle = orch.start("p1", "hash-384").await.unwrap();
        let (_, mut rx) = channel.subscribe(&handle.job_id);
        assert!(orch.cancel("p1"));

        // Drain events until the run settles.
        let mut cancelled = false;
        for _ in 0..400 {
            match rx.try_recv() {
                Ok(PipelineEvent::EmbeddingCancelled { .. }) => {
                    cancelled = true;
                    break;
                }
                Ok(PipelineEvent::EmbeddingCompleted { .. }) => break,
                Ok(_) => {}
                Err(_) => tokio::time::sleep(Duration::from_millis(10)).await,
            }
        }

        if cancelled {
            let indexes = paths::indexes_dir(temp.path(), "p1");
            assert!(!indexes.exists() || std::fs::read_dir(&indexes).unwrap().next().is_none());
        }
    }
}
