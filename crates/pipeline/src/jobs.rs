//! Chunking job records and the job store.
//!
//! The per-project job record is the one resource mutated by multiple
//! logical writers (progress events, completion, explicit stop). The
//! store serializes writes through a per-file async mutex — at most one
//! in-flight write per record — and replaces the file atomically
//! (temporary path, then rename) so readers never observe a partial
//! record.

use crate::event::ChunkProgress;
use chrono::{DateTime, Utc};
use ragmill_core::AppResult;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// How long a terminal job record survives before automatic deletion,
/// giving a slow observer time to read the final status.
pub const TERMINAL_GRACE: Duration = Duration::from_secs(30);

/// Lifecycle state of a chunking job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum JobStatus {
    InProgress,
    Completed,
    Failed,
    Stopped,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        self != JobStatus::InProgress
    }
}

/// Parameters forwarded to the chunking engine as positional arguments.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkingConfig {
    /// Maximum tokens per chunk
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,

    /// Merge consecutive chunks sharing the same headings
    #[serde(default = "default_true")]
    pub merge_peers: bool,

    /// Extract LaTeX from equations
    #[serde(default = "default_true")]
    pub formula_enrichment: bool,

    /// Classify images (charts, diagrams, …)
    #[serde(default)]
    pub picture_classification: bool,

    /// Generate image captions with a vision model
    #[serde(default)]
    pub picture_description: bool,

    /// Extract and format code blocks
    #[serde(default)]
    pub code_enrichment: bool,

    /// Text recognition for scanned documents
    #[serde(default = "default_true")]
    pub ocr: bool,

    /// Preserve table layouts
    #[serde(default = "default_true")]
    pub table_structure: bool,

    /// Token cap for generated picture descriptions
    #[serde(default = "default_picture_description_max_tokens")]
    pub picture_description_max_tokens: u32,

    /// Vision-model batch size
    #[serde(default = "default_vision_batch_size")]
    pub vision_batch_size: u32,

    /// Pages per part for large documents; the engine splits and saves
    /// parts itself, the orchestrator only forwards progress about them
    #[serde(default = "default_doc_batch_size")]
    pub doc_batch_size: u32,
}

fn default_max_tokens() -> u32 {
    512
}
fn default_true() -> bool {
    true
}
fn default_picture_description_max_tokens() -> u32 {
    200
}
fn default_vision_batch_size() -> u32 {
    8
}
fn default_doc_batch_size() -> u32 {
    100
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            max_tokens: default_max_tokens(),
            merge_peers: true,
            formula_enrichment: true,
            picture_classification: false,
            picture_description: false,
            code_enrichment: false,
            ocr: true,
            table_structure: true,
            picture_description_max_tokens: default_picture_description_max_tokens(),
            vision_batch_size: default_vision_batch_size(),
            doc_batch_size: default_doc_batch_size(),
        }
    }
}

impl ChunkingConfig {
    /// Render the engine's positional argument list, in its fixed order.
    pub fn to_args(&self, input_dir: &Path, output_file: &Path, resume: bool) -> Vec<String> {
        fn flag(value: bool) -> String {
            if value { "true" } else { "false" }.to_string()
        }

        vec![
            input_dir.to_string_lossy().into_owned(),
            output_file.to_string_lossy().into_owned(),
            self.max_tokens.to_string(),
            flag(self.merge_peers),
            flag(self.formula_enrichment),
            flag(self.picture_classification),
            flag(self.picture_description),
            flag(self.code_enrichment),
            flag(self.ocr),
            flag(self.table_structure),
            self.picture_description_max_tokens.to_string(),
            flag(resume),
            self.vision_batch_size.to_string(),
            self.doc_batch_size.to_string(),
        ]
    }
}

/// Ephemeral per-project chunking job record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkingJob {
    pub job_id: String,
    pub status: JobStatus,

    /// Chunking method identifier (engine-reported)
    pub method: String,

    pub config: ChunkingConfig,

    /// Latest persisted milestone
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub progress: Option<ChunkProgress>,

    /// Engine process-group id, set once the engine is spawned. Outlives
    /// the orchestrator that spawned it: stop requests from other
    /// processes read it off the record.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pid: Option<u32>,

    /// Whether this run continued from a checkpoint
    pub resumed: bool,

    pub started_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,

    /// Captured diagnostic text after a failure
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ChunkingJob {
    pub fn new(job_id: String, config: ChunkingConfig, resumed: bool) -> Self {
        let now = Utc::now();
        Self {
            job_id,
            status: JobStatus::InProgress,
            method: "docling-hybrid".to_string(),
            config,
            progress: None,
            pid: None,
            resumed,
            started_at: now,
            updated_at: now,

            error: None,
        }
    }
}

/// File-backed job record store with serialized, atomic writes.
pub struct JobStore {
    locks: Mutex<HashMap<PathBuf, Arc<tokio::sync::Mutex<()>>>>,
}

impl Default for JobStore {
    fn default() -> Self {
        Self::new()
    }
}

impl JobStore {
    pub fn new() -> Self {
        Self {
            locks: Mutex::new(HashMap::new()),
        }
    }

    fn lock_for(&self, path: &Path) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.locks.lock().unwrap();
        Arc::clone(locks.entry(path.to_path_buf()).or_default())
    }

    /// Read a job record; `None` if the file does not exist.
    pub async fn read(&self, path: &Path) -> AppResult<Option<ChunkingJob>> {
        if !path.exists() {
            return Ok(None);
        }
        let content = tokio::fs::read(path).await?;
        Ok(Some(serde_json::from_slice(&content)?))
    }

    /// Write a record atomically under the per-file lock.
    pub async fn write(&self, path: &Path, job: &ChunkingJob) -> AppResult<()> {
        let lock = self.lock_for(path);
        let _guard = lock.lock().await;
        self.write_locked(path, job).await
    }

    async fn write_locked(&self, path: &Path, job: &ChunkingJob) -> AppResult<()> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, serde_json::to_vec_pretty(job)?).await?;
        tokio::fs::rename(&tmp, path).await?;
        Ok(())
    }

    /// Read-modify-write under the per-file lock.
    ///
    /// If the file exists but cannot be parsed, a minimal valid record is
    /// reconstructed via `fallback` and the update applied to that — the
    /// repair is logged, never surfaced as an error.
    pub async fn update<F, G>(&self, path: &Path, fallback: G, apply: F) -> AppResult<ChunkingJob>
    where
        F: FnOnce(&mut ChunkingJob),
        G: FnOnce() -> ChunkingJob,
    {
        let lock = self.lock_for(path);
        let _guard = lock.lock().await;

        let mut job = match tokio::fs::read(path).await {
            Ok(content) => match serde_json::from_slice::<ChunkingJob>(&content) {
                Ok(job) => job,
                Err(e) => {
                    tracing::warn!(
                        "Job record {:?} is corrupted ({}), reconstructing a minimal record",
                        path,
                        e
                    );
                    fallback()
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => fallback(),
            Err(e) => return Err(e.into()),
        };

        apply(&mut job);
        job.updated_at = Utc::now();
        self.write_locked(path, &job).await?;
        Ok(job)
    }

    /// Persist a milestone progress event onto the record. Transient
    /// events (heartbeats and non-milestone statuses) are ignored here;
    /// they still flow through the progress channel.
    pub async fn record_progress<G>(
        &self,
        path: &Path,
        fallback: G,
        progress: &ChunkProgress,
    ) -> AppResult<bool>
    where
        G: FnOnce() -> ChunkingJob,
    {
        if !progress.is_persistent() {
            return Ok(false);
        }
        let progress = progress.clone();
        self.update(path, fallback, move |job| {
            job.progress = Some(progress);
        })
        .await?;
        Ok(true)
    }

    /// Delete a record if present.
    pub async fn delete(&self, path: &Path) -> AppResult<()> {
        let lock = self.lock_for(path);
        let _guard = lock.lock().await;
        match tokio::fs::remove_file(path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Schedule deletion of a terminal record after the grace period.
    /// The record is only removed if it is still terminal at that time —
    /// a new run may have replaced it meanwhile.
    pub fn schedule_cleanup(self: &Arc<Self>, path: PathBuf, grace: Duration) {
        let store = Arc::clone(self);
        tokio::spawn(async move {
            tokio::time::sleep(grace).await;
            match store.read(&path).await {
                Ok(Some(job)) if job.status.is_terminal() => {
                    tracing::debug!("Clearing terminal job record {:?}", path);
                    let _ = store.delete(&path).await;
                }
                _ => {}
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{ChunkProgress, ChunkStatus};
    use tempfile::TempDir;

    fn fallback_job() -> ChunkingJob {
        ChunkingJob::new("job-1".to_string(), ChunkingConfig::default(), false)
    }

    fn progress(status: ChunkStatus, heartbeat: bool) -> ChunkProgress {
        ChunkProgress {
            status,
            file: Some("a.pdf".to_string()),
            current: Some(1),
            total: Some(1),
            total_pages: None,
            chunks_so_far: None,
            chunks: Some(5),
            elapsed: None,
            estimated_total: None,
            remaining: None,
            percent: None,
            heartbeat,
            error: None,
        }
    }

    #[test]
    fn test_engine_args_order_and_rendering() {
        let config = ChunkingConfig::default();
        let args = config.to_args(Path::new("/in"), Path::new("/out.json"), true);

        assert_eq!(args.len(), 14);
        assert_eq!(args[0], "/in");
        assert_eq!(args[1], "/out.json");
        assert_eq!(args[2], "512");
        assert_eq!(args[3], "true"); // merge_peers
        assert_eq!(args[5], "false"); // picture_classification
        assert_eq!(args[10], "200"); // picture description token cap
        assert_eq!(args[11], "true"); // resume
        assert_eq!(args[13], "100"); // doc batch size
    }

    #[tokio::test]
    async fn test_write_read_roundtrip() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("chunking_job.json");
        let store = JobStore::new();

        let job = fallback_job();
        store.write(&path, &job).await.unwrap();

        let loaded = store.read(&path).await.unwrap().unwrap();
        assert_eq!(loaded.job_id, "job-1");
        assert_eq!(loaded.status, JobStatus::InProgress);
        assert!(!loaded.status.is_terminal());
    }

    #[tokio::test]
    async fn test_read_absent_record_is_none() {
        let temp = TempDir::new().unwrap();
        let store = JobStore::new();
        let result = store.read(&temp.path().join("missing.json")).await.unwrap();
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn test_heartbeats_are_not_persisted() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("chunking_job.json");
        let store = JobStore::new();
        store.write(&path, &fallback_job()).await.unwrap();

        // Many heartbeats and one milestone: exactly one snapshot lands
        // on the record.
        for _ in 0..5 {
            let wrote = store
                .record_progress(&path, fallback_job, &progress(ChunkStatus::Converting, true))
                .await
                .unwrap();
            assert!(!wrote);
        }
        let wrote = store
            .record_progress(&path, fallback_job, &progress(ChunkStatus::Chunked, false))
            .await
            .unwrap();
        assert!(wrote);

        let job = store.read(&path).await.unwrap().unwrap();
        let persisted = job.progress.unwrap();
        assert_eq!(persisted.status, ChunkStatus::Chunked);
        assert_eq!(persisted.chunks, Some(5));
    }

    #[tokio::test]
    async fn test_corrupted_record_is_reconstructed() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("chunking_job.json");
        tokio::fs::write(&path, b"{ this is not json").await.unwrap();

        let store = JobStore::new();
        let job = store
            .update(&path, fallback_job, |job| {
                job.status = JobStatus::Failed;
                job.error = Some("engine crashed".to_string());
            })
            .await
            .unwrap();

        assert_eq!(job.status, JobStatus::Failed);
        // The repaired record is now readable again.
        let reloaded = store.read(&path).await.unwrap().unwrap();
        assert_eq!(reloaded.error.as_deref(), Some("engine crashed"));
    }

    #[tokio::test]
    async fn test_atomic_replace_leaves_no_tmp_file() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("chunking_job.json");
        let store = JobStore::new();
        store.write(&path, &fallback_job()).await.unwrap();
        store.write(&path, &fallback_job()).await.unwrap();

        assert!(!path.with_extension("json.tmp").exists());
    }

    #[tokio::test(start_paused = true)]
    async fn test_terminal_record_cleared_after_grace() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("chunking_job.json");
        let store = Arc::new(JobStore::new());

        let mut job = fallback_job();
        job.status = JobStatus::Completed;
        store.write(&path, &job).await.unwrap();

        store.schedule_cleanup(path.clone(), TERMINAL_GRACE);
        // Let the cleanup task's timer fire, then wait for the deletion
        // itself to land.
        for _ in 0..50 {
            tokio::time::sleep(Duration::from_secs(1)).await;
            if store.read(&path).await.unwrap().is_none() {
                return;
            }
        }
        panic!("terminal job record was not cleared");
    }

    #[tokio::test(start_paused = true)]
    async fn test_in_progress_record_survives_cleanup() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("chunking_job.json");
        let store = Arc::new(JobStore::new());
        store.write(&path, &fallback_job()).await.unwrap();

        store.schedule_cleanup(path.clone(), TERMINAL_GRACE);
        tokio::time::sleep(TERMINAL_GRACE + Duration::from_secs(5)).await;
        tokio::task::yield_now().await;

        // A non-terminal record (e.g. a new run reused the path) stays.
        assert!(store.read(&path).await.unwrap().is_some());
    }
}
