//! Ragmill pipeline orchestration.
//!
//! The two long-running stages of the document pipeline and the plumbing
//! they share:
//! - Chunking: an external engine process, supervised and relayed
//! - Embedding: an in-process batch loop producing index runs
//! - A per-job progress channel, job records, and resume checkpoints

pub mod channel;
pub mod checkpoint;
pub mod chunking;
pub mod embedding;
pub mod event;
pub mod jobs;

pub use channel::{ObserverId, ProgressChannel};
pub use checkpoint::{check_resumable, ResumeCheck, RESUME_MAX_AGE_HOURS};
pub use chunking::{ChunkRecord, ChunkSet, ChunkingOrchestrator, StartOutcome};
pub use embedding::{EmbeddingHandle, EmbeddingOrchestrator};
pub use event::{ChunkProgress, ChunkStatus, EmbedProgress, PipelineEvent};
pub use jobs::{ChunkingConfig, ChunkingJob, JobStatus, JobStore};
