//! Typed progress events.
//!
//! `ChunkProgress` mirrors the chunking engine's newline-delimited JSON
//! objects field for field; `EmbedProgress` is produced in-process by the
//! embedding orchestrator. Both travel inside a `PipelineEvent` envelope
//! on the progress channel.

use serde::{Deserialize, Serialize};

/// Status tag on an engine progress line.
///
/// Only some statuses are milestones: those get persisted onto the job
/// record, while the rest (notably per-second heartbeats) are transient
/// UI signals. The asymmetry bounds write amplification on a job that
/// can emit many heartbeats per second.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChunkStatus {
    Initializing,
    Processing,
    Converting,
    Converted,
    Chunking,
    Chunked,
    Saved,
    Finalizing,
    Saving,
    Completed,
    Error,
}

impl ChunkStatus {
    /// Whether this status is persisted to the job record.
    pub fn is_milestone(self) -> bool {
        matches!(
            self,
            ChunkStatus::Chunked
                | ChunkStatus::Completed
                | ChunkStatus::Finalizing
                | ChunkStatus::Saving
                | ChunkStatus::Error
        )
    }
}

/// One progress object from the chunking engine's diagnostic stream.
///
/// Everything except `status` is optional: statuses carry different
/// field subsets, and unknown fields are ignored.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkProgress {
    pub status: ChunkStatus,

    /// File currently being processed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,

    /// Index of the current file (1-based)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current: Option<u64>,

    /// Total number of files
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total: Option<u64>,

    /// Page count of the current document, when known
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_pages: Option<u64>,

    /// Chunks produced so far for the current file
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chunks_so_far: Option<u64>,

    /// Final chunk count for a file or the whole run
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chunks: Option<u64>,

    /// Seconds elapsed in the current phase
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub elapsed: Option<u64>,

    /// Engine's estimate of total conversion seconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub estimated_total: Option<u64>,

    /// Estimated seconds remaining
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remaining: Option<u64>,

    /// Engine-reported completion percentage
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub percent: Option<f64>,

    /// Transient liveness signal; never persisted
    #[serde(default)]
    pub heartbeat: bool,

    /// Failure detail for `status = error`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ChunkProgress {
    /// Whether this event is written to the job record.
    pub fn is_persistent(&self) -> bool {
        self.status.is_milestone() && !self.heartbeat
    }
}

/// Per-batch progress from the embedding orchestrator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbedProgress {
    pub processed: usize,
    pub total: usize,
    pub batch: usize,
    pub total_batches: usize,
    /// Chunks embedded per elapsed second
    pub chunks_per_sec: f64,
    /// Average seconds spent per chunk
    pub avg_secs_per_chunk: f64,
    /// Remaining chunks divided by the running speed
    pub eta_secs: f64,
}

/// Event envelope delivered on the progress channel.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PipelineEvent {
    Chunking {
        job_id: String,
        progress: ChunkProgress,
    },
    ChunkingCompleted {
        job_id: String,
        chunk_count: u64,
    },
    ChunkingFailed {
        job_id: String,
        error: String,
    },
    ChunkingStopped {
        job_id: String,
    },
    Embedding {
        job_id: String,
        progress: EmbedProgress,
    },
    EmbeddingCompleted {
        job_id: String,
        index_ref: String,
        chunk_count: usize,
    },
    EmbeddingCancelled {
        job_id: String,
    },
    EmbeddingFailed {
        job_id: String,
        error: String,
    },
}

impl PipelineEvent {
    /// Whether this event ends its job.
    pub fn is_terminal(&self) -> bool {
        match self {
            PipelineEvent::Chunking { .. } | PipelineEvent::Embedding { .. } => false,
            _ => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_heartbeat_line() {
        let line = r#"{"type": "progress", "current": 1, "total": 3, "file": "a.pdf",
            "status": "converting", "total_pages": 120, "elapsed": 14,
            "estimated_total": 180, "remaining": 166, "percent": 7.8, "heartbeat": true}"#;
        let progress: ChunkProgress = serde_json::from_str(line).unwrap();

        assert_eq!(progress.status, ChunkStatus::Converting);
        assert!(progress.heartbeat);
        assert!(!progress.is_persistent());
        assert_eq!(progress.total_pages, Some(120));
    }

    #[test]
    fn test_parse_milestone_line() {
        let line = r#"{"type": "progress", "current": 2, "total": 3, "file": "b.pdf",
            "status": "chunked", "chunks": 41}"#;
        let progress: ChunkProgress = serde_json::from_str(line).unwrap();

        assert_eq!(progress.status, ChunkStatus::Chunked);
        assert!(progress.is_persistent());
        assert_eq!(progress.chunks, Some(41));
    }

    #[test]
    fn test_error_status_is_milestone() {
        let line = r#"{"status": "error", "file": "bad.pdf", "error": "unreadable"}"#;
        let progress: ChunkProgress = serde_json::from_str(line).unwrap();
        assert!(progress.is_persistent());
        assert_eq!(progress.error.as_deref(), Some("unreadable"));
    }

    #[test]
    fn test_info_lines_are_not_progress() {
        // The engine also prints {"info": ...} lines; without a status
        // field they must fail to parse and be treated as plain logs.
        let line = r#"{"info": "Formula enrichment enabled"}"#;
        assert!(serde_json::from_str::<ChunkProgress>(line).is_err());
    }

    #[test]
    fn test_chunking_and_saving_statuses_split_on_persistence() {
        for (status, persistent) in [
            (ChunkStatus::Initializing, false),
            (ChunkStatus::Converting, false),
            (ChunkStatus::Chunking, false),
            (ChunkStatus::Chunked, true),
            (ChunkStatus::Finalizing, true),
            (ChunkStatus::Saving, true),
            (ChunkStatus::Completed, true),
            (ChunkStatus::Error, true),
        ] {
            assert_eq!(status.is_milestone(), persistent, "{:?}", status);
        }
    }

    #[test]
    fn test_terminal_classification() {
        let progress_event = PipelineEvent::Chunking {
            job_id: "j".to_string(),
            progress: serde_json::from_str(r#"{"status": "chunking"}"#).unwrap(),
        };
        assert!(!progress_event.is_terminal());

        let done = PipelineEvent::ChunkingCompleted {
            job_id: "j".to_string(),
            chunk_count: 10,
        };
        assert!(done.is_terminal());
    }
}
