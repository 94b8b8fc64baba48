//! Resume checkpoints written by the chunking engine.
//!
//! The engine owns the checkpoint file: it writes one after each saved
//! part and deletes it on successful completion. The orchestrator only
//! ever reads it, to decide whether an interrupted run can be resumed.

use crate::jobs::ChunkingConfig;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Checkpoints older than this are considered stale and ignored.
pub const RESUME_MAX_AGE_HOURS: i64 = 168;

/// On-disk checkpoint shape, as the engine writes it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Checkpoint {
    /// Part files already produced by the interrupted run
    pub completed_chunks: Vec<String>,
    pub timestamp: DateTime<Utc>,
    /// Config of the interrupted run; a resume must reuse it
    pub config: ChunkingConfig,
}

/// Outcome of probing a project for a resumable run.
#[derive(Debug, Clone, Serialize)]
pub struct ResumeCheck {
    pub resumable: bool,
    pub completed_parts: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub age_hours: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub config: Option<ChunkingConfig>,
}

impl ResumeCheck {
    fn not_resumable() -> Self {
        Self {
            resumable: false,
            completed_parts: 0,
            age_hours: None,
            config: None,
        }
    }
}

/// Probe the checkpoint file for a project.
///
/// Absent, unreadable, or stale checkpoints all yield `resumable: false`;
/// only the stale case is worth a log line.
pub async fn check_resumable(checkpoint_file: &Path) -> ResumeCheck {
    let content = match tokio::fs::read(checkpoint_file).await {
        Ok(content) => content,
        Err(_) => return ResumeCheck::not_resumable(),
    };

    let checkpoint: Checkpoint = match serde_json::from_slice(&content) {
        Ok(checkpoint) => checkpoint,
        Err(e) => {
            tracing::debug!("Ignoring unreadable checkpoint {:?}: {}", checkpoint_file, e);
            return ResumeCheck::not_resumable();
        }
    };

    let age = Utc::now().signed_duration_since(checkpoint.timestamp);
    let age_hours = age.num_milliseconds() as f64 / 3_600_000.0;
    if age.num_hours() >= RESUME_MAX_AGE_HOURS {
        tracing::info!(
            "Checkpoint {:?} is {:.0}h old (limit {}h), starting fresh",
            checkpoint_file,
            age_hours,
            RESUME_MAX_AGE_HOURS
        );
        return ResumeCheck::not_resumable();
    }

    ResumeCheck {
        resumable: true,
        completed_parts: checkpoint.completed_chunks.len(),
        age_hours: Some(age_hours),
        config: Some(checkpoint.config),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use tempfile::TempDir;

    async fn write_checkpoint(path: &Path, age: Duration, parts: usize) {
        let checkpoint = Checkpoint {
            completed_chunks: (0..parts).map(|i| format!("part_{i}.json")).collect(),
            timestamp: Utc::now() - age,
            config: ChunkingConfig::default(),
        };
        tokio::fs::write(path, serde_json::to_vec(&checkpoint).unwrap())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_missing_checkpoint_not_resumable() {
        let temp = TempDir::new().unwrap();
        let check = check_resumable(&temp.path().join("checkpoint.json")).await;
        assert!(!check.resumable);
        assert_eq!(check.completed_parts, 0);
    }

    #[tokio::test]
    async fn test_fresh_checkpoint_is_resumable() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("checkpoint.json");
        write_checkpoint(&path, Duration::hours(2), 3).await;

        let check = check_resumable(&path).await;
        assert!(check.resumable);
        assert_eq!(check.completed_parts, 3);
        assert!(check.age_hours.unwrap() > 1.9 && check.age_hours.unwrap() < 2.1);
        assert!(check.config.is_some());
    }

    #[tokio::test]
    async fn test_just_under_age_limit_is_resumable() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("checkpoint.json");
        write_checkpoint(&path, Duration::hours(RESUME_MAX_AGE_HOURS - 1), 1).await;
        assert!(check_resumable(&path).await.resumable);
    }

    #[tokio::test]
    async fn test_stale_checkpoint_not_resumable() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("checkpoint.json");
        write_checkpoint(&path, Duration::hours(RESUME_MAX_AGE_HOURS + 1), 1).await;
        assert!(!check_resumable(&path).await.resumable);
    }

    #[tokio::test]
    async fn test_garbage_checkpoint_not_resumable() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("checkpoint.json");
        tokio::fs::write(&path, b"not json at all").await.unwrap();
        assert!(!check_resumable(&path).await.resumable);
    }
}
