//! Index run persistence.
//!
//! Each embedding run writes one directory holding three artifacts:
//! `index.bin` (the dense vector structure), `metadata.json` (one entry
//! per point id, same order as the vectors), and `config.json` (model
//! identity, dimension, chunk count, creation time). A run is read back
//! only when all three are present.

use crate::dense::DenseIndex;
use chrono::{DateTime, Utc};
use ragmill_core::{AppError, AppResult};
use serde::{Deserialize, Serialize};
use std::path::Path;

pub const INDEX_FILE: &str = "index.bin";
pub const METADATA_FILE: &str = "metadata.json";
pub const CONFIG_FILE: &str = "config.json";

/// Sidecar configuration for one index run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexConfig {
    pub model_id: String,
    pub model_name: String,
    pub dimension: usize,
    pub chunk_count: usize,
    pub created_at: DateTime<Utc>,
}

/// Per-point document record, stored in lockstep with the vectors.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentRecord {
    /// Point id in the backing structure
    pub id: usize,

    /// Chunk text
    pub text: String,

    /// Chunk metadata (source file, headings, …)
    #[serde(default)]
    pub metadata: serde_json::Value,

    /// Token estimate carried over from the chunking engine
    #[serde(default)]
    pub tokens: u64,
}

/// A fully loaded index run.
#[derive(Debug)]
pub struct LoadedIndex {
    pub config: IndexConfig,
    pub index: DenseIndex,
    pub documents: Vec<DocumentRecord>,
}

/// Derive the run directory name for a new index.
pub fn run_name(model_id: &str, created_at: DateTime<Utc>) -> String {
    format!("{}-{}", model_id, created_at.format("%Y%m%dT%H%M%S"))
}

/// Persist one run's three artifacts.
pub fn write_run(
    run_dir: &Path,
    index: &DenseIndex,
    documents: &[DocumentRecord],
    config: &IndexConfig,
) -> AppResult<()> {
    if index.len() != documents.len() {
        return Err(AppError::Other(format!(
            "Index has {} points but {} document records",
            index.len(),
            documents.len()
        )));
    }

    std::fs::create_dir_all(run_dir)?;
    index.save(&run_dir.join(INDEX_FILE))?;
    std::fs::write(
        run_dir.join(METADATA_FILE),
        serde_json::to_vec(documents)?,
    )?;
    std::fs::write(run_dir.join(CONFIG_FILE), serde_json::to_vec_pretty(config)?)?;

    tracing::info!(
        "Persisted index run at {:?} ({} points, dimension {})",
        run_dir,
        index.len(),
        index.dimension()
    );
    Ok(())
}

/// Load one run, failing with `MissingArtifact` if any file is absent.
pub fn load_run(run_dir: &Path) -> AppResult<LoadedIndex> {
    for artifact in [INDEX_FILE, METADATA_FILE, CONFIG_FILE] {
        if !run_dir.join(artifact).exists() {
            return Err(AppError::MissingArtifact(format!(
                "{:?} has no {}",
                run_dir, artifact
            )));
        }
    }

    let config: IndexConfig =
        serde_json::from_slice(&std::fs::read(run_dir.join(CONFIG_FILE))?)?;
    let documents: Vec<DocumentRecord> =
        serde_json::from_slice(&std::fs::read(run_dir.join(METADATA_FILE))?)?;
    let index = DenseIndex::load(&run_dir.join(INDEX_FILE))?;

    if index.len() != documents.len() {
        return Err(AppError::Serialization(format!(
            "{:?}: {} vectors but {} metadata entries",
            run_dir,
            index.len(),
            documents.len()
        )));
    }

    Ok(LoadedIndex {
        config,
        index,
        documents,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn sample_run(dir: &Path) {
        let mut index = DenseIndex::with_capacity(2, 2);
        index.add(&[1.0, 0.0]).unwrap();
        index.add(&[0.0, 1.0]).unwrap();

        let documents = vec![
            DocumentRecord {
                id: 0,
                text: "first chunk".to_string(),
                metadata: serde_json::json!({"source": "a.pdf"}),
                tokens: 2,
            },
            DocumentRecord {
                id: 1,
                text: "second chunk".to_string(),
                metadata: serde_json::json!({"source": "a.pdf"}),
                tokens: 2,
            },
        ];

        let config = IndexConfig {
            model_id: "hash-384".to_string(),
            model_name: "Hashed n-gram".to_string(),
            dimension: 2,
            chunk_count: 2,
            created_at: Utc::now(),
        };

        write_run(dir, &index, &documents, &config).unwrap();
    }

    #[test]
    fn test_write_and_load_run() {
        let temp = TempDir::new().unwrap();
        let run_dir = temp.path().join("hash-384-20240101T000000");
        sample_run(&run_dir);

        let loaded = load_run(&run_dir).unwrap();
        assert_eq!(loaded.config.model_id, "hash-384");
        assert_eq!(loaded.index.len(), 2);
        assert_eq!(loaded.documents[1].text, "second chunk");
        // Point id i corresponds to documents[i]
        assert_eq!(loaded.documents[0].id, 0);
        assert_eq!(loaded.documents[1].id, 1);
    }

    #[test]
    fn test_missing_artifact_detected() {
        let temp = TempDir::new().unwrap();
        let run_dir = temp.path().join("run");
        sample_run(&run_dir);
        std::fs::remove_file(run_dir.join(METADATA_FILE)).unwrap();

        let result = load_run(&run_dir);
        assert!(matches!(result, Err(AppError::MissingArtifact(_))));
    }

    #[test]
    fn test_lockstep_violation_rejected_on_write() {
        let temp = TempDir::new().unwrap();
        let mut index = DenseIndex::with_capacity(2, 1);
        index.add(&[1.0, 0.0]).unwrap();

        let config = IndexConfig {
            model_id: "hash-384".to_string(),
            model_name: "Hashed n-gram".to_string(),
            dimension: 2,
            chunk_count: 1,
            created_at: Utc::now(),
        };

        let result = write_run(&temp.path().join("run"), &index, &[], &config);
        assert!(result.is_err());
    }
}
