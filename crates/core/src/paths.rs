//! Project storage layout.
//!
//! Every project lives under `<data_dir>/projects/<project_id>/`:
//!
//! ```text
//! uploads/            raw documents handed to the chunking engine
//! work/               engine scratch output (raw chunk file, parts)
//! chunks.json         persisted chunk set (the engine's output shape)
//! chunking_job.json   ephemeral chunking job record
//! checkpoint.json     engine checkpoint for resume
//! indexes/<run>/      one directory per embedding run
//! ```

use std::path::{Path, PathBuf};

/// Root directory of one project.
pub fn project_dir(data_dir: &Path, project_id: &str) -> PathBuf {
    data_dir.join("projects").join(project_id)
}

/// Directory holding the project's raw uploaded documents.
pub fn uploads_dir(data_dir: &Path, project_id: &str) -> PathBuf {
    project_dir(data_dir, project_id).join("uploads")
}

/// Engine scratch directory.
pub fn work_dir(data_dir: &Path, project_id: &str) -> PathBuf {
    project_dir(data_dir, project_id).join("work")
}

/// Raw engine output file (read back and re-persisted on completion).
pub fn raw_chunks_file(data_dir: &Path, project_id: &str) -> PathBuf {
    work_dir(data_dir, project_id).join("chunks_raw.json")
}

/// The project's persisted chunk set.
pub fn chunks_file(data_dir: &Path, project_id: &str) -> PathBuf {
    project_dir(data_dir, project_id).join("chunks.json")
}

/// Ephemeral chunking job record.
pub fn job_file(data_dir: &Path, project_id: &str) -> PathBuf {
    project_dir(data_dir, project_id).join("chunking_job.json")
}

/// Engine checkpoint file, inspected by the resume-check query.
pub fn checkpoint_file(data_dir: &Path, project_id: &str) -> PathBuf {
    project_dir(data_dir, project_id).join("checkpoint.json")
}

/// Directory holding one subdirectory per embedding run.
pub fn indexes_dir(data_dir: &Path, project_id: &str) -> PathBuf {
    project_dir(data_dir, project_id).join("indexes")
}

/// Directory of a single index run.
pub fn index_run_dir(data_dir: &Path, project_id: &str, index_ref: &str) -> PathBuf {
    indexes_dir(data_dir, project_id).join(index_ref)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_layout_is_rooted_under_projects() {
        let data = Path::new("/data");
        assert_eq!(
            chunks_file(data, "p1"),
            PathBuf::from("/data/projects/p1/chunks.json")
        );
        assert_eq!(
            index_run_dir(data, "p1", "hash-384-20240101T000000"),
            PathBuf::from("/data/projects/p1/indexes/hash-384-20240101T000000")
        );
    }
}
