//! Vector index manager.
//!
//! Owns zero or more index runs per project, loads them lazily, and
//! caches loaded runs for the process lifetime. A new embedding run
//! always produces a new run directory (new reference), so cached
//! entries never go stale; `invalidate` exists for explicit eviction
//! when a project's chunk data is deleted.

use crate::store::{self, LoadedIndex};
use ragmill_core::{paths, AppError, AppResult};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

/// Per-project index ownership and raw nearest-neighbor search.
pub struct IndexManager {
    data_dir: PathBuf,
    cache: Mutex<HashMap<(String, String), Arc<LoadedIndex>>>,
}

impl IndexManager {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// Enumerate this project's persisted index runs, newest last.
    pub fn list(&self, project_id: &str) -> AppResult<Vec<String>> {
        let dir = paths::indexes_dir(&self.data_dir, project_id);
        if !dir.exists() {
            return Ok(Vec::new());
        }

        let mut refs: Vec<String> = std::fs::read_dir(&dir)?
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.path().is_dir())
            .filter_map(|entry| entry.file_name().into_string().ok())
            .collect();
        refs.sort();
        Ok(refs)
    }

    /// Load one index run, idempotently and cached.
    ///
    /// Fails with `IndexNotFound` when the run directory or any of its
    /// three artifacts is missing.
    pub fn load(&self, project_id: &str, index_ref: &str) -> AppResult<Arc<LoadedIndex>> {
        let key = (project_id.to_string(), index_ref.to_string());
        {
            let cache = self.cache.lock().unwrap();
            if let Some(loaded) = cache.get(&key) {
                return Ok(Arc::clone(loaded));
            }
        }

        let run_dir = paths::index_run_dir(&self.data_dir, project_id, index_ref);
        if !run_dir.exists() {
            return Err(AppError::IndexNotFound(index_ref.to_string()));
        }

        let loaded = store::load_run(&run_dir).map_err(|e| match e {
            AppError::MissingArtifact(_) => AppError::IndexNotFound(index_ref.to_string()),
            other => other,
        })?;

        tracing::debug!(
            "Loaded index {}/{} ({} points)",
            project_id,
            index_ref,
            loaded.index.len()
        );

        let loaded = Arc::new(loaded);
        let mut cache = self.cache.lock().unwrap();
        cache.insert(key, Arc::clone(&loaded));
        Ok(loaded)
    }

    /// Raw nearest-neighbor search on one index: `(point_id, distance)`
    /// pairs, nearest first. No similarity thresholds or token budgets
    /// here — that is the retrieval engine's job.
    pub fn search(
        &self,
        project_id: &str,
        index_ref: &str,
        query: &[f32],
        k: usize,
    ) -> AppResult<Vec<(usize, f32)>> {
        let loaded = self.load(project_id, index_ref)?;
        loaded.index.search(query, k)
    }

    /// Fan-out search over several indices, one query vector per index
    /// reference. A failing index records its error without failing the
    /// others.
    pub fn search_all(
        &self,
        project_id: &str,
        queries: &HashMap<String, Vec<f32>>,
        k: usize,
    ) -> HashMap<String, AppResult<Vec<(usize, f32)>>> {
        queries
            .iter()
            .map(|(index_ref, query)| {
                let result = self.search(project_id, index_ref, query, k);
                if let Err(e) = &result {
                    tracing::warn!("Search failed for index '{}': {}", index_ref, e);
                }
                (index_ref.clone(), result)
            })
            .collect()
    }

    /// Drop all cached runs for one project.
    pub fn invalidate(&self, project_id: &str) {
        let mut cache = self.cache.lock().unwrap();
        cache.retain(|(cached_project, _), _| cached_project != project_id);
    }
}
