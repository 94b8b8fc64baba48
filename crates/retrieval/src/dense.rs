//! Flat dense vector index with cosine distance.
//!
//! Vectors live in one contiguous buffer; a point's id is the sequential
//! position at which it was added, which is also its row in the sidecar
//! metadata array. Search is a full scan — adequate at the corpus sizes
//! this pipeline handles, and trivially correct.
//!
//! On-disk format: an 8-byte magic/version header, dimension (u32 LE),
//! point count (u64 LE), then the raw f32 LE payload.

use ragmill_core::{AppError, AppResult};
use std::io::{Read, Write};
use std::path::Path;

const MAGIC: &[u8; 4] = b"RGMI";
const VERSION: u32 = 1;

/// In-memory dense index over fixed-dimension vectors.
#[derive(Debug, Clone)]
pub struct DenseIndex {
    dimension: usize,
    data: Vec<f32>,
}

impl DenseIndex {
    /// Create an empty index, reserving room for `capacity` points.
    pub fn with_capacity(dimension: usize, capacity: usize) -> Self {
        Self {
            dimension,
            data: Vec::with_capacity(dimension * capacity),
        }
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    /// Number of points in the index.
    pub fn len(&self) -> usize {
        if self.dimension == 0 {
            0
        } else {
            self.data.len() / self.dimension
        }
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Append a vector; returns the new point's id.
    pub fn add(&mut self, vector: &[f32]) -> AppResult<usize> {
        if vector.len() != self.dimension {
            return Err(AppError::Embedding(format!(
                "Vector dimension {} does not match index dimension {}",
                vector.len(),
                self.dimension
            )));
        }
        let id = self.len();
        self.data.extend_from_slice(vector);
        Ok(id)
    }

    /// Borrow the vector for one point id.
    pub fn vector(&self, id: usize) -> Option<&[f32]> {
        let start = id * self.dimension;
        self.data.get(start..start + self.dimension)
    }

    /// Return up to `k` nearest neighbors as `(point_id, distance)`
    /// pairs, nearest first. Distance is cosine distance (1 − cosine
    /// similarity); thresholds and budgets are the caller's concern.
    pub fn search(&self, query: &[f32], k: usize) -> AppResult<Vec<(usize, f32)>> {
        if query.len() != self.dimension {
            return Err(AppError::Embedding(format!(
                "Query dimension {} does not match index dimension {}",
                query.len(),
                self.dimension
            )));
        }

        let mut hits: Vec<(usize, f32)> = (0..self.len())
            .map(|id| {
                let vector = &self.data[id * self.dimension..(id + 1) * self.dimension];
                (id, 1.0 - cosine_similarity(query, vector))
            })
            .collect();

        hits.sort_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal));
        hits.truncate(k);
        Ok(hits)
    }

    /// Write the index to disk.
    pub fn save(&self, path: &Path) -> AppResult<()> {
        let mut bytes = Vec::with_capacity(20 + self.data.len() * 4);
        bytes.extend_from_slice(MAGIC);
        bytes.extend_from_slice(&VERSION.to_le_bytes());
        bytes.extend_from_slice(&(self.dimension as u32).to_le_bytes());
        bytes.extend_from_slice(&(self.len() as u64).to_le_bytes());
        for &value in &self.data {
            bytes.extend_from_slice(&value.to_le_bytes());
        }

        let mut file = std::fs::File::create(path)?;
        file.write_all(&bytes)?;
        Ok(())
    }

    /// Read an index back from disk.
    pub fn load(path: &Path) -> AppResult<Self> {
        let mut file = std::fs::File::open(path)?;
        let mut bytes = Vec::new();
        file.read_to_end(&mut bytes)?;

        if bytes.len() < 20 || &bytes[0..4] != MAGIC {
            return Err(AppError::Serialization(format!(
                "{:?} is not a Ragmill index file",
                path
            )));
        }

        let version = u32::from_le_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]);
        if version != VERSION {
            return Err(AppError::Serialization(format!(
                "Unsupported index version {} in {:?}",
                version, path
            )));
        }

        let dimension = u32::from_le_bytes([bytes[8], bytes[9], bytes[10], bytes[11]]) as usize;
        let count = u64::from_le_bytes([
            bytes[12], bytes[13], bytes[14], bytes[15], bytes[16], bytes[17], bytes[18], bytes[19],
        ]) as usize;

        let payload = &bytes[20..];
        if payload.len() != dimension * count * 4 {
            return Err(AppError::Serialization(format!(
                "Index file {:?} is truncated: expected {} points of dimension {}",
                path, count, dimension
            )));
        }

        let mut data = Vec::with_capacity(dimension * count);
        for chunk in payload.chunks_exact(4) {
            data.push(f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]));
        }

        Ok(Self { dimension, data })
    }
}

fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_sequential_point_ids() {
        let mut index = DenseIndex::with_capacity(3, 4);
        assert_eq!(index.add(&[1.0, 0.0, 0.0]).unwrap(), 0);
        assert_eq!(index.add(&[0.0, 1.0, 0.0]).unwrap(), 1);
        assert_eq!(index.add(&[0.0, 0.0, 1.0]).unwrap(), 2);
        assert_eq!(index.len(), 3);
    }

    #[test]
    fn test_dimension_mismatch_rejected() {
        let mut index = DenseIndex::with_capacity(3, 1);
        assert!(index.add(&[1.0, 0.0]).is_err());
        index.add(&[1.0, 0.0, 0.0]).unwrap();
        assert!(index.search(&[1.0], 5).is_err());
    }

    #[test]
    fn test_search_orders_by_distance() {
        let mut index = DenseIndex::with_capacity(2, 3);
        index.add(&[1.0, 0.0]).unwrap();
        index.add(&[0.0, 1.0]).unwrap();
        index.add(&[0.7071, 0.7071]).unwrap();

        let hits = index.search(&[1.0, 0.0], 3).unwrap();
        assert_eq!(hits[0].0, 0);
        assert!(hits[0].1.abs() < 1e-5); // identical vector, distance 0
        assert_eq!(hits[1].0, 2);
        assert_eq!(hits[2].0, 1);
        assert!((hits[2].1 - 1.0).abs() < 1e-5); // orthogonal, distance 1
    }

    #[test]
    fn test_search_truncates_to_k() {
        let mut index = DenseIndex::with_capacity(2, 5);
        for i in 0..5 {
            index.add(&[1.0, i as f32 * 0.1]).unwrap();
        }
        let hits = index.search(&[1.0, 0.0], 2).unwrap();
        assert_eq!(hits.len(), 2);
    }

    #[test]
    fn test_save_load_roundtrip() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("index.bin");

        let mut index = DenseIndex::with_capacity(4, 2);
        index.add(&[0.5, 0.5, 0.5, 0.5]).unwrap();
        index.add(&[1.0, 0.0, 0.0, 0.0]).unwrap();
        index.save(&path).unwrap();

        let loaded = DenseIndex::load(&path).unwrap();
        assert_eq!(loaded.dimension(), 4);
        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded.vector(1).unwrap(), &[1.0, 0.0, 0.0, 0.0]);
    }

    #[test]
    fn test_load_rejects_garbage() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("index.bin");
        std::fs::write(&path, b"not an index").unwrap();
        assert!(DenseIndex::load(&path).is_err());
    }
}
