//! HNSW inner-product backend built on `usearch`.
//!
//! Keys are record positions. Vectors arrive normalized, so the IP metric
//! ranks by cosine similarity; usearch reports `1 - dot` as the distance.

use studyvault_core::{AppError, AppResult};
use usearch::{Index, IndexOptions, MetricKind, ScalarKind};

use crate::vector_index::{BackendKind, ScoredPosition, SimilarityIndex};

/// Optimized similarity index.
pub struct UsearchIndex {
    inner: Index,
    dimension: usize,
}

impl std::fmt::Debug for UsearchIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UsearchIndex")
            .field("dimension", &self.dimension)
            .field("size", &self.inner.size())
            .finish()
    }
}

fn options(dimension: usize) -> IndexOptions {
    IndexOptions {
        dimensions: dimension,
        metric: MetricKind::IP,
        quantization: ScalarKind::F32,
        connectivity: 0,
        expansion_add: 0,
        expansion_search: 0,
        multi: false,
    }
}

impl UsearchIndex {
    /// Create an empty index.
    pub fn new(dimension: usize) -> AppResult<Self> {
        let inner = Index::new(&options(dimension))
            .map_err(|e| AppError::Index(format!("Failed to create usearch index: {}", e)))?;
        Ok(Self { inner, dimension })
    }

    /// Restore an index from a snapshot blob.
    pub fn from_bytes(dimension: usize, bytes: &[u8]) -> AppResult<Self> {
        let index = Self::new(dimension)?;
        index
            .inner
            .load_from_buffer(bytes)
            .map_err(|e| AppError::Index(format!("Failed to load usearch index: {}", e)))?;

        if index.inner.dimensions() != dimension {
            return Err(AppError::DimensionMismatch {
                expected: dimension,
                actual: index.inner.dimensions(),
            });
        }

        Ok(index)
    }

    fn ensure_capacity(&self, additional: usize) -> AppResult<()> {
        let needed = self.inner.size() + additional;
        if needed > self.inner.capacity() {
            let target = needed.max(self.inner.capacity() * 2).max(16);
            self.inner
                .reserve(target)
                .map_err(|e| AppError::Index(format!("Failed to reserve capacity: {}", e)))?;
        }
        Ok(())
    }
}

impl SimilarityIndex for UsearchIndex {
    fn backend(&self) -> BackendKind {
        BackendKind::Usearch
    }

    fn add(&mut self, vectors: &[Vec<f32>]) -> AppResult<()> {
        self.ensure_capacity(vectors.len())?;

        let start = self.inner.size();
        for (offset, vector) in vectors.iter().enumerate() {
            if vector.len() != self.dimension {
                return Err(AppError::DimensionMismatch {
                    expected: self.dimension,
                    actual: vector.len(),
                });
            }
            let key = (start + offset) as u64;
            self.inner
                .add(key, vector.as_slice())
                .map_err(|e| AppError::Index(format!("Failed to add key {}: {}", key, e)))?;
        }
        Ok(())
    }

    fn search(&self, query: &[f32], k: usize) -> AppResult<Vec<ScoredPosition>> {
        if k == 0 || self.inner.size() == 0 {
            return Ok(Vec::new());
        }

        let matches = self
            .inner
            .search(query, k.min(self.inner.size()))
            .map_err(|e| AppError::Index(format!("usearch query failed: {}", e)))?;

        Ok(matches
            .keys
            .iter()
            .zip(matches.distances.iter())
            .map(|(key, distance)| ScoredPosition {
                position: *key as usize,
                score: 1.0 - distance,
            })
            .collect())
    }

    fn len(&self) -> usize {
        self.inner.size()
    }

    fn truncate(&mut self, len: usize) -> AppResult<()> {
        let size = self.inner.size();
        for key in len..size {
            self.inner
                .remove(key as u64)
                .map_err(|e| AppError::Index(format!("Failed to remove key {}: {}", key, e)))?;
        }
        Ok(())
    }

    fn vector(&self, position: usize) -> Option<Vec<f32>> {
        let mut buffer = vec![0.0f32; self.dimension];
        // `get` reports how many vectors matched the key, not how many floats
        match self.inner.get(position as u64, &mut buffer) {
            Ok(found) if found > 0 => Some(buffer),
            _ => None,
        }
    }

    fn to_bytes(&self) -> AppResult<Option<Vec<u8>>> {
        let mut buffer = vec![0u8; self.inner.serialized_length()];
        self.inner
            .save_to_buffer(&mut buffer)
            .map_err(|e| AppError::Index(format!("Failed to serialize usearch index: {}", e)))?;
        Ok(Some(buffer))
    }
}
