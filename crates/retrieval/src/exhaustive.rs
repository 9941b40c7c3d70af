//! Exhaustive cosine search over the in-memory normalized matrix.
//!
//! This is the correctness floor of the engine: a query scores every stored
//! vector (`O(N·D)`) and keeps the best `k` with a partial sort. The same
//! matrix is what the snapshot persists as `embeddings.bin`.

use studyvault_core::{AppError, AppResult};

use crate::vector_index::{dot, select_top_k, BackendKind, ScoredPosition, SimilarityIndex};

/// Row-major matrix of normalized vectors.
#[derive(Debug, Clone, PartialEq)]
pub struct ExhaustiveIndex {
    dimension: usize,
    data: Vec<f32>,
}

impl ExhaustiveIndex {
    /// Create an empty matrix for `dimension`-wide vectors.
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension,
            data: Vec::new(),
        }
    }

    /// Wrap an existing row-major buffer.
    pub fn from_matrix(dimension: usize, data: Vec<f32>) -> AppResult<Self> {
        if dimension == 0 || data.len() % dimension != 0 {
            return Err(AppError::Persistence(format!(
                "Matrix of {} values is not a whole number of {}-wide rows",
                data.len(),
                dimension
            )));
        }
        Ok(Self { dimension, data })
    }

    /// A matrix of `rows` zero vectors.
    pub fn zeros(dimension: usize, rows: usize) -> Self {
        Self {
            dimension,
            data: vec![0.0; dimension * rows],
        }
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    pub fn rows(&self) -> usize {
        if self.dimension == 0 {
            0
        } else {
            self.data.len() / self.dimension
        }
    }

    /// Borrow one row.
    pub fn row(&self, position: usize) -> Option<&[f32]> {
        let start = position.checked_mul(self.dimension)?;
        self.data.get(start..start + self.dimension)
    }

    /// Borrow the whole row-major buffer.
    pub fn as_slice(&self) -> &[f32] {
        &self.data
    }

    /// Pad with zero rows or cut down to exactly `rows` rows.
    pub fn resize_rows(&mut self, rows: usize) {
        self.data.resize(rows * self.dimension, 0.0);
    }

    /// Append one normalized row.
    pub fn push(&mut self, vector: &[f32]) -> AppResult<()> {
        if vector.len() != self.dimension {
            return Err(AppError::DimensionMismatch {
                expected: self.dimension,
                actual: vector.len(),
            });
        }
        self.data.extend_from_slice(vector);
        Ok(())
    }

    /// Iterate rows in position order.
    pub fn iter_rows(&self) -> impl Iterator<Item = &[f32]> {
        self.data.chunks_exact(self.dimension.max(1))
    }

    /// Exact top-k among the positions accepted by `keep`.
    ///
    /// The predicate runs before ranking, so the result is the true top-k of
    /// the matching subset regardless of how many non-matching rows outrank it.
    pub fn search_filtered<F>(&self, query: &[f32], k: usize, mut keep: F) -> Vec<ScoredPosition>
    where
        F: FnMut(usize) -> bool,
    {
        if k == 0 || query.len() != self.dimension {
            return Vec::new();
        }

        let candidates: Vec<ScoredPosition> = self
            .iter_rows()
            .enumerate()
            .filter(|(position, _)| keep(*position))
            .map(|(position, row)| ScoredPosition {
                position,
                score: dot(row, query),
            })
            .collect();

        select_top_k(candidates, k)
    }
}

impl SimilarityIndex for ExhaustiveIndex {
    fn backend(&self) -> BackendKind {
        BackendKind::Exhaustive
    }

    fn add(&mut self, vectors: &[Vec<f32>]) -> AppResult<()> {
        if let Some(bad) = vectors.iter().find(|v| v.len() != self.dimension) {
            return Err(AppError::DimensionMismatch {
                expected: self.dimension,
                actual: bad.len(),
            });
        }
        self.data.reserve(vectors.len() * self.dimension);
        for vector in vectors {
            self.data.extend_from_slice(vector);
        }
        Ok(())
    }

    fn search(&self, query: &[f32], k: usize) -> AppResult<Vec<ScoredPosition>> {
        if query.len() != self.dimension {
            return Err(AppError::DimensionMismatch {
                expected: self.dimension,
                actual: query.len(),
            });
        }
        Ok(self.search_filtered(query, k, |_| true))
    }

    fn len(&self) -> usize {
        self.rows()
    }

    fn vector(&self, position: usize) -> Option<Vec<f32>> {
        self.row(position).map(<[f32]>::to_vec)
    }

    fn truncate(&mut self, len: usize) -> AppResult<()> {
        if len < self.rows() {
            self.resize_rows(len);
        }
        Ok(())
    }
}
