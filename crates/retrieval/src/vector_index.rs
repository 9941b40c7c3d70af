//! Similarity index abstraction.
//!
//! Two strategies sit behind [`SimilarityIndex`]: the exhaustive scan in
//! [`crate::exhaustive`], which is always exact, and an optimized ANN backend
//! (`usearch`, behind the `usearch` feature). Vectors handed to an index are
//! already unit-normalized, so inner product is cosine similarity.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use studyvault_core::{AppError, AppResult};

/// A candidate returned by an index: record position and cosine score.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScoredPosition {
    pub position: usize,
    pub score: f32,
}

/// Trait for similarity index backends.
///
/// Implementations must support:
/// - Appending normalized vectors (positions are assigned in insertion order)
/// - Top-k search ordered by descending score
/// - Empty-index queries and `k` larger than the index
pub trait SimilarityIndex: Send + Sync {
    /// Which strategy this is.
    fn backend(&self) -> BackendKind;

    /// Append normalized vectors. The first new vector gets position `len()`.
    fn add(&mut self, vectors: &[Vec<f32>]) -> AppResult<()>;

    /// Best-effort top-k by cosine similarity, highest first.
    fn search(&self, query: &[f32], k: usize) -> AppResult<Vec<ScoredPosition>>;

    /// Number of indexed vectors.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop every vector at position `len` or beyond.
    fn truncate(&mut self, len: usize) -> AppResult<()>;

    /// Copy of the stored vector at `position`, if the backend keeps one.
    fn vector(&self, _position: usize) -> Option<Vec<f32>> {
        None
    }

    /// Serialized form for the snapshot blob, if the backend has one.
    fn to_bytes(&self) -> AppResult<Option<Vec<u8>>> {
        Ok(None)
    }
}

/// Backend preference from configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// Optimized backend when compiled in, exhaustive otherwise
    #[default]
    Auto,
    /// HNSW inner-product index from `usearch`
    Usearch,
    /// Linear scan over the normalized matrix
    Exhaustive,
}

impl BackendKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Auto => "auto",
            Self::Usearch => "usearch",
            Self::Exhaustive => "exhaustive",
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BackendKind {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "auto" => Ok(Self::Auto),
            "usearch" | "hnsw" => Ok(Self::Usearch),
            "exhaustive" | "flat" | "numpy" => Ok(Self::Exhaustive),
            other => Err(AppError::Config(format!(
                "Unknown similarity backend: '{}'. Supported: auto, usearch, exhaustive",
                other
            ))),
        }
    }
}

/// Construct the optimized strategy for a preference.
///
/// Never fails: any problem is logged and `None` (exhaustive only) returned.
pub fn create_accelerated(kind: BackendKind, dimension: usize) -> Option<Box<dyn SimilarityIndex>> {
    match kind {
        BackendKind::Exhaustive => None,
        BackendKind::Auto | BackendKind::Usearch => create_usearch(kind, dimension),
    }
}

#[cfg(feature = "usearch")]
fn create_usearch(_kind: BackendKind, dimension: usize) -> Option<Box<dyn SimilarityIndex>> {
    match crate::usearch_index::UsearchIndex::new(dimension) {
        Ok(index) => Some(Box::new(index)),
        Err(e) => {
            tracing::warn!(
                "Failed to initialize usearch backend; falling back to exhaustive search: {}",
                e
            );
            None
        }
    }
}

#[cfg(not(feature = "usearch"))]
fn create_usearch(kind: BackendKind, _dimension: usize) -> Option<Box<dyn SimilarityIndex>> {
    tracing::warn!(
        "Similarity backend '{}' requested but usearch support is not compiled in; \
         falling back to exhaustive cosine search",
        kind
    );
    None
}

/// Restore an optimized index from a snapshot blob.
pub fn restore_accelerated(
    kind: BackendKind,
    dimension: usize,
    bytes: &[u8],
) -> AppResult<Box<dyn SimilarityIndex>> {
    match kind {
        BackendKind::Exhaustive => Err(AppError::Index(
            "exhaustive strategy has no serialized index".to_string(),
        )),
        BackendKind::Auto | BackendKind::Usearch => restore_usearch(dimension, bytes),
    }
}

#[cfg(feature = "usearch")]
fn restore_usearch(dimension: usize, bytes: &[u8]) -> AppResult<Box<dyn SimilarityIndex>> {
    let index = crate::usearch_index::UsearchIndex::from_bytes(dimension, bytes)?;
    Ok(Box::new(index))
}

#[cfg(not(feature = "usearch"))]
fn restore_usearch(_dimension: usize, _bytes: &[u8]) -> AppResult<Box<dyn SimilarityIndex>> {
    Err(AppError::Index(
        "usearch support is not compiled in".to_string(),
    ))
}

/// Normalize a vector to unit L2 norm.
///
/// Zero-norm and non-finite vectors map to the zero vector.
pub fn normalize(vector: &[f32]) -> Vec<f32> {
    let norm = l2_norm(vector);
    if norm == 0.0 || !norm.is_finite() {
        return vec![0.0; vector.len()];
    }
    vector.iter().map(|x| x / norm).collect()
}

/// L2 norm of a vector.
pub fn l2_norm(vector: &[f32]) -> f32 {
    vector.iter().map(|x| x * x).sum::<f32>().sqrt()
}

/// Whether a vector is all zeros (the normalized form of a degenerate input).
pub fn is_zero(vector: &[f32]) -> bool {
    vector.iter().all(|x| *x == 0.0)
}

/// Inner product of two equal-length vectors.
pub fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b.iter()).map(|(x, y)| x * y).sum()
}

/// Ranking order: higher score first, then lower position.
pub(crate) fn rank_order(a: &ScoredPosition, b: &ScoredPosition) -> Ordering {
    b.score
        .total_cmp(&a.score)
        .then_with(|| a.position.cmp(&b.position))
}

/// Keep the `k` best candidates, sorted, using a partial selection.
pub(crate) fn select_top_k(mut candidates: Vec<ScoredPosition>, k: usize) -> Vec<ScoredPosition> {
    if k == 0 {
        return Vec::new();
    }
    if candidates.len() > k {
        candidates.select_nth_unstable_by(k - 1, rank_order);
        candidates.truncate(k);
    }
    candidates.sort_unstable_by(rank_order);
    candidates
}
