//! Cross-module scenario tests for the retrieval engine.

mod concurrency;
mod oracle;
#[cfg(feature = "usearch")]
mod usearch_recovery;

use std::path::Path;
use std::sync::{Arc, Mutex};

use studyvault_core::AppResult;

use crate::config::RetrievalConfig;
use crate::exhaustive::ExhaustiveIndex;
use crate::types::VectorRecord;
use crate::vector_index::{BackendKind, ScoredPosition, SimilarityIndex};

/// Config for an engine running the exhaustive strategy only.
pub(crate) fn exhaustive_config(dir: &Path, dimension: usize) -> RetrievalConfig {
    RetrievalConfig {
        store_dir: dir.join("vector_store"),
        dimension,
        backend: BackendKind::Exhaustive,
        ..Default::default()
    }
}

pub(crate) fn record(
    id: &str,
    vector: Vec<f32>,
    text: &str,
    university: &str,
    roll_no: &str,
) -> VectorRecord {
    VectorRecord::new(id, vector, text).for_tenant(university, roll_no)
}

/// Optimized strategy that indexes everything and never finds anything.
#[derive(Debug, Default)]
pub(crate) struct BlindIndex {
    len: usize,
}

impl SimilarityIndex for BlindIndex {
    fn backend(&self) -> BackendKind {
        BackendKind::Usearch
    }

    fn add(&mut self, vectors: &[Vec<f32>]) -> AppResult<()> {
        self.len += vectors.len();
        Ok(())
    }

    fn search(&self, _query: &[f32], _k: usize) -> AppResult<Vec<ScoredPosition>> {
        Ok(Vec::new())
    }

    fn len(&self) -> usize {
        self.len
    }

    fn truncate(&mut self, len: usize) -> AppResult<()> {
        self.len = self.len.min(len);
        Ok(())
    }
}

/// Exact strategy that records every requested candidate window.
#[derive(Debug)]
pub(crate) struct RecordingIndex {
    inner: ExhaustiveIndex,
    pub requests: Arc<Mutex<Vec<usize>>>,
}

impl RecordingIndex {
    pub fn new(dimension: usize) -> Self {
        Self {
            inner: ExhaustiveIndex::new(dimension),
            requests: Arc::new(Mutex::new(Vec::new())),
        }
    }
}

impl SimilarityIndex for RecordingIndex {
    fn backend(&self) -> BackendKind {
        BackendKind::Usearch
    }

    fn add(&mut self, vectors: &[Vec<f32>]) -> AppResult<()> {
        self.inner.add(vectors)
    }

    fn search(&self, query: &[f32], k: usize) -> AppResult<Vec<ScoredPosition>> {
        if let Ok(mut requests) = self.requests.lock() {
            requests.push(k);
        }
        self.inner.search(query, k)
    }

    fn len(&self) -> usize {
        self.inner.len()
    }

    fn truncate(&mut self, len: usize) -> AppResult<()> {
        self.inner.truncate(len)
    }
}
