//! Tenant-isolated retrieval engine.
//!
//! Owns the record store, the normalized matrix (exhaustive strategy) and the
//! optional optimized index behind one `RwLock`. Inserts and resets hold the
//! write lock through the snapshot write, so a reader never sees memory that
//! is ahead of disk. Searches share the read lock.

use std::collections::{BTreeMap, HashMap};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::{DateTime, Utc};
use studyvault_core::{AppError, AppResult};

use crate::config::RetrievalConfig;
use crate::embeddings::EmbeddingProvider;
use crate::exhaustive::ExhaustiveIndex;
use crate::filter::{self, TenantFilter};
use crate::persistence::{LoadedSnapshot, PersistenceManager, Recovery};
use crate::store::RecordStore;
use crate::types::{
    EngineStats, InsertReport, Metadata, SearchHit, SourceSummary, StoredDocument, TenantStats,
    VectorRecord, INGESTED_AT_KEY, SOURCE_KEY,
};
use crate::vector_index::{
    create_accelerated, is_zero, normalize, rank_order, restore_accelerated, BackendKind,
    ScoredPosition, SimilarityIndex,
};

/// Source label for records without a `source` entry.
const UNKNOWN_SOURCE: &str = "Unknown";

struct EngineState {
    records: RecordStore,
    matrix: ExhaustiveIndex,
    accelerated: Option<Box<dyn SimilarityIndex>>,
    /// Anomalies from the last load; cleared by `reset`
    recoveries: Vec<Recovery>,
    saved_at: Option<DateTime<Utc>>,
}

impl EngineState {
    fn backend(&self) -> BackendKind {
        self.accelerated
            .as_ref()
            .map(|index| index.backend())
            .unwrap_or(BackendKind::Exhaustive)
    }

    /// Cut every structure back to `len` records.
    fn rollback(&mut self, len: usize) {
        self.records.truncate(len);
        self.matrix.resize_rows(len);

        let failed = match self.accelerated.as_mut() {
            Some(index) => index.truncate(len).err(),
            None => None,
        };
        if let Some(e) = failed {
            tracing::warn!(
                "Failed to roll back optimized index; continuing with exhaustive search: {}",
                e
            );
            self.accelerated = None;
        }
    }
}

/// Shared retrieval engine.
///
/// Construct once with [`RetrievalEngine::open`] (or [`crate::init`]) and
/// pass by shared reference to every request handler.
pub struct RetrievalEngine {
    config: RetrievalConfig,
    persistence: PersistenceManager,
    state: RwLock<EngineState>,
}

impl std::fmt::Debug for RetrievalEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetrievalEngine")
            .field("store_dir", &self.config.store_dir)
            .field("dimension", &self.config.dimension)
            .finish_non_exhaustive()
    }
}

impl RetrievalEngine {
    /// Load the snapshot in `config.store_dir`, or start empty.
    ///
    /// Damaged artifacts never fail the open; they are listed in
    /// [`RetrievalEngine::recoveries`].
    pub fn open(config: RetrievalConfig) -> AppResult<Self> {
        config.validate()?;
        let persistence = PersistenceManager::new(&config.store_dir, config.dimension)?;
        let mut snapshot = persistence.load();

        let accelerated = restore_or_rebuild(&config, &mut snapshot);
        Ok(Self::assemble(config, persistence, snapshot, accelerated))
    }

    /// Open with a caller-supplied optimized strategy.
    ///
    /// `index` must be empty; it is filled from the stored matrix.
    pub fn with_backend(
        config: RetrievalConfig,
        mut index: Box<dyn SimilarityIndex>,
    ) -> AppResult<Self> {
        config.validate()?;
        if !index.is_empty() {
            return Err(AppError::Index(format!(
                "Supplied {} index already holds {} vectors",
                index.backend(),
                index.len()
            )));
        }

        let persistence = PersistenceManager::new(&config.store_dir, config.dimension)?;
        let snapshot = persistence.load();
        fill_from_matrix(index.as_mut(), &snapshot.matrix)?;

        Ok(Self::assemble(config, persistence, snapshot, Some(index)))
    }

    fn assemble(
        config: RetrievalConfig,
        persistence: PersistenceManager,
        snapshot: LoadedSnapshot,
        accelerated: Option<Box<dyn SimilarityIndex>>,
    ) -> Self {
        let state = EngineState {
            records: snapshot.records,
            matrix: snapshot.matrix,
            accelerated,
            recoveries: snapshot.recoveries,
            saved_at: snapshot.saved_at,
        };

        tracing::info!(
            "Retrieval engine ready: {} records, dimension {}, backend {}",
            state.records.len(),
            config.dimension,
            state.backend()
        );

        Self {
            config,
            persistence,
            state: RwLock::new(state),
        }
    }

    pub fn config(&self) -> &RetrievalConfig {
        &self.config
    }

    /// Anomalies tolerated while loading the snapshot.
    ///
    /// Empty again after [`RetrievalEngine::reset`].
    pub fn recoveries(&self) -> AppResult<Vec<Recovery>> {
        Ok(self.read_state()?.recoveries.clone())
    }

    /// Insert a batch and return how many records were written.
    pub fn insert(&self, batch: Vec<VectorRecord>) -> AppResult<usize> {
        self.insert_with_report(batch).map(|report| report.inserted)
    }

    /// Insert a batch, persisting before returning.
    ///
    /// Records without a vector are skipped and records of the wrong
    /// dimension are rejected; the rest of the batch still goes in. If the
    /// snapshot cannot be written the batch is rolled back and the error
    /// returned.
    pub fn insert_with_report(&self, batch: Vec<VectorRecord>) -> AppResult<InsertReport> {
        let dimension = self.config.dimension;
        let mut report = InsertReport::default();
        let mut accepted: Vec<(String, String, Metadata)> = Vec::with_capacity(batch.len());
        let mut vectors: Vec<Vec<f32>> = Vec::with_capacity(batch.len());

        for record in batch {
            if record.vector.is_empty() {
                report.skipped_empty += 1;
                continue;
            }
            if record.vector.len() != dimension {
                tracing::warn!(
                    "Rejecting record '{}': {}",
                    record.id,
                    AppError::DimensionMismatch {
                        expected: dimension,
                        actual: record.vector.len(),
                    }
                );
                report.rejected_dimension.push(record.id);
                continue;
            }

            let id = if record.id.trim().is_empty() {
                uuid::Uuid::new_v4().to_string()
            } else {
                record.id
            };
            vectors.push(normalize(&record.vector));
            accepted.push((id, record.text, record.metadata));
        }

        if accepted.is_empty() {
            tracing::debug!("Nothing to insert ({} skipped)", report.skipped_empty);
            return Ok(report);
        }

        let mut guard = self.write_state()?;
        let state = &mut *guard;
        let base = state.records.len();

        for vector in &vectors {
            if let Err(e) = state.matrix.push(vector) {
                state.rollback(base);
                return Err(e);
            }
        }
        for (id, text, metadata) in accepted {
            state.records.push(id, text, metadata);
        }

        let failed = match state.accelerated.as_mut() {
            Some(index) => index.add(&vectors).err(),
            None => None,
        };
        if let Some(e) = failed {
            tracing::warn!(
                "Optimized index rejected the batch; continuing with exhaustive search: {}",
                e
            );
            state.accelerated = None;
        }

        match self
            .persistence
            .save(&state.records, &state.matrix, state.accelerated.as_deref())
        {
            Ok(saved_at) => state.saved_at = Some(saved_at),
            Err(e) => {
                tracing::warn!("Snapshot write failed; rolling back {} records", vectors.len());
                state.rollback(base);
                return Err(e);
            }
        }

        report.inserted = vectors.len();
        tracing::debug!(
            "Inserted {} records ({} skipped, {} rejected); store now holds {}",
            report.inserted,
            report.skipped_empty,
            report.rejected_dimension.len(),
            state.records.len()
        );
        Ok(report)
    }

    /// Top-k cosine search within one tenant.
    ///
    /// Candidates from the optimized index are filtered in ranked order; when
    /// that yields nothing the exhaustive scan runs over the same filter, so a
    /// matching record is never missed because of the optimized backend.
    pub fn search(
        &self,
        query: &[f32],
        k: usize,
        filter: &TenantFilter,
        allowed_sources: Option<&[String]>,
    ) -> AppResult<Vec<SearchHit>> {
        if k == 0 {
            return Ok(Vec::new());
        }
        if query.len() != self.config.dimension {
            return Err(AppError::DimensionMismatch {
                expected: self.config.dimension,
                actual: query.len(),
            });
        }

        let query = normalize(query);
        if is_zero(&query) {
            tracing::debug!("Query vector has no direction; returning no results");
            return Ok(Vec::new());
        }

        let state = self.read_state()?;
        let keep = |position: usize| {
            state
                .records
                .metadata(position)
                .is_some_and(|metadata| filter::apply(metadata, filter, allowed_sources))
        };

        let mut ranked = match state.accelerated.as_deref() {
            Some(index) => self.search_accelerated(index, &query, k, state.records.len(), &keep),
            None => Vec::new(),
        };

        if ranked.is_empty() {
            if state.accelerated.is_some() {
                tracing::debug!("Optimized search found no tenant matches; scanning exhaustively");
            }
            ranked = state.matrix.search_filtered(&query, k, &keep);
        }

        Ok(ranked
            .into_iter()
            .filter_map(|c| state.records.get(c.position).map(|r| r.to_hit(c.score)))
            .collect())
    }

    /// Overfetch candidates and filter them, widening the window while the
    /// backend keeps returning full windows without enough survivors.
    fn search_accelerated(
        &self,
        index: &dyn SimilarityIndex,
        query: &[f32],
        k: usize,
        total: usize,
        keep: &dyn Fn(usize) -> bool,
    ) -> Vec<ScoredPosition> {
        let factor = self.config.overfetch_factor;
        let mut fetch = k.saturating_mul(factor);
        let mut survivors = Vec::new();

        for round in 1..=self.config.max_overfetch_rounds {
            let mut candidates = match index.search(query, fetch) {
                Ok(candidates) => candidates,
                Err(e) => {
                    tracing::warn!("Optimized search failed: {}", e);
                    return Vec::new();
                }
            };
            candidates.sort_unstable_by(rank_order);
            let returned = candidates.len();

            survivors = candidates
                .into_iter()
                .filter(|c| c.position < total && keep(c.position))
                .take(k)
                .collect();

            if survivors.len() >= k || returned < fetch || fetch >= total {
                break;
            }

            fetch = fetch.saturating_mul(factor);
            tracing::debug!(
                "Round {}: {} of {} wanted survived filtering; widening to {} candidates",
                round,
                survivors.len(),
                k,
                fetch
            );
        }

        survivors
    }

    /// Validate an ad hoc filter map, then search.
    ///
    /// A map without both tenant fields fails before any data is touched.
    pub fn search_with_map(
        &self,
        query: &[f32],
        k: usize,
        filters: &HashMap<String, String>,
        allowed_sources: Option<&[String]>,
    ) -> AppResult<Vec<SearchHit>> {
        let filter = filter::validate(filters)?;
        self.search(query, k, &filter, allowed_sources)
    }

    /// Embed `text` through `provider` and search with the result.
    pub async fn search_text(
        &self,
        provider: &dyn EmbeddingProvider,
        text: &str,
        k: usize,
        filter: &TenantFilter,
        allowed_sources: Option<&[String]>,
    ) -> AppResult<Vec<SearchHit>> {
        let query = provider.embed(text).await?;
        self.search(&query, k, filter, allowed_sources)
    }

    /// Texts of the `search` hits, best first.
    pub fn retrieve_texts(
        &self,
        query: &[f32],
        k: usize,
        filter: &TenantFilter,
        allowed_sources: Option<&[String]>,
    ) -> AppResult<Vec<String>> {
        Ok(self
            .search(query, k, filter, allowed_sources)?
            .into_iter()
            .map(|hit| hit.text)
            .collect())
    }

    /// Drop every record and delete the snapshot files.
    pub fn reset(&self) -> AppResult<()> {
        let mut guard = self.write_state()?;
        let previous = guard.records.len();
        guard.rollback(0);
        guard.recoveries.clear();
        guard.saved_at = None;
        self.persistence.clear()?;

        tracing::info!("Reset retrieval engine ({} records removed)", previous);
        Ok(())
    }

    /// Number of stored records.
    pub fn size(&self) -> AppResult<usize> {
        Ok(self.read_state()?.records.len())
    }

    /// Process-level description of the engine.
    pub fn stats(&self) -> AppResult<EngineStats> {
        let state = self.read_state()?;
        Ok(EngineStats {
            count: state.records.len(),
            dimension: self.config.dimension,
            backend: state.backend(),
            store_dir: self.persistence.dir().to_path_buf(),
            saved_at: state.saved_at,
        })
    }

    /// Sources owned by a tenant, most recently ingested first.
    pub fn list_sources(&self, filter: &TenantFilter) -> AppResult<Vec<SourceSummary>> {
        let state = self.read_state()?;
        Ok(summarize_sources(&state.records, filter).1)
    }

    pub fn tenant_stats(&self, filter: &TenantFilter) -> AppResult<TenantStats> {
        let state = self.read_state()?;
        let (docs, sources) = summarize_sources(&state.records, filter);
        Ok(TenantStats { docs, sources })
    }

    /// Up to `limit` chunks of one source of a tenant, in insertion order.
    pub fn documents_by_source(
        &self,
        filter: &TenantFilter,
        source: &str,
        limit: usize,
    ) -> AppResult<Vec<StoredDocument>> {
        let state = self.read_state()?;
        Ok(state
            .records
            .iter()
            .filter(|record| {
                filter.matches(record.metadata)
                    && record
                        .metadata
                        .get(SOURCE_KEY)
                        .is_some_and(|value| value.matches_str(source))
            })
            .take(limit)
            .map(|record| record.to_document())
            .collect())
    }

    /// Write a final snapshot and release the engine.
    pub fn shutdown(self) -> AppResult<()> {
        let state = self.read_state()?;
        self.persistence
            .save(&state.records, &state.matrix, state.accelerated.as_deref())?;
        tracing::info!(
            "Retrieval engine shut down with {} records",
            state.records.len()
        );
        Ok(())
    }

    fn read_state(&self) -> AppResult<RwLockReadGuard<'_, EngineState>> {
        self.state
            .read()
            .map_err(|_| AppError::Other("Retrieval engine lock poisoned".to_string()))
    }

    fn write_state(&self) -> AppResult<RwLockWriteGuard<'_, EngineState>> {
        self.state
            .write()
            .map_err(|_| AppError::Other("Retrieval engine lock poisoned".to_string()))
    }
}

/// Pick the optimized strategy for a freshly loaded snapshot.
///
/// A blob written by the same backend is restored when it agrees with the
/// record count; anything else is rebuilt from the matrix.
fn restore_or_rebuild(
    config: &RetrievalConfig,
    snapshot: &mut LoadedSnapshot,
) -> Option<Box<dyn SimilarityIndex>> {
    let mut index = create_accelerated(config.backend, config.dimension)?;
    let records = snapshot.records.len();

    if let Some(blob) = snapshot.index_blob.take() {
        if snapshot.blob_backend == Some(index.backend()) {
            match restore_accelerated(index.backend(), config.dimension, &blob) {
                Ok(restored) if restored.len() == records => {
                    if !snapshot.matrix_intact {
                        restore_matrix_from(&*restored, snapshot);
                    }
                    return Some(restored);
                }
                Ok(restored) => {
                    tracing::warn!(
                        "Optimized index holds {} vectors for {} records; rebuilding from matrix",
                        restored.len(),
                        records
                    );
                    snapshot.recoveries.push(Recovery::IndexCountMismatch {
                        index: restored.len(),
                        records,
                    });
                }
                Err(e) => {
                    tracing::warn!("Failed to restore optimized index; rebuilding from matrix: {}", e);
                    snapshot.recoveries.push(Recovery::IndexUnreadable(e.to_string()));
                }
            }
        }
    }

    match fill_from_matrix(index.as_mut(), &snapshot.matrix) {
        Ok(()) => Some(index),
        Err(e) => {
            tracing::warn!(
                "Failed to rebuild optimized index; falling back to exhaustive search: {}",
                e
            );
            None
        }
    }
}

/// Copy rows out of a restored optimized index into a zero-filled matrix.
fn restore_matrix_from(index: &dyn SimilarityIndex, snapshot: &mut LoadedSnapshot) {
    let rows = snapshot.records.len();
    let mut matrix = ExhaustiveIndex::new(snapshot.matrix.dimension());
    let mut missing = 0;

    for position in 0..rows {
        let row = index
            .vector(position)
            .filter(|v| v.len() == matrix.dimension())
            .map(|v| normalize(&v))
            .unwrap_or_else(|| {
                missing += 1;
                vec![0.0; matrix.dimension()]
            });
        if matrix.push(&row).is_err() {
            return;
        }
    }

    tracing::warn!(
        "Rebuilt {} matrix rows from the optimized index ({} unavailable)",
        rows - missing,
        missing
    );
    snapshot.matrix = matrix;
    snapshot.matrix_intact = missing == 0;
    snapshot
        .recoveries
        .push(Recovery::MatrixRestoredFromIndex { rows, missing });
}

fn fill_from_matrix(index: &mut dyn SimilarityIndex, matrix: &ExhaustiveIndex) -> AppResult<()> {
    if matrix.rows() == 0 {
        return Ok(());
    }
    let rows: Vec<Vec<f32>> = matrix.iter_rows().map(<[f32]>::to_vec).collect();
    index.add(&rows)
}

fn summarize_sources(records: &RecordStore, filter: &TenantFilter) -> (usize, Vec<SourceSummary>) {
    let mut docs = 0;
    let mut by_source: BTreeMap<String, (usize, Option<String>)> = BTreeMap::new();

    for record in records.iter().filter(|r| filter.matches(r.metadata)) {
        docs += 1;
        let source = record
            .metadata
            .get(SOURCE_KEY)
            .map(|value| value.to_string())
            .unwrap_or_else(|| UNKNOWN_SOURCE.to_string());
        let ingested_at = record.metadata.get(INGESTED_AT_KEY).map(|v| v.to_string());

        let entry = by_source.entry(source).or_insert((0, None));
        entry.0 += 1;
        if ingested_at > entry.1 {
            entry.1 = ingested_at;
        }
    }

    let mut sources: Vec<SourceSummary> = by_source
        .into_iter()
        .map(|(source, (chunks, latest_ingested_at))| SourceSummary {
            source,
            chunks,
            latest_ingested_at,
        })
        .collect();
    sources.sort_by(|a, b| {
        b.latest_ingested_at
            .cmp(&a.latest_ingested_at)
            .then_with(|| a.source.cmp(&b.source))
    });

    (docs, sources)
}
