//! Snapshot persistence for the retrieval engine.
//!
//! A snapshot is three co-located files:
//! - `index.usearch`: optimized-index blob (only when that strategy is active)
//! - `embeddings.bin`: normalized vector matrix
//! - `metadata.json`: `{texts, metadatas}` sidecar plus ids and bookkeeping
//!
//! Saves write every artifact to a temp file in the store directory, sync it,
//! then rename into place with the sidecar last. Loads never fail: each damaged
//! or missing artifact is reported as a [`Recovery`] and replaced by the best
//! state that can be rebuilt from the others.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

use studyvault_core::{AppError, AppResult};

use crate::exhaustive::ExhaustiveIndex;
use crate::store::RecordStore;
use crate::types::Metadata;
use crate::vector_index::{BackendKind, SimilarityIndex};

pub const INDEX_FILE: &str = "index.usearch";
pub const MATRIX_FILE: &str = "embeddings.bin";
pub const SIDECAR_FILE: &str = "metadata.json";

const MATRIX_MAGIC: &[u8; 4] = b"SVMX";
const MATRIX_VERSION: u32 = 1;
const MATRIX_HEADER_LEN: usize = 20;
const SIDECAR_VERSION: u32 = 1;

/// Locations of the three snapshot artifacts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotPaths {
    pub index: PathBuf,
    pub matrix: PathBuf,
    pub sidecar: PathBuf,
}

impl SnapshotPaths {
    pub fn in_dir(dir: &Path) -> Self {
        Self {
            index: dir.join(INDEX_FILE),
            matrix: dir.join(MATRIX_FILE),
            sidecar: dir.join(SIDECAR_FILE),
        }
    }

    fn all(&self) -> [&Path; 3] {
        [&self.index, &self.matrix, &self.sidecar]
    }
}

/// An anomaly tolerated while loading a snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Recovery {
    /// Sidecar could not be parsed; the engine starts empty
    SidecarUnreadable(String),
    /// Vectors exist but the sidecar does not; they cannot be attributed
    SidecarMissing { matrix_rows: usize },
    /// `texts` and `metadatas` disagree; both were cut to the shorter
    SidecarLengthMismatch { texts: usize, metadatas: usize },
    /// No matrix for a non-empty sidecar; zero vectors stand in
    MatrixMissing { rows: usize },
    /// Matrix could not be decoded; zero vectors stand in
    MatrixUnreadable(String),
    /// Matrix row count differs from the sidecar; padded or cut to match
    MatrixRowMismatch { matrix: usize, records: usize },
    /// Optimized blob could not be restored; rebuilt from the matrix
    IndexUnreadable(String),
    /// Optimized blob holds a different record count; rebuilt from the matrix
    IndexCountMismatch { index: usize, records: usize },
    /// Matrix was zero-filled but the optimized blob was intact; rows copied
    /// back out of the blob (`missing` rows could not be read and stay zero)
    MatrixRestoredFromIndex { rows: usize, missing: usize },
}

/// Everything recovered from disk at startup.
#[derive(Debug, Clone)]
pub struct LoadedSnapshot {
    pub records: RecordStore,
    pub matrix: ExhaustiveIndex,
    /// Whether every row of `matrix` was decoded from disk rather than zero-filled
    pub matrix_intact: bool,
    pub index_blob: Option<Vec<u8>>,
    /// Backend recorded by the save that wrote `index_blob`
    pub blob_backend: Option<BackendKind>,
    pub saved_at: Option<DateTime<Utc>>,
    pub recoveries: Vec<Recovery>,
}

impl LoadedSnapshot {
    fn empty(dimension: usize) -> Self {
        Self {
            records: RecordStore::new(),
            matrix: ExhaustiveIndex::new(dimension),
            matrix_intact: true,
            index_blob: None,
            blob_backend: None,
            saved_at: None,
            recoveries: Vec::new(),
        }
    }
}

#[derive(Serialize)]
struct SidecarOut<'a> {
    version: u32,
    dimension: usize,
    backend: BackendKind,
    saved_at: DateTime<Utc>,
    ids: &'a [String],
    texts: &'a [String],
    metadatas: &'a [Metadata],
}

#[derive(Deserialize)]
struct SidecarIn {
    #[serde(default)]
    backend: Option<BackendKind>,
    #[serde(default)]
    saved_at: Option<DateTime<Utc>>,
    #[serde(default)]
    ids: Vec<String>,
    texts: Vec<String>,
    metadatas: Vec<Metadata>,
}

/// Reads and writes snapshots in one directory.
#[derive(Debug, Clone)]
pub struct PersistenceManager {
    dir: PathBuf,
    paths: SnapshotPaths,
    dimension: usize,
}

impl PersistenceManager {
    /// Create a manager, creating the store directory if needed.
    pub fn new(dir: &Path, dimension: usize) -> AppResult<Self> {
        fs::create_dir_all(dir).map_err(|e| {
            AppError::Persistence(format!("Failed to create store directory {:?}: {}", dir, e))
        })?;

        Ok(Self {
            dir: dir.to_path_buf(),
            paths: SnapshotPaths::in_dir(dir),
            dimension,
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn paths(&self) -> &SnapshotPaths {
        &self.paths
    }

    /// Write a full snapshot and return its timestamp.
    ///
    /// `accelerated` contributes the blob; when it is absent or has no
    /// serialized form, any blob left by an earlier save is removed.
    pub fn save(
        &self,
        records: &RecordStore,
        matrix: &ExhaustiveIndex,
        accelerated: Option<&dyn SimilarityIndex>,
    ) -> AppResult<DateTime<Utc>> {
        if matrix.rows() != records.len() {
            return Err(AppError::Persistence(format!(
                "Refusing to save: {} vectors for {} records",
                matrix.rows(),
                records.len()
            )));
        }

        let (blob, backend) = match accelerated {
            Some(index) => {
                if index.len() != records.len() {
                    return Err(AppError::Persistence(format!(
                        "Refusing to save: optimized index holds {} vectors for {} records",
                        index.len(),
                        records.len()
                    )));
                }
                (index.to_bytes()?, index.backend())
            }
            None => (None, BackendKind::Exhaustive),
        };

        // Stage everything before touching the live files
        let blob_tmp = blob
            .as_deref()
            .map(|bytes| self.stage(|w| w.write_all(bytes)))
            .transpose()?;
        let matrix_tmp = self.stage(|w| write_matrix(w, matrix))?;
        let saved_at = Utc::now();
        let sidecar = SidecarOut {
            version: SIDECAR_VERSION,
            dimension: self.dimension,
            backend,
            saved_at,
            ids: records.ids(),
            texts: records.texts(),
            metadatas: records.metadatas(),
        };
        let sidecar_tmp = self.stage(|w| {
            serde_json::to_writer(&mut *w, &sidecar).map_err(std::io::Error::from)
        })?;

        match blob_tmp {
            Some(tmp) => publish(tmp, &self.paths.index)?,
            None => remove_if_exists(&self.paths.index)?,
        }
        publish(matrix_tmp, &self.paths.matrix)?;
        publish(sidecar_tmp, &self.paths.sidecar)?;

        tracing::debug!(
            "Saved snapshot of {} records to {:?} (backend: {})",
            records.len(),
            self.dir,
            backend
        );
        Ok(saved_at)
    }

    /// Load the snapshot, tolerating damage.
    pub fn load(&self) -> LoadedSnapshot {
        let mut snapshot = LoadedSnapshot::empty(self.dimension);

        let sidecar = match self.read_sidecar() {
            Ok(Some(sidecar)) => sidecar,
            Ok(None) => {
                if let Ok(Some(matrix)) = self.read_matrix() {
                    if matrix.rows() > 0 {
                        tracing::warn!(
                            "Found {} stored vectors without a metadata sidecar; starting empty",
                            matrix.rows()
                        );
                        snapshot.recoveries.push(Recovery::SidecarMissing {
                            matrix_rows: matrix.rows(),
                        });
                    }
                }
                return snapshot;
            }
            Err(e) => {
                tracing::warn!("Failed to load metadata sidecar; starting empty. Error: {}", e);
                snapshot.recoveries.push(Recovery::SidecarUnreadable(e.to_string()));
                return snapshot;
            }
        };

        let SidecarIn {
            backend,
            saved_at,
            ids,
            mut texts,
            mut metadatas,
        } = sidecar;

        if texts.len() != metadatas.len() {
            tracing::warn!(
                "Sidecar holds {} texts but {} metadatas; keeping the common prefix",
                texts.len(),
                metadatas.len()
            );
            snapshot.recoveries.push(Recovery::SidecarLengthMismatch {
                texts: texts.len(),
                metadatas: metadatas.len(),
            });
            let common = texts.len().min(metadatas.len());
            texts.truncate(common);
            metadatas.truncate(common);
        }

        let count = texts.len();
        let ids = positional_ids(ids, count);
        let records = match RecordStore::from_parts(ids, texts, metadatas) {
            Ok(records) => records,
            Err(e) => {
                snapshot.recoveries.push(Recovery::SidecarUnreadable(e.to_string()));
                return snapshot;
            }
        };

        let (matrix, intact) = match self.read_matrix() {
            Ok(Some(mut matrix)) => {
                let short = matrix.rows() < count;
                if matrix.rows() != count {
                    tracing::warn!(
                        "Stored matrix has {} rows for {} records; padding or truncating",
                        matrix.rows(),
                        count
                    );
                    snapshot.recoveries.push(Recovery::MatrixRowMismatch {
                        matrix: matrix.rows(),
                        records: count,
                    });
                    matrix.resize_rows(count);
                }
                (matrix, !short)
            }
            Ok(None) => {
                if count > 0 {
                    tracing::warn!(
                        "No stored matrix for {} records; substituting zero vectors",
                        count
                    );
                    snapshot.recoveries.push(Recovery::MatrixMissing { rows: count });
                }
                (ExhaustiveIndex::zeros(self.dimension, count), count == 0)
            }
            Err(e) => {
                tracing::warn!(
                    "Failed to load stored matrix; substituting zero vectors. Error: {}",
                    e
                );
                snapshot.recoveries.push(Recovery::MatrixUnreadable(e.to_string()));
                (ExhaustiveIndex::zeros(self.dimension, count), false)
            }
        };

        if count > 0 && self.paths.index.exists() {
            match fs::read(&self.paths.index) {
                Ok(bytes) => snapshot.index_blob = Some(bytes),
                Err(e) => {
                    tracing::warn!("Failed to read optimized index blob. Error: {}", e);
                    snapshot.recoveries.push(Recovery::IndexUnreadable(e.to_string()));
                }
            }
        }

        snapshot.records = records;
        snapshot.matrix = matrix;
        snapshot.matrix_intact = intact;
        snapshot.blob_backend = backend;
        snapshot.saved_at = saved_at;

        tracing::debug!(
            "Loaded snapshot from {:?}: {} records, {} recoveries",
            self.dir,
            count,
            snapshot.recoveries.len()
        );
        snapshot
    }

    /// Delete every snapshot artifact.
    pub fn clear(&self) -> AppResult<()> {
        for path in self.paths.all() {
            remove_if_exists(path)?;
        }
        Ok(())
    }

    fn stage<F>(&self, write: F) -> AppResult<NamedTempFile>
    where
        F: FnOnce(&mut BufWriter<&mut fs::File>) -> std::io::Result<()>,
    {
        let mut tmp = NamedTempFile::new_in(&self.dir).map_err(|e| {
            AppError::Persistence(format!("Failed to create temp file in {:?}: {}", self.dir, e))
        })?;

        {
            let mut writer = BufWriter::new(tmp.as_file_mut());
            write(&mut writer)
                .and_then(|_| writer.flush())
                .map_err(|e| AppError::Persistence(format!("Failed to write snapshot: {}", e)))?;
        }

        tmp.as_file()
            .sync_all()
            .map_err(|e| AppError::Persistence(format!("Failed to sync snapshot: {}", e)))?;
        Ok(tmp)
    }

    fn read_sidecar(&self) -> AppResult<Option<SidecarIn>> {
        if !self.paths.sidecar.exists() {
            return Ok(None);
        }
        let content = fs::read(&self.paths.sidecar)?;
        Ok(Some(serde_json::from_slice(&content)?))
    }

    fn read_matrix(&self) -> AppResult<Option<ExhaustiveIndex>> {
        if !self.paths.matrix.exists() {
            return Ok(None);
        }
        let bytes = fs::read(&self.paths.matrix)?;
        decode_matrix(&bytes, self.dimension).map(Some)
    }
}

fn positional_ids(mut ids: Vec<String>, count: usize) -> Vec<String> {
    if ids.len() > count {
        ids.truncate(count);
    }
    while ids.len() < count {
        ids.push(ids.len().to_string());
    }
    ids
}

fn publish(tmp: NamedTempFile, target: &Path) -> AppResult<()> {
    tmp.persist(target).map_err(|e| {
        AppError::Persistence(format!("Failed to move snapshot into {:?}: {}", target, e.error))
    })?;
    Ok(())
}

fn remove_if_exists(path: &Path) -> AppResult<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(AppError::Persistence(format!(
            "Failed to delete {:?}: {}",
            path, e
        ))),
    }
}

fn write_matrix<W: Write>(writer: &mut W, matrix: &ExhaustiveIndex) -> std::io::Result<()> {
    writer.write_all(MATRIX_MAGIC)?;
    writer.write_all(&MATRIX_VERSION.to_le_bytes())?;
    writer.write_all(&(matrix.dimension() as u32).to_le_bytes())?;
    writer.write_all(&(matrix.rows() as u64).to_le_bytes())?;
    for value in matrix.as_slice() {
        writer.write_all(&value.to_le_bytes())?;
    }
    Ok(())
}

fn decode_matrix(bytes: &[u8], dimension: usize) -> AppResult<ExhaustiveIndex> {
    if bytes.len() < MATRIX_HEADER_LEN {
        return Err(AppError::Persistence(
            "Matrix file shorter than its header".to_string(),
        ));
    }
    if &bytes[0..4] != MATRIX_MAGIC {
        return Err(AppError::Persistence("Matrix file has bad magic".to_string()));
    }

    let version = u32::from_le_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]);
    if version != MATRIX_VERSION {
        return Err(AppError::Persistence(format!(
            "Unsupported matrix version {}",
            version
        )));
    }

    let stored_dim = u32::from_le_bytes([bytes[8], bytes[9], bytes[10], bytes[11]]) as usize;
    if stored_dim != dimension {
        return Err(AppError::DimensionMismatch {
            expected: dimension,
            actual: stored_dim,
        });
    }

    let mut rows_bytes = [0u8; 8];
    rows_bytes.copy_from_slice(&bytes[12..20]);
    let rows = u64::from_le_bytes(rows_bytes) as usize;

    let body = &bytes[MATRIX_HEADER_LEN..];
    let expected = rows
        .checked_mul(dimension)
        .and_then(|n| n.checked_mul(4))
        .ok_or_else(|| AppError::Persistence("Matrix header overflows".to_string()))?;
    if body.len() != expected {
        return Err(AppError::Persistence(format!(
            "Matrix body is {} bytes, header promises {}",
            body.len(),
            expected
        )));
    }

    let data = body
        .chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect();
    ExhaustiveIndex::from_matrix(dimension, data)
}
