//! Retrieval engine type definitions.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

use crate::vector_index::BackendKind;

/// Metadata key holding the tenant's institution.
pub const UNIVERSITY_KEY: &str = "university";

/// Metadata key holding the tenant's roll number.
pub const ROLL_NO_KEY: &str = "roll_no";

/// Metadata key naming the document a chunk was extracted from.
pub const SOURCE_KEY: &str = "source";

/// Metadata key holding the ingestion timestamp.
pub const INGESTED_AT_KEY: &str = "ingested_at";

/// A metadata value: a scalar or a string.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MetadataValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

impl MetadataValue {
    /// Borrow the value as a string, if it is one.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            MetadataValue::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Whether this value equals a filter value.
    ///
    /// Strings compare exactly; other scalars compare on their display form.
    pub fn matches_str(&self, expected: &str) -> bool {
        match self {
            MetadataValue::Text(s) => s == expected,
            other => other.to_string() == expected,
        }
    }
}

impl fmt::Display for MetadataValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MetadataValue::Bool(b) => write!(f, "{}", b),
            MetadataValue::Int(i) => write!(f, "{}", i),
            MetadataValue::Float(x) => write!(f, "{}", x),
            MetadataValue::Text(s) => f.write_str(s),
        }
    }
}

impl From<&str> for MetadataValue {
    fn from(value: &str) -> Self {
        MetadataValue::Text(value.to_string())
    }
}

impl From<String> for MetadataValue {
    fn from(value: String) -> Self {
        MetadataValue::Text(value)
    }
}

impl From<i64> for MetadataValue {
    fn from(value: i64) -> Self {
        MetadataValue::Int(value)
    }
}

impl From<f64> for MetadataValue {
    fn from(value: f64) -> Self {
        MetadataValue::Float(value)
    }
}

impl From<bool> for MetadataValue {
    fn from(value: bool) -> Self {
        MetadataValue::Bool(value)
    }
}

/// Per-record metadata. Ordered so sidecar output is stable.
pub type Metadata = BTreeMap<String, MetadataValue>;

/// A chunk handed to the engine by the ingestion pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VectorRecord {
    /// Chunk identifier (a UUID is assigned when empty)
    #[serde(default)]
    pub id: String,

    /// Raw embedding; normalized by the engine on insert
    #[serde(default)]
    pub vector: Vec<f32>,

    /// Chunk text
    #[serde(default)]
    pub text: String,

    /// Metadata, expected to carry `university` and `roll_no`
    #[serde(default)]
    pub metadata: Metadata,
}

impl VectorRecord {
    /// Create a record with empty metadata.
    pub fn new(id: impl Into<String>, vector: Vec<f32>, text: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            vector,
            text: text.into(),
            metadata: Metadata::new(),
        }
    }

    /// Attach a metadata entry.
    pub fn with_meta(mut self, key: impl Into<String>, value: impl Into<MetadataValue>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Merge raw extractor metadata, reduced by [`sanitize_json`](crate::metadata::sanitize_json).
    pub fn with_json_metadata(mut self, value: &serde_json::Value) -> Self {
        self.metadata.extend(crate::metadata::sanitize_json(value));
        self
    }

    /// Attach the tenant scoping keys.
    pub fn for_tenant(self, university: &str, roll_no: &str) -> Self {
        self.with_meta(UNIVERSITY_KEY, university)
            .with_meta(ROLL_NO_KEY, roll_no)
    }
}

/// A ranked search result.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchHit {
    pub id: String,
    pub text: String,
    pub metadata: Metadata,
    /// Cosine similarity to the query
    pub score: f32,
}

/// A stored chunk returned by tenant-scoped listing calls.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StoredDocument {
    pub id: String,
    pub text: String,
    pub metadata: Metadata,
}

/// Outcome of an insert batch.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct InsertReport {
    /// Records written and persisted
    pub inserted: usize,

    /// Records skipped for a missing or empty vector
    pub skipped_empty: usize,

    /// Ids of records rejected for a wrong vector length
    pub rejected_dimension: Vec<String>,
}

/// Chunk counts for one source document of a tenant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SourceSummary {
    pub source: String,
    pub chunks: usize,
    pub latest_ingested_at: Option<String>,
}

/// Statistics for one tenant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TenantStats {
    /// Number of chunks owned by the tenant
    pub docs: usize,

    /// Sources, most recently ingested first
    pub sources: Vec<SourceSummary>,
}

/// Process-level description of the engine. Contains no tenant data.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EngineStats {
    pub count: usize,
    pub dimension: usize,
    pub backend: BackendKind,
    pub store_dir: PathBuf,
    /// When the snapshot on disk was last written, if ever
    pub saved_at: Option<DateTime<Utc>>,
}
