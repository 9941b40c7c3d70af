//! Tenant-isolated vector retrieval for StudyVault.
//!
//! Stores chunk embeddings with their text and metadata, answers top-k cosine
//! queries scoped to one tenant `(university, roll_no)`, and snapshots
//! everything to a directory after each write.

pub mod config;
pub mod embeddings;
pub mod engine;
pub mod exhaustive;
pub mod filter;
pub mod metadata;
pub mod persistence;
pub mod store;
pub mod types;
#[cfg(feature = "usearch")]
pub mod usearch_index;
pub mod vector_index;

#[cfg(test)]
mod tests;

// Re-export commonly used types
pub use config::RetrievalConfig;
pub use embeddings::{create_provider, EmbeddingProvider, TrigramProvider};
pub use engine::RetrievalEngine;
pub use filter::TenantFilter;
pub use persistence::Recovery;
pub use types::{
    EngineStats, InsertReport, Metadata, MetadataValue, SearchHit, SourceSummary, StoredDocument,
    TenantStats, VectorRecord,
};
pub use vector_index::{BackendKind, ScoredPosition, SimilarityIndex};

use studyvault_core::{AppConfig, AppResult};

/// Open the engine for an application configuration.
///
/// Creates the data directory, reads `retrieval.yaml` (or defaults) and
/// loads any existing snapshot.
pub fn init(app: &AppConfig) -> AppResult<RetrievalEngine> {
    app.ensure_data_dir()?;
    let config = config::load_config(&app.data_dir)?;

    tracing::info!("Opening retrieval store at {:?}", config.store_dir);
    RetrievalEngine::open(config)
}
