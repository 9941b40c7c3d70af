//! Retrieval engine configuration management.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use studyvault_core::{AppError, AppResult};

use crate::vector_index::BackendKind;

/// Lowest overfetch factor accepted; below this post-filtering starves results.
pub const MIN_OVERFETCH_FACTOR: usize = 5;

/// Configuration for the retrieval engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetrievalConfig {
    /// Directory holding the snapshot artifacts
    pub store_dir: PathBuf,

    /// Embedding vector dimension
    #[serde(default = "default_dimension")]
    pub dimension: usize,

    /// Candidates requested per wanted result before tenant filtering
    #[serde(default = "default_overfetch_factor")]
    pub overfetch_factor: usize,

    /// Rounds of widening the candidate window before escalating
    #[serde(default = "default_max_overfetch_rounds")]
    pub max_overfetch_rounds: usize,

    /// Similarity backend preference
    #[serde(default)]
    pub backend: BackendKind,
}

fn default_dimension() -> usize {
    384
}

fn default_overfetch_factor() -> usize {
    10
}

fn default_max_overfetch_rounds() -> usize {
    3
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            store_dir: PathBuf::from("vector_store"),
            dimension: default_dimension(),
            overfetch_factor: default_overfetch_factor(),
            max_overfetch_rounds: default_max_overfetch_rounds(),
            backend: BackendKind::default(),
        }
    }
}

impl RetrievalConfig {
    /// Default configuration storing snapshots under `data_dir`.
    pub fn in_data_dir(data_dir: &Path) -> Self {
        Self {
            store_dir: get_store_dir(data_dir),
            ..Default::default()
        }
    }

    /// Check invariants the engine relies on.
    pub fn validate(&self) -> AppResult<()> {
        if self.dimension == 0 {
            return Err(AppError::Config(
                "Embedding dimension must be greater than zero".to_string(),
            ));
        }

        if self.overfetch_factor < MIN_OVERFETCH_FACTOR {
            return Err(AppError::Config(format!(
                "overfetch_factor must be at least {} (got {})",
                MIN_OVERFETCH_FACTOR, self.overfetch_factor
            )));
        }

        if self.max_overfetch_rounds == 0 {
            return Err(AppError::Config(
                "max_overfetch_rounds must be at least 1".to_string(),
            ));
        }

        Ok(())
    }

    /// Apply `RAG_*` environment overrides.
    ///
    /// Environment variables:
    /// - `RAG_EMBED_DIMENSION`: embedding dimension
    /// - `RAG_INDEX_DIR`: snapshot directory
    /// - `RAG_OVERFETCH_FACTOR`: candidate multiplier
    /// - `RAG_BACKEND`: `auto`, `usearch` or `exhaustive`
    pub fn apply_env_overrides(mut self) -> AppResult<Self> {
        if let Ok(dimension) = std::env::var("RAG_EMBED_DIMENSION") {
            self.dimension = parse_env("RAG_EMBED_DIMENSION", &dimension)?;
        }

        if let Ok(dir) = std::env::var("RAG_INDEX_DIR") {
            self.store_dir = PathBuf::from(dir);
        }

        if let Ok(factor) = std::env::var("RAG_OVERFETCH_FACTOR") {
            self.overfetch_factor = parse_env("RAG_OVERFETCH_FACTOR", &factor)?;
        }

        if let Ok(backend) = std::env::var("RAG_BACKEND") {
            self.backend = backend.parse()?;
        }

        Ok(self)
    }
}

fn parse_env(name: &str, value: &str) -> AppResult<usize> {
    value
        .trim()
        .parse()
        .map_err(|e| AppError::Config(format!("Invalid {}='{}': {}", name, value, e)))
}

/// Load retrieval configuration.
///
/// Loads from `<data_dir>/retrieval.yaml` if it exists, otherwise uses the
/// defaults rooted at `data_dir`. Environment overrides apply in both cases.
pub fn load_config(data_dir: &Path) -> AppResult<RetrievalConfig> {
    let config_path = get_config_path(data_dir);

    let config = if config_path.exists() {
        let content = fs::read_to_string(&config_path).map_err(|e| {
            AppError::Config(format!("Failed to read config at {:?}: {}", config_path, e))
        })?;

        let config: RetrievalConfig = serde_yaml::from_str(&content).map_err(|e| {
            AppError::Config(format!("Failed to parse config at {:?}: {}", config_path, e))
        })?;

        tracing::debug!("Loaded retrieval config from {:?}", config_path);
        config
    } else {
        tracing::debug!(
            "Using default retrieval config for {:?} (no config file found)",
            data_dir
        );
        RetrievalConfig::in_data_dir(data_dir)
    };

    let config = config.apply_env_overrides()?;
    config.validate()?;
    Ok(config)
}

/// Save retrieval configuration.
pub fn save_config(data_dir: &Path, config: &RetrievalConfig) -> AppResult<()> {
    let config_path = get_config_path(data_dir);

    if let Some(parent) = config_path.parent() {
        fs::create_dir_all(parent).map_err(|e| {
            AppError::Config(format!("Failed to create config directory: {}", e))
        })?;
    }

    let yaml = serde_yaml::to_string(config)?;

    fs::write(&config_path, yaml).map_err(|e| {
        AppError::Config(format!("Failed to write config to {:?}: {}", config_path, e))
    })?;

    tracing::debug!("Saved retrieval config to {:?}", config_path);
    Ok(())
}

/// Get the path to the retrieval config file.
pub fn get_config_path(data_dir: &Path) -> PathBuf {
    data_dir.join("retrieval.yaml")
}

/// Get the default snapshot directory.
pub fn get_store_dir(data_dir: &Path) -> PathBuf {
    data_dir.join("vector_store")
}
