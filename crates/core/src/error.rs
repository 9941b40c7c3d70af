//! Error types for StudyVault.
//!
//! This module defines the unified error enum used by every crate, plus the
//! dedicated tenant-isolation error that search paths surface unchanged.

use thiserror::Error;

/// Rejection of a query that is not scoped to exactly one tenant.
///
/// Isolation errors are never downgraded to "no filter"; the caller always
/// sees them.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum IsolationError {
    /// A mandatory scoping key was not supplied.
    #[error("tenant scope is mandatory: filter is missing '{0}'")]
    MissingTenantScope(&'static str),

    /// A mandatory scoping key was supplied but blank.
    #[error("tenant scope is mandatory: '{0}' must not be empty")]
    EmptyTenantField(&'static str),
}

/// Unified error type for StudyVault.
///
/// All fallible functions return `Result<T, AppError>`.
/// We never panic; errors must be represented and propagated.
#[derive(Error, Debug)]
pub enum AppError {
    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// I/O and filesystem errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Missing or blank tenant scope on a query
    #[error("Isolation error: {0}")]
    Isolation(#[from] IsolationError),

    /// Vector length does not match the engine dimension
    #[error("Dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    /// Snapshot read/write failures
    #[error("Persistence error: {0}")]
    Persistence(String),

    /// Optimized similarity backend failures
    #[error("Index error: {0}")]
    Index(String),

    /// Serialization/deserialization errors
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Generic errors
    #[error("{0}")]
    Other(String),
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::Serialization(err.to_string())
    }
}

impl From<serde_yaml::Error> for AppError {
    fn from(err: serde_yaml::Error) -> Self {
        AppError::Serialization(err.to_string())
    }
}

/// Convenience type alias for Results with AppError.
pub type AppResult<T> = Result<T, AppError>;
