//! Embedding provider seam.
//!
//! The engine never calls a model itself; callers embed text through an
//! [`EmbeddingProvider`] and hand vectors to the engine.

pub mod provider;
pub mod providers;

pub use provider::{create_provider, EmbeddingProvider};
pub use providers::trigram::TrigramProvider;
