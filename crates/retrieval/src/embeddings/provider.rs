//! Embedding provider trait and factory.

use studyvault_core::{AppError, AppResult};
use std::sync::Arc;

use super::providers::trigram::TrigramProvider;

/// Trait for embedding providers.
///
/// Failures are returned to the caller as-is; nothing here retries.
#[async_trait::async_trait]
pub trait EmbeddingProvider: Send + Sync + std::fmt::Debug {
    /// Get provider name (e.g., "trigram")
    fn provider_name(&self) -> &str;

    /// Get model identifier
    fn model_name(&self) -> &str;

    /// Get embedding dimensions
    fn dimensions(&self) -> usize;

    /// Generate embeddings for multiple texts in a batch.
    async fn embed_batch(&self, texts: &[String]) -> AppResult<Vec<Vec<f32>>>;

    /// Generate embedding for a single text (convenience method).
    async fn embed(&self, text: &str) -> AppResult<Vec<f32>> {
        let mut results = self.embed_batch(&[text.to_string()]).await?;
        results
            .pop()
            .ok_or_else(|| AppError::Other("No embedding returned".to_string()))
    }
}

/// Create an embedding provider by name.
pub fn create_provider(name: &str, dimensions: usize) -> AppResult<Arc<dyn EmbeddingProvider>> {
    if dimensions == 0 {
        return Err(AppError::Config(
            "Embedding dimensions must be greater than zero".to_string(),
        ));
    }

    match name {
        "trigram" | "mock" => Ok(Arc::new(TrigramProvider::new(dimensions))),

        _ => Err(AppError::Config(format!(
            "Unknown embedding provider: '{}'. Supported providers: trigram",
            name
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_trigram_provider() {
        let provider = create_provider("trigram", 384).unwrap();
        assert_eq!(provider.provider_name(), "trigram");
        assert_eq!(provider.model_name(), "trigram-v1");
        assert_eq!(provider.dimensions(), 384);
    }

    #[test]
    fn test_create_unknown_provider() {
        let result = create_provider("unknown", 384);
        assert!(result.is_err());
        assert!(result
            .unwrap_err()
            .to_string()
            .contains("Unknown embedding provider"));
    }

    #[test]
    fn test_zero_dimensions_rejected() {
        assert!(create_provider("trigram", 0).is_err());
    }

    #[tokio::test]
    async fn test_provider_embed_single() {
        let provider = create_provider("trigram", 64).unwrap();

        let embedding = provider.embed("binary search trees").await.unwrap();
        assert_eq!(embedding.len(), 64);
    }
}
