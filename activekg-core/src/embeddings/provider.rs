//! Embedding provider trait.

use anyhow::Result;
use async_trait::async_trait;

/// Trait for embedding providers that convert text to dense vectors.
///
/// Output vectors are L2-normalized and have the process-constant dimension
/// reported by [`EmbeddingProvider::dimension`]. Encoding is deterministic
/// within a model/version. Over-long inputs are truncated by the provider
/// before encoding.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Generate an embedding for a single text.
    async fn embed_text(&self, text: &str) -> Result<Vec<f32>>;

    /// Generate embeddings for multiple texts in batch.
    ///
    /// More efficient than calling `embed_text` repeatedly. The default
    /// implementation embeds each text in order.
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut embeddings = Vec::with_capacity(texts.len());
        for text in texts {
            embeddings.push(self.embed_text(text).await?);
        }
        Ok(embeddings)
    }

    /// Embedding dimension for this provider.
    fn dimension(&self) -> usize;

    /// Model name/identifier.
    fn model_name(&self) -> &str;

    /// Check whether the backend is reachable and configured.
    async fn is_available(&self) -> bool {
        self.embed_text("test").await.is_ok()
    }
}
