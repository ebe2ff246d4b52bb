//! Semantic embedding generation and similarity math.
//!
//! The engine treats the embedding model as an external collaborator behind
//! [`EmbeddingProvider`]. The default backend is a deterministic hash embedder
//! (stable across processes for a given model name), which keeps the refresh
//! loop and tests reproducible; a reqwest-backed remote provider is available
//! behind the `remote-embeddings` feature.

mod hash;
mod provider;
#[cfg(feature = "remote-embeddings")]
mod remote;
pub mod similarity;

pub use hash::HashEmbedder;
pub use provider::EmbeddingProvider;
#[cfg(feature = "remote-embeddings")]
pub use remote::RemoteEmbeddingProvider;
pub use similarity::{cosine_similarity, drift_score, l2_normalize};

use std::sync::Arc;

use crate::config::EmbeddingSettings;
use crate::{Error, Result};

/// Build the configured embedding backend.
pub fn build_provider(settings: &EmbeddingSettings) -> Result<Arc<dyn EmbeddingProvider>> {
    match settings.backend.as_str() {
        "hash" => Ok(Arc::new(HashEmbedder::new(
            settings.model.clone(),
            settings.dimension,
            settings.max_input_chars,
        ))),
        #[cfg(feature = "remote-embeddings")]
        "remote" => Ok(Arc::new(remote::RemoteEmbeddingProvider::from_env(
            settings,
        )?)),
        other => Err(Error::Config(format!(
            "unknown embedding backend: {other}"
        ))),
    }
}
