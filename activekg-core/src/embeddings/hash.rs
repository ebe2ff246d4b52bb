//! Deterministic hash-based embedding backend.

use anyhow::Result;
use async_trait::async_trait;

use super::provider::EmbeddingProvider;
use super::similarity::l2_normalize;

/// Deterministic embedding backend seeded from a hash of the input text.
///
/// Produces stable, L2-normalized vectors for a given `(model, text)` pair,
/// which keeps drift computation and retrieval tests reproducible across
/// processes. Not semantic; the production deployment swaps in the remote
/// provider and keeps everything downstream unchanged.
pub struct HashEmbedder {
    model: String,
    dimension: usize,
    max_input_chars: usize,
}

impl HashEmbedder {
    /// Create a new hash embedder.
    #[must_use]
    pub fn new(model: String, dimension: usize, max_input_chars: usize) -> Self {
        Self {
            model,
            dimension,
            max_input_chars,
        }
    }

    fn truncate<'a>(&self, text: &'a str) -> &'a str {
        if text.chars().count() <= self.max_input_chars {
            return text;
        }
        match text.char_indices().nth(self.max_input_chars) {
            Some((idx, _)) => &text[..idx],
            None => text,
        }
    }

    /// Generate the deterministic embedding for a text.
    #[must_use]
    pub fn generate(&self, text: &str) -> Vec<f32> {
        use std::collections::hash_map::DefaultHasher;
        use std::hash::{Hash, Hasher};

        let mut hasher = DefaultHasher::new();
        self.model.hash(&mut hasher);
        self.truncate(text).hash(&mut hasher);
        let hash = hasher.finish();

        let mut embedding = Vec::with_capacity(self.dimension);
        let mut seed = hash;

        for _ in 0..self.dimension {
            // LCG over the text hash, mapped to [-1, 1]
            seed = seed.wrapping_mul(1_103_515_245).wrapping_add(12_345);
            let value = ((seed >> 16) as u16 as f32) / 32768.0 - 1.0;
            embedding.push(value);
        }

        l2_normalize(embedding)
    }
}

#[async_trait]
impl EmbeddingProvider for HashEmbedder {
    async fn embed_text(&self, text: &str) -> Result<Vec<f32>> {
        Ok(self.generate(text))
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|t| self.generate(t)).collect())
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn model_name(&self) -> &str {
        &self.model
    }

    async fn is_available(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn embedder() -> HashEmbedder {
        HashEmbedder::new("hash-v1".to_string(), 64, 8_000)
    }

    #[test]
    fn embeddings_are_deterministic() {
        let e = embedder();
        assert_eq!(e.generate("hello world"), e.generate("hello world"));
    }

    #[test]
    fn different_texts_produce_different_embeddings() {
        let e = embedder();
        assert_ne!(e.generate("alpha"), e.generate("beta"));
    }

    #[test]
    fn embeddings_are_normalized() {
        let e = embedder();
        let v = e.generate("some document text");
        let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);
        assert_eq!(v.len(), 64);
    }

    #[test]
    fn over_long_input_is_truncated_before_encoding() {
        let e = HashEmbedder::new("hash-v1".to_string(), 32, 10);
        let a = e.generate("0123456789 extra tail one");
        let b = e.generate("0123456789 different tail");
        assert_eq!(a, b);
    }

    #[tokio::test]
    async fn batch_matches_single_encoding() {
        let e = embedder();
        let texts = vec!["one".to_string(), "two".to_string()];
        let batch = e.embed_batch(&texts).await.unwrap();
        assert_eq!(batch[0], e.generate("one"));
        assert_eq!(batch[1], e.generate("two"));
    }
}
