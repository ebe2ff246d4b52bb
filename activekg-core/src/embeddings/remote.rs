//! Remote embedding backend over HTTP (optional).

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use serde::Deserialize;

use super::provider::EmbeddingProvider;
use super::similarity::l2_normalize;
use crate::config::EmbeddingSettings;

/// Embedding provider backed by an OpenAI-compatible `/embeddings` endpoint.
pub struct RemoteEmbeddingProvider {
    client: reqwest::Client,
    endpoint: String,
    api_key: Option<String>,
    model: String,
    dimension: usize,
    max_input_chars: usize,
    batch_size: usize,
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingDatum>,
}

#[derive(Deserialize)]
struct EmbeddingDatum {
    embedding: Vec<f32>,
}

impl RemoteEmbeddingProvider {
    /// Build from settings plus `EMBEDDING_ENDPOINT` / `EMBEDDING_API_KEY`.
    pub fn from_env(settings: &EmbeddingSettings) -> crate::Result<Self> {
        let endpoint = std::env::var("EMBEDDING_ENDPOINT")
            .map_err(|_| crate::Error::Config("EMBEDDING_ENDPOINT not set".to_string()))?;
        Ok(Self {
            client: reqwest::Client::new(),
            endpoint,
            api_key: std::env::var("EMBEDDING_API_KEY").ok(),
            model: settings.model.clone(),
            dimension: settings.dimension,
            max_input_chars: settings.max_input_chars,
            batch_size: settings.batch_size,
        })
    }

    fn truncated(&self, text: &str) -> String {
        text.chars().take(self.max_input_chars).collect()
    }

    async fn request(&self, inputs: Vec<String>) -> Result<Vec<Vec<f32>>> {
        let mut req = self.client.post(&self.endpoint).json(&serde_json::json!({
            "model": self.model,
            "input": inputs,
        }));
        if let Some(key) = &self.api_key {
            req = req.bearer_auth(key);
        }
        let resp = req.send().await.context("embedding request failed")?;
        if !resp.status().is_success() {
            return Err(anyhow!("embedding backend returned {}", resp.status()));
        }
        let body: EmbeddingResponse = resp.json().await.context("invalid embedding response")?;
        body.data
            .into_iter()
            .map(|d| {
                if d.embedding.len() != self.dimension {
                    return Err(anyhow!(
                        "embedding dimension mismatch: expected {}, got {}",
                        self.dimension,
                        d.embedding.len()
                    ));
                }
                Ok(l2_normalize(d.embedding))
            })
            .collect()
    }
}

#[async_trait]
impl EmbeddingProvider for RemoteEmbeddingProvider {
    async fn embed_text(&self, text: &str) -> Result<Vec<f32>> {
        let mut out = self.request(vec![self.truncated(text)]).await?;
        out.pop().ok_or_else(|| anyhow!("empty embedding response"))
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut all = Vec::with_capacity(texts.len());
        for chunk in texts.chunks(self.batch_size.max(1)) {
            let inputs = chunk.iter().map(|t| self.truncated(t)).collect();
            all.extend(self.request(inputs).await?);
        }
        Ok(all)
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}
