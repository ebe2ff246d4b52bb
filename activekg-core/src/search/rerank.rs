//! Optional cross-encoder reranking.

use std::collections::HashSet;

use async_trait::async_trait;

/// Trait for rerankers scoring `(query, passage)` pairs.
///
/// The production deployment plugs a cross-encoder behind this trait; when
/// the backend is unavailable callers fall back to the base fused score.
#[async_trait]
pub trait Reranker: Send + Sync {
    /// Score a batch of passages against a query. Higher is better.
    async fn score(&self, query: &str, passages: &[String]) -> anyhow::Result<Vec<f32>>;

    /// Backend identifier carried in metric labels.
    fn name(&self) -> &str;
}

/// Deterministic token-overlap reranker.
///
/// Jaccard similarity over lowercase word sets. Serves as the in-process
/// stand-in for a cross-encoder; score scale is `[0, 1]`.
#[derive(Debug, Default)]
pub struct LexicalOverlapReranker;

fn tokens(text: &str) -> HashSet<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(str::to_lowercase)
        .collect()
}

#[async_trait]
impl Reranker for LexicalOverlapReranker {
    async fn score(&self, query: &str, passages: &[String]) -> anyhow::Result<Vec<f32>> {
        let q = tokens(query);
        Ok(passages
            .iter()
            .map(|p| {
                let p = tokens(p);
                if q.is_empty() || p.is_empty() {
                    return 0.0;
                }
                let inter = q.intersection(&p).count() as f32;
                let union = q.union(&p).count() as f32;
                inter / union
            })
            .collect())
    }

    fn name(&self) -> &str {
        "lexical_overlap"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn exact_match_scores_highest() {
        let r = LexicalOverlapReranker;
        let scores = r
            .score(
                "postgres vector search",
                &[
                    "postgres vector search".to_string(),
                    "cooking with cast iron".to_string(),
                ],
            )
            .await
            .unwrap();
        assert!(scores[0] > scores[1]);
        assert!((scores[0] - 1.0).abs() < 1e-6);
    }

    #[tokio::test]
    async fn empty_query_scores_zero() {
        let r = LexicalOverlapReranker;
        let scores = r.score("", &["anything".to_string()]).await.unwrap();
        assert_eq!(scores, vec![0.0]);
    }
}
