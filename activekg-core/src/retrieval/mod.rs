//! Hybrid retrieval and the cited question-answering pipeline.

pub mod llm;

pub use llm::{ContextPassage, ExtractiveLlm, LlmClient};

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::OnceLock;
use std::time::Instant;

use chrono::Utc;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::config::RetrievalSettings;
use crate::embeddings::EmbeddingProvider;
use crate::search::{apply_decay, rrf_fuse, weighted_fuse, DecayParams, FusedHit, Reranker};
use crate::storage::{GraphStore, SearchFilters};
use crate::types::{Node, RequestContext, ScoreType};
use crate::{Error, Result, Telemetry};

/// Search request body.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SearchRequest {
    pub query: String,
    #[serde(default)]
    pub top_k: Option<usize>,
    /// Combine vector and lexical retrieval (fusion mode is process-wide)
    #[serde(default)]
    pub use_hybrid: bool,
    /// Apply recency/drift decay reweighting to the ranking
    #[serde(default)]
    pub use_weighted_score: bool,
    #[serde(default)]
    pub filters: Option<SearchFiltersBody>,
    /// Ignored when JWT is enabled; the surface counts mismatches
    #[serde(default)]
    pub tenant_id: Option<String>,
}

/// Wire shape of search filters.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SearchFiltersBody {
    #[serde(default)]
    pub classes: Vec<String>,
    #[serde(default)]
    pub metadata: Option<Value>,
}

impl SearchFiltersBody {
    fn into_filters(self) -> SearchFilters {
        SearchFilters {
            classes: self.classes,
            metadata: self.metadata,
            include_deleted: false,
        }
    }
}

/// One search hit on the wire.
#[derive(Debug, Clone, Serialize)]
pub struct SearchHit {
    pub id: Uuid,
    pub classes: Vec<String>,
    pub props: Value,
    pub metadata: Value,
    pub similarity: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vector_score: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lexical_score: Option<f32>,
}

/// Search response with the scoring contract metadata.
#[derive(Debug, Clone, Serialize)]
pub struct SearchResponse {
    pub results: Vec<SearchHit>,
    pub metadata: SearchMetadata,
}

/// Search response metadata.
#[derive(Debug, Clone, Serialize)]
pub struct SearchMetadata {
    pub score_type: ScoreType,
    pub count: usize,
    pub reranked: bool,
}

/// Ask request body.
#[derive(Debug, Clone, Deserialize)]
pub struct AskRequest {
    pub question: String,
    #[serde(default)]
    pub top_k: Option<usize>,
    /// Ignored when JWT is enabled; the surface counts mismatches
    #[serde(default)]
    pub tenant_id: Option<String>,
}

/// One citation in an answer.
#[derive(Debug, Clone, Serialize)]
pub struct Citation {
    /// 1-based index referenced as `[index]` in the answer
    pub index: usize,
    pub node_id: Uuid,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
}

/// Ask response metadata.
#[derive(Debug, Clone, Serialize)]
pub struct AskMetadata {
    pub gating_score: f32,
    pub gating_score_type: ScoreType,
    pub cited_nodes: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Non-streaming ask response.
#[derive(Debug, Clone, Serialize)]
pub struct AskResponse {
    pub answer: String,
    pub citations: Vec<Citation>,
    pub confidence: f32,
    pub metadata: AskMetadata,
}

/// Streaming ask handle: metadata computed up-front plus the token channel.
pub struct AskStream {
    pub metadata: AskMetadata,
    /// Candidate citations in context order; the stream carries the markers
    pub contexts: Vec<Citation>,
    pub tokens: mpsc::Receiver<String>,
}

/// Internal ranked hit with per-retriever components.
#[derive(Debug, Clone)]
struct RankedNode {
    node: Node,
    score: f32,
    vector_score: Option<f32>,
    lexical_score: Option<f32>,
}

/// Hybrid retrieval engine: search plus the gated, cited ask pipeline.
pub struct RetrievalEngine {
    store: Arc<dyn GraphStore>,
    embedder: Arc<dyn EmbeddingProvider>,
    llm: Arc<dyn LlmClient>,
    reranker: Option<Arc<dyn Reranker>>,
    telemetry: Telemetry,
    settings: RetrievalSettings,
}

fn citation_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\[(\d+)\]").expect("static regex"))
}

impl RetrievalEngine {
    /// Create the engine.
    pub fn new(
        store: Arc<dyn GraphStore>,
        embedder: Arc<dyn EmbeddingProvider>,
        llm: Arc<dyn LlmClient>,
        reranker: Option<Arc<dyn Reranker>>,
        telemetry: Telemetry,
        settings: RetrievalSettings,
    ) -> Self {
        Self {
            store,
            embedder,
            llm,
            reranker,
            telemetry,
            settings,
        }
    }

    /// Which score type the given request resolves to under process config.
    #[must_use]
    pub fn score_type_for(&self, use_hybrid: bool) -> ScoreType {
        if !use_hybrid {
            ScoreType::Cosine
        } else if self.settings.hybrid_rrf_enabled {
            ScoreType::RrfFused
        } else {
            ScoreType::WeightedFused
        }
    }

    /// Execute a search request.
    pub async fn search(
        &self,
        ctx: &RequestContext,
        req: SearchRequest,
    ) -> Result<SearchResponse> {
        let started = Instant::now();
        let score_type = self.score_type_for(req.use_hybrid);
        let top_k = req.top_k.unwrap_or(self.settings.default_top_k).max(1);
        let filters = req.filters.clone().unwrap_or_default().into_filters();

        if req.query.trim().is_empty() {
            return Ok(SearchResponse {
                results: Vec::new(),
                metadata: SearchMetadata {
                    score_type,
                    count: 0,
                    reranked: false,
                },
            });
        }

        let mut hits = self
            .retrieve(ctx, &req.query, top_k, req.use_hybrid, &filters)
            .await?;

        if req.use_weighted_score {
            let params = DecayParams {
                lambda: self.settings.decay_lambda,
                beta: self.settings.decay_beta,
            };
            let now = Utc::now();
            for hit in &mut hits {
                hit.score = apply_decay(
                    hit.score,
                    Some(hit.node.updated_at),
                    hit.node.drift_score,
                    params,
                    now,
                );
            }
            hits.sort_by(|a, b| {
                b.score
                    .partial_cmp(&a.score)
                    .unwrap_or(std::cmp::Ordering::Equal)
            });
        }

        let reranked = self.maybe_rerank(&req.query, &mut hits).await;
        hits.truncate(top_k);

        let results: Vec<SearchHit> = hits
            .into_iter()
            .map(|hit| SearchHit {
                id: hit.node.id,
                classes: hit.node.classes,
                props: hit.node.props,
                metadata: hit.node.metadata,
                similarity: hit.score,
                vector_score: hit.vector_score,
                lexical_score: hit.lexical_score,
            })
            .collect();

        self.telemetry
            .histogram_with(
                "search_latency_seconds",
                &[
                    ("score_type", score_type.as_str()),
                    ("reranked", if reranked { "true" } else { "false" }),
                ],
            )
            .observe(started.elapsed());

        Ok(SearchResponse {
            metadata: SearchMetadata {
                score_type,
                count: results.len(),
                reranked,
            },
            results,
        })
    }

    /// Retrieve ranked hits in the scale of the active mode.
    async fn retrieve(
        &self,
        ctx: &RequestContext,
        query: &str,
        top_k: usize,
        use_hybrid: bool,
        filters: &SearchFilters,
    ) -> Result<Vec<RankedNode>> {
        let qvec = self
            .embedder
            .embed_text(query)
            .await
            .map_err(Error::Embedding)?;

        if !use_hybrid {
            let hits = self.store.vector_search(ctx, &qvec, top_k, filters).await?;
            return Ok(hits
                .into_iter()
                .map(|(node, score)| RankedNode {
                    node,
                    score,
                    vector_score: Some(score),
                    lexical_score: None,
                })
                .collect());
        }

        // Over-fetch each retriever so fusion has candidates to work with
        let fetch_k = (top_k * 2).max(20);
        let vector = self
            .store
            .vector_search(ctx, &qvec, fetch_k, filters)
            .await?;
        let lexical = self
            .store
            .lexical_search(ctx, query, fetch_k, filters)
            .await?;

        let mut nodes: HashMap<Uuid, Node> = HashMap::new();
        let vector_ranked: Vec<(Uuid, f32)> = vector
            .into_iter()
            .map(|(n, s)| {
                let id = n.id;
                nodes.insert(id, n);
                (id, s)
            })
            .collect();
        let lexical_ranked: Vec<(Uuid, f32)> = lexical
            .into_iter()
            .map(|(n, s)| {
                let id = n.id;
                nodes.entry(id).or_insert(n);
                (id, s)
            })
            .collect();

        let fused: Vec<FusedHit> = if self.settings.hybrid_rrf_enabled {
            rrf_fuse(&vector_ranked, &lexical_ranked, self.settings.rrf_k)
        } else {
            weighted_fuse(
                &vector_ranked,
                &lexical_ranked,
                self.settings.vector_weight,
                self.settings.lexical_weight,
            )
        };

        Ok(fused
            .into_iter()
            .filter_map(|hit| {
                nodes.remove(&hit.id).map(|node| RankedNode {
                    node,
                    score: hit.score,
                    vector_score: hit.vector_score,
                    lexical_score: hit.lexical_score,
                })
            })
            .collect())
    }

    /// Rerank the top-N in place. Returns whether reranking was applied;
    /// falls back to the base order when the backend fails.
    async fn maybe_rerank(&self, query: &str, hits: &mut [RankedNode]) -> bool {
        let Some(reranker) = (self.settings.rerank_enabled)
            .then_some(self.reranker.as_ref())
            .flatten()
        else {
            return false;
        };
        let n = hits.len().min(self.settings.rerank_top_n);
        if n == 0 {
            return false;
        }

        let passages: Vec<String> = hits[..n]
            .iter()
            .map(|hit| hit.node.text().unwrap_or_default().to_string())
            .collect();
        match reranker.score(query, &passages).await {
            Ok(scores) => {
                let mut order: Vec<usize> = (0..n).collect();
                order.sort_by(|&a, &b| {
                    scores[b]
                        .partial_cmp(&scores[a])
                        .unwrap_or(std::cmp::Ordering::Equal)
                });
                let mut reordered: Vec<RankedNode> =
                    order.into_iter().map(|i| hits[i].clone()).collect();
                for (slot, item) in hits[..n].iter_mut().zip(reordered.drain(..)) {
                    *slot = item;
                }
                true
            }
            Err(e) => {
                warn!(error = %e, backend = reranker.name(), "reranker unavailable, using base score");
                false
            }
        }
    }

    fn normalized_gate(&self, score: f32, score_type: ScoreType) -> f32 {
        match score_type {
            ScoreType::Cosine | ScoreType::WeightedFused | ScoreType::Lexical => {
                score.clamp(0.0, 1.0)
            }
            ScoreType::RrfFused => {
                let max = 2.0 / (self.settings.rrf_k + 1.0);
                (score / max).clamp(0.0, 1.0)
            }
        }
    }

    fn gate_threshold(&self, score_type: ScoreType) -> f32 {
        match score_type {
            ScoreType::RrfFused => self.settings.gating.rrf,
            ScoreType::WeightedFused => self.settings.gating.weighted,
            ScoreType::Cosine | ScoreType::Lexical => self.settings.gating.cosine,
        }
    }

    fn build_contexts(hits: &[RankedNode]) -> (Vec<ContextPassage>, Vec<Citation>) {
        let mut passages = Vec::with_capacity(hits.len());
        let mut citations = Vec::with_capacity(hits.len());
        for (i, hit) in hits.iter().enumerate() {
            let index = i + 1;
            let title = hit
                .node
                .props
                .get("title")
                .and_then(Value::as_str)
                .map(String::from);
            passages.push(ContextPassage {
                index,
                title: title.clone(),
                text: hit.node.text().unwrap_or_default().to_string(),
            });
            citations.push(Citation {
                index,
                node_id: hit.node.id,
                title,
            });
        }
        (passages, citations)
    }

    /// Answer a question with citations (non-streaming).
    pub async fn ask(&self, ctx: &RequestContext, req: AskRequest) -> Result<AskResponse> {
        let started = Instant::now();
        let stream = self.ask_stream(ctx, req).await?;
        let score_type = stream.metadata.gating_score_type;

        let mut tokens = stream.tokens;
        let mut answer = String::new();
        let mut first_chunk_recorded = false;
        while let Some(token) = tokens.recv().await {
            if !first_chunk_recorded {
                first_chunk_recorded = true;
                self.telemetry
                    .histogram_with(
                        "ask_first_chunk_seconds",
                        &[("score_type", score_type.as_str())],
                    )
                    .observe(started.elapsed());
            }
            answer.push_str(&token);
        }

        let cited: Vec<Citation> = {
            let mut seen = std::collections::BTreeSet::new();
            for cap in citation_regex().captures_iter(&answer) {
                if let Ok(idx) = cap[1].parse::<usize>() {
                    seen.insert(idx);
                }
            }
            stream
                .contexts
                .iter()
                .filter(|c| seen.contains(&c.index))
                .cloned()
                .collect()
        };

        self.telemetry
            .histogram_with(
                "ask_citation_count",
                &[("score_type", score_type.as_str())],
            )
            .observe_value(cited.len() as f64);
        self.telemetry
            .histogram_with(
                "ask_latency_seconds",
                &[("score_type", score_type.as_str()), ("reranked", "false")],
            )
            .observe(started.elapsed());

        let confidence = if stream.metadata.reason.is_some() {
            0.0
        } else {
            self.normalized_gate(stream.metadata.gating_score, score_type)
        };

        Ok(AskResponse {
            answer,
            confidence,
            metadata: AskMetadata {
                cited_nodes: cited.len(),
                ..stream.metadata
            },
            citations: cited,
        })
    }

    /// Answer a question as a token stream for SSE forwarding.
    ///
    /// Gating happens before any token is produced: a top score below the
    /// extremely-low threshold short-circuits into the canned refusal.
    pub async fn ask_stream(&self, ctx: &RequestContext, req: AskRequest) -> Result<AskStream> {
        let score_type = self.score_type_for(true);
        let top_k = req.top_k.unwrap_or(self.settings.default_top_k).max(1);

        let hits = if req.question.trim().is_empty() {
            Vec::new()
        } else {
            self.retrieve(
                ctx,
                &req.question,
                top_k,
                true,
                &SearchFilters::default(),
            )
            .await?
        };

        let gating_score = hits.first().map_or(0.0, |hit| hit.score);
        self.telemetry
            .histogram_with("gating_score", &[("score_type", score_type.as_str())])
            .observe_value(f64::from(gating_score));

        let reason = if hits.is_empty() {
            Some("no_results".to_string())
        } else if gating_score < self.gate_threshold(score_type) {
            Some("low_relevance".to_string())
        } else {
            None
        };

        if let Some(reason) = reason {
            self.telemetry
                .counter_with("ask_rejections_total", &[("reason", reason.as_str())])
                .increment();
            debug!(gating_score = f64::from(gating_score), reason = %reason, "ask gated out");
            let (tx, rx) = mpsc::channel(4);
            let _ = tx
                .send("No information available in the knowledge base for this question."
                    .to_string())
                .await;
            return Ok(AskStream {
                metadata: AskMetadata {
                    gating_score,
                    gating_score_type: score_type,
                    cited_nodes: 0,
                    reason: Some(reason),
                },
                contexts: Vec::new(),
                tokens: rx,
            });
        }

        let (passages, citations) = Self::build_contexts(&hits);
        let llm_rx = self
            .llm
            .stream_answer(&req.question, &passages)
            .await
            .map_err(|e| Error::Dependency(format!("llm backend: {e}")))?;

        Ok(AskStream {
            metadata: AskMetadata {
                gating_score,
                gating_score_type: score_type,
                cited_nodes: citations.len(),
                reason: None,
            },
            contexts: citations,
            tokens: llm_rx,
        })
    }
}
