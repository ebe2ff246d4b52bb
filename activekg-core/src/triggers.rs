//! Similarity-pattern trigger evaluation.
//!
//! Each node may carry triggers `[{name, threshold}]`; named pattern vectors
//! live in storage. When a node's embedding scores at or above a trigger's
//! threshold against the pattern, a `trigger_fired` event is appended with
//! `actor_type = "trigger"`. Missing patterns are skipped silently.

use std::sync::Arc;
use std::time::Instant;

use serde_json::json;
use tracing::{debug, info};
use uuid::Uuid;

use crate::embeddings::cosine_similarity;
use crate::storage::{GraphStore, NewEvent};
use crate::types::{EventType, Node, RequestContext};
use crate::{Result, Telemetry};

/// Page size for the full-scan path.
const SCAN_PAGE: usize = 500;

/// Evaluates per-node triggers against named pattern embeddings.
pub struct TriggerEngine {
    store: Arc<dyn GraphStore>,
    telemetry: Telemetry,
}

impl TriggerEngine {
    /// Create a trigger engine over a store.
    pub fn new(store: Arc<dyn GraphStore>, telemetry: Telemetry) -> Self {
        Self { store, telemetry }
    }

    /// Run triggers for all nodes (full scan; admin-only, expensive).
    ///
    /// Returns the number of triggers fired.
    pub async fn run(&self) -> Result<u64> {
        let started = Instant::now();
        let mut fired = 0u64;
        let mut offset = 0usize;

        loop {
            let page = self.store.nodes_with_triggers(SCAN_PAGE, offset).await?;
            if page.is_empty() {
                break;
            }
            offset += page.len();
            for node in &page {
                fired += self.evaluate(node, "full").await?;
            }
        }

        self.telemetry
            .counter_with("trigger_runs_total", &[("mode", "full")])
            .increment();
        self.telemetry
            .histogram_with("trigger_run_seconds", &[("mode", "full")])
            .observe(started.elapsed());
        info!(fired, "trigger full scan complete");
        Ok(fired)
    }

    /// Run triggers for specific nodes (hot path invoked post-refresh).
    ///
    /// Returns the number of triggers fired.
    pub async fn run_for(&self, ctx: &RequestContext, node_ids: &[Uuid]) -> Result<u64> {
        let started = Instant::now();
        let mut fired = 0u64;

        for id in node_ids {
            let Some(node) = self.store.get_node(ctx, *id).await? else {
                continue;
            };
            fired += self.evaluate(&node, "targeted").await?;
        }

        self.telemetry
            .counter_with("trigger_runs_total", &[("mode", "targeted")])
            .increment();
        self.telemetry
            .histogram_with("trigger_run_seconds", &[("mode", "targeted")])
            .observe(started.elapsed());
        debug!(node_count = node_ids.len(), fired, "trigger run_for complete");
        Ok(fired)
    }

    async fn evaluate(&self, node: &Node, mode: &str) -> Result<u64> {
        let Some(embedding) = node.embedding.as_deref() else {
            return Ok(0);
        };
        if node.triggers.is_empty() {
            return Ok(0);
        }

        let ctx = RequestContext::trigger(node.tenant_id.clone());
        let mut fired = 0u64;

        for spec in &node.triggers {
            let Some(pattern) = self.store.get_pattern(&ctx, &spec.name).await? else {
                continue;
            };
            let similarity = cosine_similarity(embedding, &pattern.embedding);
            if similarity >= spec.threshold {
                self.store
                    .append_event(
                        &ctx,
                        node.id,
                        NewEvent {
                            event_type: EventType::TriggerFired,
                            payload: json!({
                                "trigger": spec.name,
                                "similarity": similarity,
                            }),
                        },
                    )
                    .await?;
                self.telemetry
                    .counter_with(
                        "triggers_fired_total",
                        &[("pattern", spec.name.as_str()), ("mode", mode)],
                    )
                    .increment();
                fired += 1;
            }
        }

        Ok(fired)
    }
}
