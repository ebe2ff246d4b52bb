//! Active refresh: due-node selection and drift-gated re-embedding.
//!
//! A single cooperative background task wakes on a short tick, scans for due
//! nodes in bounded per-tenant batches, re-embeds them, and gates `refreshed`
//! event emission on drift. Concurrency lives in the ingestion workers, not
//! here.

pub mod due;
pub mod payload;

pub use due::{is_due, parse_cron, parse_interval};
pub use payload::{PayloadLoader, RemoteFetcher};

use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use parking_lot::Mutex;
use serde_json::json;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::SchedulerSettings;
use crate::embeddings::{drift_score, EmbeddingProvider};
use crate::storage::{GraphStore, NewEvent, RefreshStateUpdate};
use crate::triggers::TriggerEngine;
use crate::types::{EventType, Node, RequestContext};
use crate::{Error, Result, Telemetry};

/// Outcome of refreshing a single node.
#[derive(Debug, Clone, serde::Serialize)]
pub struct RefreshOutcome {
    pub node_id: Uuid,
    pub drift_score: f64,
    pub threshold_exceeded: bool,
    pub event_emitted: bool,
    pub error: Option<String>,
}

/// Totals for one scheduler cycle.
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct CycleStats {
    pub scanned: u64,
    pub refreshed: u64,
    pub errors: u64,
}

/// The background refresh scheduler.
pub struct RefreshScheduler {
    store: Arc<dyn GraphStore>,
    embedder: Arc<dyn EmbeddingProvider>,
    triggers: Arc<TriggerEngine>,
    payloads: PayloadLoader,
    telemetry: Telemetry,
    settings: SchedulerSettings,
    last_cycle: Mutex<Option<Instant>>,
}

impl RefreshScheduler {
    /// Create a scheduler; call [`RefreshScheduler::spawn`] to start it.
    pub fn new(
        store: Arc<dyn GraphStore>,
        embedder: Arc<dyn EmbeddingProvider>,
        triggers: Arc<TriggerEngine>,
        payloads: PayloadLoader,
        telemetry: Telemetry,
        settings: SchedulerSettings,
    ) -> Self {
        Self {
            store,
            embedder,
            triggers,
            payloads,
            telemetry,
            settings,
            last_cycle: Mutex::new(None),
        }
    }

    /// Start the background loop. Send `true` on the returned channel (or
    /// drop it) to stop the loop at the next tick.
    pub fn spawn(self: &Arc<Self>) -> (watch::Sender<bool>, JoinHandle<()>) {
        let (stop_tx, stop_rx) = watch::channel(false);
        let scheduler = Arc::clone(self);
        let handle = tokio::spawn(async move {
            scheduler.run_loop(stop_rx).await;
        });
        (stop_tx, handle)
    }

    async fn run_loop(&self, mut stop: watch::Receiver<bool>) {
        let tick = std::time::Duration::from_secs(self.settings.tick_secs.max(1));
        info!(tick_secs = self.settings.tick_secs, "refresh scheduler started");
        loop {
            tokio::select! {
                () = tokio::time::sleep(tick) => {
                    match self.run_cycle().await {
                        Ok(stats) if stats.scanned > 0 => {
                            debug!(?stats, "refresh cycle complete");
                        }
                        Ok(_) => {}
                        Err(e) => error!(error = %e, "refresh cycle failed"),
                    }
                }
                _ = stop.changed() => {
                    info!("refresh scheduler stopping");
                    break;
                }
            }
        }
    }

    /// Scan every tenant with refresh policies and process due nodes in
    /// bounded batches.
    pub async fn run_cycle(&self) -> Result<CycleStats> {
        {
            let mut last = self.last_cycle.lock();
            if let Some(prev) = *last {
                self.telemetry
                    .histogram("scheduler_inter_run_seconds")
                    .observe(prev.elapsed());
            }
            *last = Some(Instant::now());
        }

        let mut stats = CycleStats::default();
        let now = Utc::now();

        for tenant in self.store.tenants_with_policies().await? {
            let ctx = RequestContext::system(tenant);
            let candidates = self
                .store
                .refresh_candidates(&ctx, self.settings.batch_per_tenant)
                .await?;

            for node in candidates {
                let Some(policy) = node.refresh_policy.as_ref() else {
                    continue;
                };
                if !is_due(policy, node.last_refreshed, now) {
                    continue;
                }
                stats.scanned += 1;
                match self.refresh_node(&ctx, &node, false).await {
                    Ok(_) => stats.refreshed += 1,
                    Err(e) => {
                        stats.errors += 1;
                        warn!(node_id = %node.id, error = %e, "node refresh failed");
                    }
                }
            }
        }

        self.telemetry
            .counter("scheduler_cycles_total")
            .increment();
        self.telemetry
            .counter("scheduler_nodes_refreshed_total")
            .add(stats.refreshed);
        self.telemetry
            .counter("scheduler_node_errors_total")
            .add(stats.errors);
        Ok(stats)
    }

    /// Refresh one node: resolve text, re-embed, persist state and history,
    /// emit the drift-gated `refreshed` event, and evaluate triggers.
    ///
    /// `manual_trigger` forces event emission regardless of drift and is set
    /// by the admin refresh path.
    pub async fn refresh_node(
        &self,
        ctx: &RequestContext,
        node: &Node,
        manual_trigger: bool,
    ) -> Result<RefreshOutcome> {
        let started = Instant::now();
        let result = self.refresh_inner(ctx, node, manual_trigger).await;
        let label = if result.is_ok() { "ok" } else { "error" };
        self.telemetry
            .histogram_with("refresh_node_seconds", &[("result", label)])
            .observe(started.elapsed());
        result
    }

    async fn refresh_inner(
        &self,
        ctx: &RequestContext,
        node: &Node,
        manual_trigger: bool,
    ) -> Result<RefreshOutcome> {
        let text = self.payloads.resolve(node).await?;
        let new_embedding = self
            .embedder
            .embed_text(&text)
            .await
            .map_err(Error::Embedding)?;

        let drift = drift_score(node.embedding.as_deref(), &new_embedding);
        let now = Utc::now();

        self.store
            .set_refresh_state(
                ctx,
                node.id,
                RefreshStateUpdate {
                    embedding: new_embedding,
                    drift_score: drift,
                    last_refreshed: now,
                },
            )
            .await?;
        self.store
            .write_embedding_history(ctx, node.id, drift, node.payload_ref.as_deref())
            .await?;

        let threshold = node
            .refresh_policy
            .as_ref()
            .and_then(|p| p.drift_threshold);
        let threshold_exceeded = threshold.is_some_and(|t| drift >= t);
        let emit = threshold_exceeded || manual_trigger;

        if emit {
            self.store
                .append_event(
                    ctx,
                    node.id,
                    NewEvent {
                        event_type: EventType::Refreshed,
                        payload: json!({
                            "drift_score": drift,
                            "threshold": threshold,
                            "threshold_exceeded": threshold_exceeded,
                            "manual_trigger": manual_trigger,
                        }),
                    },
                )
                .await?;
        }

        self.triggers.run_for(ctx, &[node.id]).await?;

        Ok(RefreshOutcome {
            node_id: node.id,
            drift_score: drift,
            threshold_exceeded,
            event_emitted: emit,
            error: None,
        })
    }

    /// Admin refresh: force the listed nodes regardless of due state, or
    /// process everything currently due when `ids` is empty.
    ///
    /// Events emitted through this path carry `actor_type = "user"`,
    /// `actor_id = "admin"`, and `manual_trigger = true`.
    pub async fn admin_refresh(
        &self,
        ctx: &RequestContext,
        ids: &[Uuid],
    ) -> Result<Vec<RefreshOutcome>> {
        if ids.is_empty() {
            let stats = self.run_cycle().await?;
            info!(?stats, "admin refresh of all due nodes complete");
            return Ok(Vec::new());
        }

        let mut outcomes = Vec::with_capacity(ids.len());
        for id in ids {
            let Some(node) = self.store.get_node(ctx, *id).await? else {
                outcomes.push(RefreshOutcome {
                    node_id: *id,
                    drift_score: 0.0,
                    threshold_exceeded: false,
                    event_emitted: false,
                    error: Some("not found".to_string()),
                });
                continue;
            };
            match self.refresh_node(ctx, &node, true).await {
                Ok(outcome) => outcomes.push(outcome),
                Err(e) => outcomes.push(RefreshOutcome {
                    node_id: *id,
                    drift_score: 0.0,
                    threshold_exceeded: false,
                    event_emitted: false,
                    error: Some(e.to_string()),
                }),
            }
        }
        Ok(outcomes)
    }
}
