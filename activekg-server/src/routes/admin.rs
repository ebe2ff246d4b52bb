//! Admin endpoints: migrations, forced refresh, anomaly queries.

use std::sync::Arc;

use activekg_core::refresh::is_due;
use activekg_core::storage::{EventFilter, GraphStore};
use activekg_core::types::{EventType, RequestContext};
use activekg_core::Error;
use axum::extract::State;
use axum::http::HeaderMap;
use axum::response::Response;
use axum::Json;
use chrono::Utc;
use serde::Deserialize;
use serde_json::{json, Value};
use uuid::Uuid;

use crate::error::ApiResult;
use crate::state::AppState;

/// `POST /admin/migrate`
pub async fn migrate(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> ApiResult<Response> {
    let guarded = state
        .guard("admin_migrate", &headers, Some("admin:migrate"), false)
        .await?;
    state
        .store
        .migrate()
        .await
        .map_err(|e| state.err("admin_migrate", e))?;
    state
        .store
        .ensure_vector_index()
        .await
        .map_err(|e| state.err("admin_migrate", e))?;
    Ok(guarded.respond(Json(json!({ "status": "migrated" }))))
}

/// `POST /admin/refresh`: body is a node id list (force) or empty (all
/// due). Events emitted through this path carry the admin actor and
/// `manual_trigger = true`.
pub async fn refresh(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Option<Json<Vec<Uuid>>>,
) -> ApiResult<Response> {
    let guarded = state
        .guard("admin_refresh", &headers, Some("admin:refresh"), false)
        .await?;

    let admin_ctx = RequestContext {
        tenant_id: guarded.ctx.tenant_id.clone(),
        actor_id: "admin".to_string(),
        actor_type: "user".to_string(),
        scopes: guarded.ctx.scopes.clone(),
    };
    let ids = body.map(|Json(ids)| ids).unwrap_or_default();
    let outcomes = state
        .scheduler
        .admin_refresh(&admin_ctx, &ids)
        .await
        .map_err(|e| state.err("admin_refresh", e))?;
    Ok(guarded.respond(Json(json!({
        "refreshed": outcomes.len(),
        "outcomes": outcomes,
    }))))
}

/// `POST /admin/triggers/run`: full trigger scan across all nodes.
/// Expensive; the hot path is the targeted run after each refresh.
pub async fn run_triggers(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> ApiResult<Response> {
    let guarded = state
        .guard("admin_triggers_run", &headers, Some("admin:refresh"), false)
        .await?;
    let fired = state
        .triggers
        .run()
        .await
        .map_err(|e| state.err("admin_triggers_run", e))?;
    Ok(guarded.respond(Json(json!({ "fired": fired }))))
}

/// `POST /admin/anomalies` request body.
#[derive(Debug, Deserialize)]
pub struct AnomalyQuery {
    /// `scheduler_lag` or `drift_spike`
    pub kind: String,
    #[serde(default = "default_threshold")]
    pub threshold: f64,
    #[serde(default = "default_limit")]
    pub limit: usize,
}

fn default_threshold() -> f64 {
    0.3
}

fn default_limit() -> usize {
    100
}

/// `POST /admin/anomalies`: overdue nodes or recent drift spikes for the
/// caller's tenant.
pub async fn anomalies(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(query): Json<AnomalyQuery>,
) -> ApiResult<Response> {
    let guarded = state
        .guard("admin_anomalies", &headers, Some("admin:migrate"), false)
        .await?;

    let entries: Vec<Value> = match query.kind.as_str() {
        "scheduler_lag" => {
            let now = Utc::now();
            state
                .store
                .refresh_candidates(&guarded.ctx, query.limit.min(1000))
                .await
                .map_err(|e| state.err("admin_anomalies", e))?
                .into_iter()
                .filter(|node| {
                    node.refresh_policy
                        .as_ref()
                        .is_some_and(|policy| is_due(policy, node.last_refreshed, now))
                })
                .map(|node| {
                    json!({
                        "node_id": node.id,
                        "last_refreshed": node.last_refreshed,
                        "refresh_policy": node.refresh_policy,
                    })
                })
                .collect()
        }
        "drift_spike" => state
            .store
            .list_events(
                &guarded.ctx,
                &EventFilter {
                    node_id: None,
                    event_type: Some(EventType::Refreshed),
                    limit: 500,
                },
            )
            .await
            .map_err(|e| state.err("admin_anomalies", e))?
            .into_iter()
            .filter(|event| {
                event
                    .payload
                    .get("drift_score")
                    .and_then(Value::as_f64)
                    .is_some_and(|drift| drift >= query.threshold)
            })
            .take(query.limit)
            .map(|event| {
                json!({
                    "node_id": event.node_id,
                    "drift_score": event.payload.get("drift_score"),
                    "at": event.created_at,
                })
            })
            .collect(),
        other => {
            return Err(state.err(
                "admin_anomalies",
                Error::Validation(format!("unknown anomaly kind: {other}")),
            ))
        }
    };

    let count = entries.len();
    Ok(guarded.respond(Json(json!({
        "kind": query.kind,
        "entries": entries,
        "count": count,
    }))))
}
