//! Event listing endpoint.

use std::sync::Arc;

use activekg_core::storage::{EventFilter, GraphStore};
use activekg_core::types::EventType;
use axum::extract::{Query, State};
use axum::http::HeaderMap;
use axum::response::Response;
use axum::Json;
use serde::Deserialize;
use serde_json::json;
use uuid::Uuid;

use crate::error::ApiResult;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct EventParams {
    #[serde(default)]
    pub node_id: Option<Uuid>,
    #[serde(default)]
    pub event_type: Option<String>,
    #[serde(default = "default_limit")]
    pub limit: usize,
}

fn default_limit() -> usize {
    50
}

/// `GET /events?node_id&event_type&limit`: newest first.
pub async fn list(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(params): Query<EventParams>,
) -> ApiResult<Response> {
    let guarded = state
        .guard("events_list", &headers, Some("nodes:read"), false)
        .await?;

    let event_type: Option<EventType> = params
        .event_type
        .as_deref()
        .map(str::parse)
        .transpose()
        .map_err(|e| state.err("events_list", e))?;

    let events = state
        .store
        .list_events(
            &guarded.ctx,
            &EventFilter {
                node_id: params.node_id,
                event_type,
                limit: params.limit.min(500),
            },
        )
        .await
        .map_err(|e| state.err("events_list", e))?;
    let count = events.len();
    Ok(guarded.respond(Json(json!({ "events": events, "count": count }))))
}
