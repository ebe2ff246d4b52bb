//! Lineage traversal endpoint.

use std::sync::Arc;

use activekg_core::storage::GraphStore;
use axum::extract::{Path, Query, State};
use axum::http::HeaderMap;
use axum::response::Response;
use axum::Json;
use serde::Deserialize;
use serde_json::json;
use uuid::Uuid;

use crate::error::ApiResult;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct LineageParams {
    #[serde(default = "default_depth")]
    pub max_depth: u32,
}

fn default_depth() -> u32 {
    5
}

/// `GET /lineage/{id}?max_depth`: `DERIVED_FROM` ancestors in depth order.
pub async fn lineage(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
    Query(params): Query<LineageParams>,
) -> ApiResult<Response> {
    let guarded = state
        .guard("lineage", &headers, Some("nodes:read"), false)
        .await?;
    let ancestors = state
        .store
        .get_lineage(&guarded.ctx, id, params.max_depth.min(32))
        .await
        .map_err(|e| state.err("lineage", e))?;
    Ok(guarded.respond(Json(json!({ "ancestors": ancestors }))))
}
