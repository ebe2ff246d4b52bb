//! Search endpoint.

use std::sync::Arc;

use activekg_core::retrieval::SearchRequest;
use axum::extract::State;
use axum::http::HeaderMap;
use axum::response::Response;
use axum::Json;

use crate::error::ApiResult;
use crate::state::AppState;

/// `POST /search`
pub async fn search(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(body): Json<SearchRequest>,
) -> ApiResult<Response> {
    let guarded = state
        .guard("search", &headers, Some("search:read"), false)
        .await?;
    state.note_cross_tenant(&guarded.ctx, body.tenant_id.as_deref(), "cross_tenant_body");

    let response = state
        .retrieval
        .search(&guarded.ctx, body)
        .await
        .map_err(|e| state.err("search", e))?;
    Ok(guarded.respond(Json(response)))
}
