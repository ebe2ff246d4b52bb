//! Metrics endpoints: JSON snapshot and Prometheus exposition.

use std::sync::Arc;

use axum::extract::State;
use axum::http::header;
use axum::response::IntoResponse;
use axum::Json;

use crate::state::AppState;

/// `GET /metrics`
pub async fn metrics_json(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.telemetry.snapshot())
}

/// `GET /prometheus`
pub async fn prometheus(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        state.telemetry.render_prometheus(),
    )
}
