//! HTTP route handlers.

pub mod admin;
pub mod ask;
pub mod connectors_admin;
pub mod events;
pub mod health;
pub mod lineage;
pub mod metrics;
pub mod nodes;
pub mod search;
pub mod triggers;
pub mod webhooks;

use std::sync::Arc;

use axum::routing::{delete, get, post};
use axum::Router;
use tower_http::trace::TraceLayer;

use crate::state::AppState;

/// Assemble the full API router.
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health::health))
        .route("/metrics", get(metrics::metrics_json))
        .route("/prometheus", get(metrics::prometheus))
        .route("/nodes", post(nodes::create).get(nodes::list))
        .route(
            "/nodes/:id",
            get(nodes::get_one).put(nodes::update).delete(nodes::remove),
        )
        .route("/nodes/:id/versions", get(nodes::versions))
        .route("/edges", post(nodes::create_edge))
        .route("/search", post(search::search))
        .route("/ask", post(ask::ask))
        .route("/ask/stream", post(ask::ask_stream))
        .route("/events", get(events::list))
        .route("/lineage/:id", get(lineage::lineage))
        .route("/triggers", get(triggers::list).post(triggers::create))
        .route("/triggers/:name", delete(triggers::remove))
        .route("/admin/migrate", post(admin::migrate))
        .route("/admin/refresh", post(admin::refresh))
        .route("/admin/triggers/run", post(admin::run_triggers))
        .route("/admin/anomalies", post(admin::anomalies))
        .route(
            "/_admin/connectors/:provider/register",
            post(connectors_admin::register),
        )
        .route(
            "/_admin/connectors/:provider/enable",
            post(connectors_admin::enable),
        )
        .route(
            "/_admin/connectors/:provider/disable",
            post(connectors_admin::disable),
        )
        .route(
            "/_admin/connectors/:provider/backfill",
            post(connectors_admin::backfill),
        )
        .route(
            "/_admin/connectors/rotate_keys",
            post(connectors_admin::rotate_keys),
        )
        .route(
            "/_admin/connectors/purge_deleted",
            post(connectors_admin::purge_deleted),
        )
        .route(
            "/_admin/connectors/cache/health",
            get(connectors_admin::cache_health),
        )
        .route("/_webhooks/s3", post(webhooks::s3))
        .route("/_webhooks/gcs", post(webhooks::gcs))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
