//! Connector administration endpoints.

use std::sync::Arc;

use activekg_connectors::rotation::{rotate_keys as run_rotation, RotationRequest};
use activekg_core::kv::KvStore;
use activekg_core::storage::GraphStore;
use activekg_core::Error;
use axum::extract::{Path, State};
use axum::http::HeaderMap;
use axum::response::Response;
use axum::Json;
use chrono::Utc;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::error::ApiResult;
use crate::state::AppState;

/// `POST /_admin/connectors/{provider}/register`: validates, encrypts
/// secret fields, persists, and announces the change.
pub async fn register(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(provider): Path<String>,
    Json(config): Json<Value>,
) -> ApiResult<Response> {
    let guarded = state
        .guard("connectors_register", &headers, Some("admin:connectors"), false)
        .await?;
    state.note_cross_tenant(
        &guarded.ctx,
        config.get("tenant_id").and_then(Value::as_str),
        "cross_tenant_body",
    );

    state
        .config_store
        .upsert(&guarded.ctx.tenant_id, &provider, &config)
        .await
        .map_err(|e| state.err("connectors_register", e))?;
    let tenant_id = guarded.ctx.tenant_id.clone();
    Ok(guarded.respond(Json(json!({
        "status": "registered",
        "provider": provider,
        "tenant_id": tenant_id,
    }))))
}

async fn toggle(
    state: &Arc<AppState>,
    headers: &HeaderMap,
    provider: &str,
    enabled: bool,
) -> ApiResult<Response> {
    let endpoint: &'static str = if enabled {
        "connectors_enable"
    } else {
        "connectors_disable"
    };
    let guarded = state
        .guard(endpoint, headers, Some("admin:connectors"), false)
        .await?;
    let updated = state
        .config_store
        .set_enabled(&guarded.ctx.tenant_id, provider, enabled)
        .await
        .map_err(|e| state.err(endpoint, e))?;
    if !updated {
        return Err(state.err(
            endpoint,
            Error::NotFound(format!("connector {provider}")),
        ));
    }
    Ok(guarded.respond(Json(json!({ "provider": provider, "enabled": enabled }))))
}

/// `POST /_admin/connectors/{provider}/enable`
pub async fn enable(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(provider): Path<String>,
) -> ApiResult<Response> {
    toggle(&state, &headers, &provider, true).await
}

/// `POST /_admin/connectors/{provider}/disable`
pub async fn disable(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(provider): Path<String>,
) -> ApiResult<Response> {
    toggle(&state, &headers, &provider, false).await
}

/// `POST /_admin/connectors/{provider}/backfill`: seed the tenant queue
/// from `list_changes`, resuming at the stored cursor.
pub async fn backfill(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(provider): Path<String>,
) -> ApiResult<Response> {
    let guarded = state
        .guard("connectors_backfill", &headers, Some("admin:connectors"), false)
        .await?;
    let worker = state
        .workers
        .iter()
        .find(|w| w.provider() == provider)
        .ok_or_else(|| {
            state.err(
                "connectors_backfill",
                Error::Validation(format!("unknown provider: {provider}")),
            )
        })?;
    let queued = worker
        .backfill(&guarded.ctx.tenant_id)
        .await
        .map_err(|e| state.err("connectors_backfill", e))?;
    Ok(guarded.respond(Json(json!({ "status": "queued", "count": queued }))))
}

/// `POST /_admin/connectors/rotate_keys` request body.
#[derive(Debug, Default, Deserialize)]
pub struct RotateBody {
    #[serde(default)]
    pub dry_run: bool,
    #[serde(default)]
    pub providers: Vec<String>,
    #[serde(default)]
    pub tenants: Vec<String>,
    #[serde(default = "default_batch")]
    pub batch_size: usize,
}

fn default_batch() -> usize {
    50
}

/// `POST /_admin/connectors/rotate_keys`
pub async fn rotate_keys(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Option<Json<RotateBody>>,
) -> ApiResult<Response> {
    let guarded = state
        .guard("connectors_rotate", &headers, Some("admin:connectors"), false)
        .await?;
    let body = body.map(|Json(b)| b).unwrap_or_default();
    let report = run_rotation(
        &state.store,
        &state.encryption,
        &RotationRequest {
            providers: body.providers,
            tenants: body.tenants,
            dry_run: body.dry_run,
            batch_size: body.batch_size,
        },
        &state.telemetry,
    )
    .await
    .map_err(|e| state.err("connectors_rotate", e))?;
    Ok(guarded.respond(Json(report)))
}

/// `POST /_admin/connectors/purge_deleted` request body.
#[derive(Debug, Default, Deserialize)]
pub struct PurgeBody {
    #[serde(default)]
    pub tenant_id: Option<String>,
    #[serde(default = "default_batch")]
    pub batch_size: usize,
    #[serde(default)]
    pub dry_run: bool,
}

/// `POST /_admin/connectors/purge_deleted`: hard-remove past-grace
/// tombstones.
pub async fn purge_deleted(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Option<Json<PurgeBody>>,
) -> ApiResult<Response> {
    let guarded = state
        .guard("connectors_purge", &headers, Some("admin:connectors"), false)
        .await?;
    let body = body.map(|Json(b)| b).unwrap_or_default();
    let tenant = body
        .tenant_id
        .clone()
        .unwrap_or_else(|| guarded.ctx.tenant_id.clone());

    let report = state
        .store
        .purge_deleted(Some(&tenant), Utc::now(), body.batch_size.max(1), body.dry_run)
        .await
        .map_err(|e| state.err("connectors_purge", e))?;
    Ok(guarded.respond(Json(report)))
}

/// `GET /_admin/connectors/cache/health`
pub async fn cache_health(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> ApiResult<Response> {
    let guarded = state
        .guard("connectors_cache_health", &headers, Some("admin:connectors"), false)
        .await?;
    let health = state.subscriber.health();
    let kv_ok = state.kv.ping().await.is_ok();
    Ok(guarded.respond(Json(json!({
        "connected": health.connected,
        "last_message_ts": health.last_message_ts,
        "reconnects": health.reconnects,
        "cache_entries": state.config_store.cache_len(),
        "kv_reachable": kv_ok,
    }))))
}
