//! Node and edge CRUD endpoints.

use std::sync::Arc;

use activekg_core::storage::{GraphStore, NewEdge};
use activekg_core::types::{NewNode, NodePatch};
use activekg_core::Error;
use axum::extract::{Path, Query, State};
use axum::http::HeaderMap;
use axum::response::Response;
use axum::Json;
use serde::Deserialize;
use serde_json::json;
use uuid::Uuid;

use crate::error::ApiResult;
use crate::state::AppState;

/// `POST /nodes` request body.
#[derive(Debug, Deserialize)]
pub struct CreateNodeBody {
    #[serde(flatten)]
    pub node: NewNode,
    /// Ignored when JWT is enabled; counted as a violation on mismatch
    #[serde(default)]
    pub tenant_id: Option<String>,
}

/// `POST /nodes`
pub async fn create(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(body): Json<CreateNodeBody>,
) -> ApiResult<Response> {
    let guarded = state
        .guard("nodes_create", &headers, Some("nodes:write"), false)
        .await?;
    state.note_cross_tenant(&guarded.ctx, body.tenant_id.as_deref(), "cross_tenant_body");

    let id = state
        .store
        .create_node(&guarded.ctx, body.node)
        .await
        .map_err(|e| state.err("nodes_create", e))?;
    Ok(guarded.respond(Json(json!({ "id": id }))))
}

/// `GET /nodes/{id}`
pub async fn get_one(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
) -> ApiResult<Response> {
    let guarded = state
        .guard("nodes_get", &headers, Some("nodes:read"), false)
        .await?;
    let node = state
        .store
        .get_node(&guarded.ctx, id)
        .await
        .map_err(|e| state.err("nodes_get", e))?
        .ok_or_else(|| state.err("nodes_get", Error::NotFound(format!("node {id}"))))?;
    Ok(guarded.respond(Json(node)))
}

/// `PUT /nodes/{id}`
pub async fn update(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
    Json(patch): Json<NodePatch>,
) -> ApiResult<Response> {
    let guarded = state
        .guard("nodes_update", &headers, Some("nodes:write"), false)
        .await?;
    let node = state
        .store
        .update_node(&guarded.ctx, id, patch)
        .await
        .map_err(|e| state.err("nodes_update", e))?;
    Ok(guarded.respond(Json(node)))
}

#[derive(Debug, Deserialize)]
pub struct DeleteParams {
    #[serde(default)]
    pub hard: bool,
}

/// `DELETE /nodes/{id}?hard=bool`
pub async fn remove(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
    Query(params): Query<DeleteParams>,
) -> ApiResult<Response> {
    let guarded = state
        .guard("nodes_delete", &headers, Some("nodes:write"), false)
        .await?;
    let deleted = state
        .store
        .delete_node(&guarded.ctx, id, params.hard)
        .await
        .map_err(|e| state.err("nodes_delete", e))?;
    if !deleted {
        return Err(state.err("nodes_delete", Error::NotFound(format!("node {id}"))));
    }
    Ok(guarded.respond(Json(json!({ "deleted": true, "hard": params.hard }))))
}

#[derive(Debug, Deserialize)]
pub struct ListParams {
    #[serde(default = "default_limit")]
    pub limit: usize,
    #[serde(default)]
    pub offset: usize,
}

fn default_limit() -> usize {
    50
}

/// `GET /nodes`
pub async fn list(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(params): Query<ListParams>,
) -> ApiResult<Response> {
    let guarded = state
        .guard("nodes_list", &headers, Some("nodes:read"), false)
        .await?;
    let nodes = state
        .store
        .list_nodes(&guarded.ctx, params.limit.min(500), params.offset)
        .await
        .map_err(|e| state.err("nodes_list", e))?;
    let count = nodes.len();
    Ok(guarded.respond(Json(json!({ "nodes": nodes, "count": count }))))
}

/// `GET /nodes/{id}/versions`
pub async fn versions(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
) -> ApiResult<Response> {
    let guarded = state
        .guard("nodes_versions", &headers, Some("nodes:read"), false)
        .await?;
    let versions = state
        .store
        .list_versions(&guarded.ctx, id)
        .await
        .map_err(|e| state.err("nodes_versions", e))?;
    Ok(guarded.respond(Json(json!({ "versions": versions }))))
}

/// `POST /edges` request body.
#[derive(Debug, Deserialize)]
pub struct CreateEdgeBody {
    pub src: Uuid,
    pub rel: String,
    pub dst: Uuid,
    #[serde(default)]
    pub props: serde_json::Value,
}

/// `POST /edges`
pub async fn create_edge(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(body): Json<CreateEdgeBody>,
) -> ApiResult<Response> {
    let guarded = state
        .guard("edges_create", &headers, Some("nodes:write"), false)
        .await?;
    state
        .store
        .create_edge(
            &guarded.ctx,
            NewEdge {
                src: body.src,
                rel: body.rel,
                dst: body.dst,
                props: body.props,
            },
        )
        .await
        .map_err(|e| state.err("edges_create", e))?;
    Ok(guarded.respond(Json(json!({ "status": "created" }))))
}
