//! Pattern management endpoints for the trigger engine.

use std::sync::Arc;

use activekg_core::embeddings::EmbeddingProvider;
use activekg_core::storage::GraphStore;
use activekg_core::Error;
use axum::extract::{Path, State};
use axum::http::HeaderMap;
use axum::response::Response;
use axum::Json;
use serde::Deserialize;
use serde_json::json;

use crate::error::ApiResult;
use crate::state::AppState;

/// `POST /triggers` request body: the pattern vector may be supplied
/// directly or derived from text.
#[derive(Debug, Deserialize)]
pub struct CreatePatternBody {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub embedding: Option<Vec<f32>>,
    #[serde(default)]
    pub text: Option<String>,
}

/// `GET /triggers`: list patterns (embeddings omitted).
pub async fn list(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> ApiResult<Response> {
    let guarded = state
        .guard("triggers_list", &headers, Some("nodes:read"), false)
        .await?;
    let patterns = state
        .store
        .list_patterns(&guarded.ctx)
        .await
        .map_err(|e| state.err("triggers_list", e))?;
    let listed: Vec<_> = patterns
        .into_iter()
        .map(|p| {
            json!({
                "name": p.name,
                "description": p.description,
                "created_at": p.created_at,
                "updated_at": p.updated_at,
            })
        })
        .collect();
    Ok(guarded.respond(Json(json!({ "patterns": listed }))))
}

/// `POST /triggers`
pub async fn create(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(body): Json<CreatePatternBody>,
) -> ApiResult<Response> {
    let guarded = state
        .guard("triggers_create", &headers, Some("nodes:write"), false)
        .await?;

    let embedding = match (body.embedding, body.text.as_deref()) {
        (Some(embedding), _) => embedding,
        (None, Some(text)) => state
            .embedder
            .embed_text(text)
            .await
            .map_err(|e| state.err("triggers_create", Error::Embedding(e)))?,
        (None, None) => {
            return Err(state.err(
                "triggers_create",
                Error::Validation("either embedding or text is required".to_string()),
            ))
        }
    };

    state
        .store
        .upsert_pattern(
            &guarded.ctx,
            &body.name,
            &embedding,
            body.description.as_deref(),
        )
        .await
        .map_err(|e| state.err("triggers_create", e))?;
    Ok(guarded.respond(Json(json!({ "status": "saved", "name": body.name }))))
}

/// `DELETE /triggers/{name}`
pub async fn remove(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(name): Path<String>,
) -> ApiResult<Response> {
    let guarded = state
        .guard("triggers_delete", &headers, Some("nodes:write"), false)
        .await?;
    let deleted = state
        .store
        .delete_pattern(&guarded.ctx, &name)
        .await
        .map_err(|e| state.err("triggers_delete", e))?;
    if !deleted {
        return Err(state.err(
            "triggers_delete",
            Error::NotFound(format!("pattern {name}")),
        ));
    }
    Ok(guarded.respond(Json(json!({ "status": "deleted", "name": name }))))
}
