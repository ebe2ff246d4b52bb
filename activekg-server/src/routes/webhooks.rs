//! Webhook ingress endpoints.
//!
//! Transport concerns live here: body size limit, hard processing
//! deadline, and provider headers. Verification, dedup, and enqueue are
//! delegated to the connectors crate.

use std::sync::Arc;
use std::time::Duration;

use activekg_core::Error;
use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

use activekg_connectors::webhooks::SnsHeaders;

use crate::error::ApiResult;
use crate::state::AppState;

/// Hard processing deadline for webhook handlers.
const PROCESSING_DEADLINE: Duration = Duration::from_secs(5);

fn header(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(String::from)
}

fn too_large(max: usize) -> Response {
    (
        StatusCode::PAYLOAD_TOO_LARGE,
        Json(json!({
            "detail": format!("payload too large (max {max} bytes)"),
            "error_type": "validation",
        })),
    )
        .into_response()
}

/// `POST /_webhooks/s3`: SNS event ingress.
pub async fn s3(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<Response> {
    let max = state.settings.webhook.max_body_bytes;
    if body.len() > max {
        return Ok(too_large(max));
    }

    let identifier = state.limiter.identifier(None, &headers, "webhook");
    let rate = state.limiter.check(&identifier, "webhook_s3").await;
    if !rate.allowed {
        return Err(state.err(
            "webhook_s3",
            Error::RateLimited {
                retry_after: rate.retry_after,
            },
        ));
    }

    let sns_headers = SnsHeaders {
        signature: header(&headers, "x-amz-sns-message-signature").unwrap_or_default(),
        cert_url: header(&headers, "x-amz-sns-signing-cert-url").unwrap_or_default(),
        signature_version: header(&headers, "x-amz-sns-message-signature-version")
            .unwrap_or_else(|| "1".to_string()),
    };

    let outcome = tokio::time::timeout(
        PROCESSING_DEADLINE,
        state.webhooks.handle_sns(&sns_headers, &body),
    )
    .await
    .map_err(|_| {
        state.err(
            "webhook_s3",
            Error::Dependency("webhook processing deadline exceeded".to_string()),
        )
    })?
    .map_err(|e| state.err("webhook_s3", e))?;

    let mut response = Json(outcome.body).into_response();
    crate::rate_limit::apply_headers(&mut response, &rate);
    Ok(response)
}

/// `POST /_webhooks/gcs`: Pub/Sub push ingress.
pub async fn gcs(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<Response> {
    let max = state.settings.webhook.max_body_bytes;
    if body.len() > max {
        return Ok(too_large(max));
    }

    let identifier = state.limiter.identifier(None, &headers, "webhook");
    let rate = state.limiter.check(&identifier, "webhook_gcs").await;
    if !rate.allowed {
        return Err(state.err(
            "webhook_gcs",
            Error::RateLimited {
                retry_after: rate.retry_after,
            },
        ));
    }

    let token = header(&headers, "x-pubsub-token");
    let topic = header(&headers, "x-goog-topic");

    let outcome = tokio::time::timeout(
        PROCESSING_DEADLINE,
        state
            .webhooks
            .handle_gcs(token.as_deref(), topic.as_deref(), &body),
    )
    .await
    .map_err(|_| {
        state.err(
            "webhook_gcs",
            Error::Dependency("webhook processing deadline exceeded".to_string()),
        )
    })?
    .map_err(|e| state.err("webhook_gcs", e))?;

    let mut response = Json(outcome.body).into_response();
    crate::rate_limit::apply_headers(&mut response, &rate);
    Ok(response)
}
