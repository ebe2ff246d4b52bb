//! Shared application state and the per-request guard.

use std::sync::Arc;

use activekg_connectors::config_store::{ConfigSubscriber, ConnectorConfigStore};
use activekg_connectors::webhooks::WebhookProcessor;
use activekg_connectors::{IngestionWorker, SecretEncryption};
use activekg_core::embeddings::EmbeddingProvider;
use activekg_core::kv::KvStore;
use activekg_core::refresh::RefreshScheduler;
use activekg_core::retrieval::RetrievalEngine;
use activekg_core::storage::GraphStore;
use activekg_core::triggers::TriggerEngine;
use activekg_core::types::RequestContext;
use activekg_core::{Error, Settings, Telemetry};
use axum::http::HeaderMap;
use axum::response::{IntoResponse, Response};

use crate::auth::{require_scope, Authenticator};
use crate::error::ApiError;
use crate::rate_limit::{apply_headers, InflightSlot, RateLimitInfo, RateLimiter};

/// Everything a handler needs, shared behind an `Arc`.
pub struct AppState {
    pub settings: Settings,
    pub store: Arc<dyn GraphStore>,
    pub kv: Arc<dyn KvStore>,
    pub embedder: Arc<dyn EmbeddingProvider>,
    pub retrieval: Arc<RetrievalEngine>,
    pub scheduler: Arc<RefreshScheduler>,
    pub triggers: Arc<TriggerEngine>,
    pub config_store: Arc<ConnectorConfigStore>,
    pub subscriber: Arc<ConfigSubscriber>,
    pub webhooks: Arc<WebhookProcessor>,
    pub encryption: Arc<SecretEncryption>,
    pub workers: Vec<Arc<IngestionWorker>>,
    pub auth: Authenticator,
    pub limiter: RateLimiter,
    pub telemetry: Telemetry,
}

/// Context and bookkeeping produced by the request guard.
pub struct Guarded {
    pub ctx: RequestContext,
    pub rate: RateLimitInfo,
    /// Concurrency slot released when the handler finishes
    pub slot: Option<InflightSlot>,
}

impl AppState {
    /// Bind an error to a route template for metric labels.
    pub fn err(&self, endpoint: &'static str, error: Error) -> ApiError {
        ApiError {
            endpoint,
            error,
            telemetry: Some(self.telemetry.clone()),
        }
    }

    /// Authenticate, rate-limit, and scope-check a request.
    ///
    /// The returned rate info must be attached to the response via
    /// [`Guarded::respond`] so every call carries `X-RateLimit-*` headers.
    pub async fn guard(
        &self,
        endpoint: &'static str,
        headers: &HeaderMap,
        scope: Option<&str>,
        check_concurrency: bool,
    ) -> Result<Guarded, ApiError> {
        let ctx = self
            .auth
            .authenticate(headers)
            .map_err(|e| self.err(endpoint, e))?;

        let identifier = self
            .limiter
            .identifier(Some(ctx.tenant_id.as_str()), headers, "unknown");
        let rate = self.limiter.check(&identifier, endpoint).await;
        if !rate.allowed {
            return Err(self.err(
                endpoint,
                Error::RateLimited {
                    retry_after: rate.retry_after,
                },
            ));
        }

        let slot = if check_concurrency {
            self.limiter
                .acquire_concurrency(&identifier, endpoint)
                .await
                .map_err(|e| self.err(endpoint, e))?
        } else {
            None
        };

        if let Some(scope) = scope {
            require_scope(&ctx, scope).map_err(|e| self.err(endpoint, e))?;
        }

        self.telemetry
            .counter_with("api_requests_total", &[("endpoint", endpoint)])
            .increment();

        Ok(Guarded { ctx, rate, slot })
    }

    /// Count a cross-tenant access attempt (user-supplied tenant differs
    /// from the trusted claim).
    pub fn note_cross_tenant(&self, ctx: &RequestContext, supplied: Option<&str>, kind: &str) {
        if self.auth.enabled() {
            if let Some(supplied) = supplied {
                if supplied != ctx.tenant_id {
                    self.telemetry
                        .counter_with("access_violations_total", &[("type", kind)])
                        .increment();
                }
            }
        }
    }
}

impl Guarded {
    /// Build the response with rate-limit headers attached.
    pub fn respond(self, inner: impl IntoResponse) -> Response {
        let mut response = inner.into_response();
        apply_headers(&mut response, &self.rate);
        response
    }
}
