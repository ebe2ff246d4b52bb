//! HTTP error mapping: stable `{detail, error_type}` bodies per error kind.

use activekg_core::{Error, Telemetry};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use tracing::{error, warn};

/// An engine error bound to its route template for metric labels.
#[derive(Debug)]
pub struct ApiError {
    pub endpoint: &'static str,
    pub error: Error,
    pub telemetry: Option<Telemetry>,
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match &self.error {
            Error::Auth(_) => StatusCode::UNAUTHORIZED,
            Error::Scope(_) => StatusCode::FORBIDDEN,
            Error::Validation(_) => StatusCode::BAD_REQUEST,
            Error::NotFound(_) => StatusCode::NOT_FOUND,
            Error::Conflict(_) => StatusCode::CONFLICT,
            Error::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            Error::Dependency(_) => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let error_type = self.error.error_type();

        if let Some(telemetry) = &self.telemetry {
            telemetry
                .counter_with(
                    "api_errors_total",
                    &[
                        ("endpoint", self.endpoint),
                        ("status", status.as_str()),
                        ("error_type", error_type),
                    ],
                )
                .increment();
        }
        if status.is_server_error() {
            error!(endpoint = self.endpoint, error = %self.error, "request failed");
        } else {
            warn!(endpoint = self.endpoint, error = %self.error, "request rejected");
        }

        let body = Json(json!({
            "detail": self.error.to_string(),
            "error_type": error_type,
        }));

        let mut response = (status, body).into_response();
        if let Error::RateLimited { retry_after } = &self.error {
            if let Ok(value) = retry_after.to_string().parse() {
                response.headers_mut().insert("Retry-After", value);
            }
        }
        response
    }
}

/// Shorthand result for handlers.
pub type ApiResult<T> = std::result::Result<T, ApiError>;
