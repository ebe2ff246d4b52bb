//! Connector trait and provider registry.

use std::sync::Arc;

use activekg_core::{Error, Result};
use async_trait::async_trait;
use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::providers::{DriveConnector, GcsConnector, S3Connector};
use crate::types::{ChangeItem, ConnectorStats, FetchResult};

/// External data source abstraction.
///
/// Connectors implement three core methods:
/// - `stat(uri)`: resource metadata without downloading content
/// - `fetch_text(uri)`: fetch and parse text content
/// - `list_changes(cursor)`: incremental change listing for backfills
#[async_trait]
pub trait Connector: Send + Sync {
    /// Resource metadata; `exists = false` instead of an error for missing
    /// objects.
    async fn stat(&self, uri: &str) -> Result<ConnectorStats>;

    /// Fetch and extract text content.
    ///
    /// # Errors
    ///
    /// `Error::TransientConnector` for retryable failures (timeouts, 5xx),
    /// `Error::PermanentConnector` for unprocessable resources (missing,
    /// unsupported format).
    async fn fetch_text(&self, uri: &str) -> Result<FetchResult>;

    /// Changes since `cursor` (`None` for an initial backfill), with the
    /// next cursor to persist.
    async fn list_changes(&self, cursor: Option<&Value>)
        -> Result<(Vec<ChangeItem>, Option<Value>)>;

    /// Provider name (`s3`, `gcs`, `drive`).
    fn provider(&self) -> &str;

    /// Tenant this connector is bound to.
    fn tenant_id(&self) -> &str;

    /// Stable external identity for a resource:
    /// `{provider}:{tenant}:{resource_id}`.
    fn to_external_id(&self, uri: &str) -> String {
        let resource_id = uri.split_once("://").map_or_else(
            || uri.split_once(':').map_or(uri, |(_, rest)| rest),
            |(_, rest)| rest,
        );
        format!("{}:{}:{}", self.provider(), self.tenant_id(), resource_id)
    }
}

impl std::fmt::Debug for dyn Connector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connector")
            .field("provider", &self.provider())
            .field("tenant_id", &self.tenant_id())
            .finish()
    }
}

/// SHA-256 content hash used for unchanged-content skips.
#[must_use]
pub fn content_hash(text: &str) -> String {
    let digest = Sha256::digest(text.as_bytes());
    format!("{digest:x}")
}

/// Resolves provider names to connector instances.
pub struct ConnectorRegistry;

impl ConnectorRegistry {
    /// Build a connector for `(provider, tenant)` from a decrypted config.
    ///
    /// # Errors
    ///
    /// `Error::Validation` for unknown providers or malformed configs.
    pub fn build(
        provider: &str,
        tenant_id: &str,
        config: &Value,
    ) -> Result<Arc<dyn Connector>> {
        match provider {
            "s3" => Ok(Arc::new(S3Connector::new(tenant_id, config)?)),
            "gcs" => Ok(Arc::new(GcsConnector::new(tenant_id, config)?)),
            "drive" => Ok(Arc::new(DriveConnector::new(tenant_id, config)?)),
            other => Err(Error::Validation(format!("unknown provider: {other}"))),
        }
    }
}

/// Classify a reqwest failure into the transient/permanent taxonomy.
pub(crate) fn classify_http_error(context: &str, err: &reqwest::Error) -> Error {
    if err.is_timeout() || err.is_connect() {
        return Error::TransientConnector(format!("{context}: {err}"));
    }
    if let Some(status) = err.status() {
        if status.is_server_error() || status.as_u16() == 429 {
            return Error::TransientConnector(format!("{context}: {status}"));
        }
        return Error::PermanentConnector(format!("{context}: {status}"));
    }
    Error::TransientConnector(format!("{context}: {err}"))
}

/// Classify a non-success status code.
pub(crate) fn classify_status(context: &str, status: reqwest::StatusCode) -> Error {
    if status.is_server_error() || status.as_u16() == 429 {
        Error::TransientConnector(format!("{context}: {status}"))
    } else {
        Error::PermanentConnector(format!("{context}: {status}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn content_hash_is_stable_and_distinct() {
        assert_eq!(content_hash("abc"), content_hash("abc"));
        assert_ne!(content_hash("abc"), content_hash("abd"));
        assert_eq!(content_hash("abc").len(), 64);
    }

    #[test]
    fn registry_rejects_unknown_provider() {
        let err = ConnectorRegistry::build("ftp", "t1", &serde_json::json!({})).unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }
}
