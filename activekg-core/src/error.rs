//! Error taxonomy shared across the workspace.
//!
//! Every kind maps onto a stable HTTP status in the request surface; the
//! ingestion pipeline additionally distinguishes transient connector errors
//! (retried with backoff) from permanent ones (dead-lettered).

/// Result type alias for engine operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for the active knowledge-graph engine
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Authentication failed: {0}")]
    Auth(String),

    #[error("Missing scope: {0}")]
    Scope(String),

    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Version conflict: {0}")]
    Conflict(String),

    #[error("Rate limit exceeded, retry after {retry_after}s")]
    RateLimited {
        /// Seconds until the current window resets
        retry_after: u64,
    },

    #[error("Dependency unavailable: {0}")]
    Dependency(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Transient connector error: {0}")]
    TransientConnector(String),

    #[error("Permanent connector error: {0}")]
    PermanentConnector(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Embedding error: {0}")]
    Embedding(#[from] anyhow::Error),
}

impl Error {
    /// Check if this error is recoverable (can retry with backoff)
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        match self {
            Error::Storage(_)
            | Error::Dependency(_)
            | Error::TransientConnector(_)
            | Error::RateLimited { .. }
            | Error::Io(_)
            | Error::Embedding(_) => true,
            Error::Auth(_)
            | Error::Scope(_)
            | Error::Validation(_)
            | Error::NotFound(_)
            | Error::Conflict(_)
            | Error::Config(_)
            | Error::PermanentConnector(_)
            | Error::Serialization(_) => false,
        }
    }

    /// Stable machine-readable label used in error bodies and metric labels
    #[must_use]
    pub fn error_type(&self) -> &'static str {
        match self {
            Error::Auth(_) => "auth",
            Error::Scope(_) => "scope",
            Error::Validation(_) => "validation",
            Error::NotFound(_) => "not_found",
            Error::Conflict(_) => "conflict",
            Error::RateLimited { .. } => "rate_limited",
            Error::Dependency(_) => "dependency",
            Error::Storage(_) => "storage",
            Error::Config(_) => "config",
            Error::TransientConnector(_) => "transient_connector",
            Error::PermanentConnector(_) => "permanent_connector",
            Error::Serialization(_) => "serialization",
            Error::Io(_) => "io",
            Error::Embedding(_) => "embedding",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_kinds_are_recoverable() {
        assert!(Error::Storage("pool timeout".into()).is_recoverable());
        assert!(Error::TransientConnector("503".into()).is_recoverable());
        assert!(!Error::PermanentConnector("404".into()).is_recoverable());
        assert!(!Error::Validation("bad dimension".into()).is_recoverable());
        assert!(!Error::Conflict("version 3 != 4".into()).is_recoverable());
    }

    #[test]
    fn error_type_labels_are_stable() {
        assert_eq!(Error::Auth("x".into()).error_type(), "auth");
        assert_eq!(
            Error::RateLimited { retry_after: 1 }.error_type(),
            "rate_limited"
        );
    }
}
