//! Connector data types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Known provider names resolvable by the registry.
pub const PROVIDERS: [&str; 3] = ["s3", "gcs", "drive"];

/// Metadata about a resource from the external source.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConnectorStats {
    pub exists: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub etag: Option<String>,
    /// GCS object generation
    #[serde(skip_serializing_if = "Option::is_none")]
    pub generation: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub modified_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub owner: Option<String>,
}

/// Result of fetching text content from a resource.
#[derive(Debug, Clone)]
pub struct FetchResult {
    pub text: String,
    pub title: Option<String>,
    pub metadata: Value,
}

/// Change operation kinds carried by webhook records and `list_changes`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeOperation {
    Created,
    Updated,
    Deleted,
    /// Created-or-updated when the source cannot distinguish
    Upsert,
}

impl ChangeOperation {
    /// Whether this operation carries content to ingest.
    #[must_use]
    pub fn is_content(self) -> bool {
        !matches!(self, ChangeOperation::Deleted)
    }
}

/// A single change event, the unit queued between webhook and worker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChangeItem {
    pub uri: String,
    pub operation: ChangeOperation,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub etag: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub modified_at: Option<DateTime<Utc>>,
    pub tenant_id: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn change_item_round_trips_through_json() {
        let item = ChangeItem {
            uri: "s3://bucket/key.txt".to_string(),
            operation: ChangeOperation::Upsert,
            etag: Some("abc123".to_string()),
            modified_at: None,
            tenant_id: "tenant1".to_string(),
        };
        let json = serde_json::to_string(&item).unwrap();
        let back: ChangeItem = serde_json::from_str(&json).unwrap();
        assert_eq!(back.uri, item.uri);
        assert_eq!(back.operation, ChangeOperation::Upsert);
        assert!(json.contains("\"upsert\""));
    }

    #[test]
    fn deleted_is_not_content() {
        assert!(!ChangeOperation::Deleted.is_content());
        assert!(ChangeOperation::Created.is_content());
    }
}
