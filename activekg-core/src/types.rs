//! Domain types shared across the system.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::constants::{CLASS_DELETED, DEFAULT_TRIGGER_THRESHOLD};

/// A graph node: a document, a chunk, or any embedded entity.
///
/// Embeddings, when present, are L2-normalized and have the process-constant
/// dimension. `version` is a monotonic counter bumped on every meaningful
/// change and used for optimistic concurrency.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Node {
    /// Opaque unique identifier
    pub id: Uuid,
    /// Isolation boundary; never empty
    pub tenant_id: String,
    /// Ordered class tags, e.g. `["Chunk", "Document"]`
    pub classes: Vec<String>,
    /// Arbitrary JSON props (`text`, `title`, `external_id`, `etag`, ...)
    pub props: Value,
    /// Arbitrary indexable JSON metadata
    pub metadata: Value,
    /// Reference resolved by the refresh loop when `props.text` is absent
    /// (inline text, `file://`, `http(s)://`, or `s3://`)
    pub payload_ref: Option<String>,
    /// L2-normalized embedding of dimension D, if computed
    pub embedding: Option<Vec<f32>>,
    /// Re-embedding schedule, if the node participates in active refresh
    pub refresh_policy: Option<RefreshPolicy>,
    /// Similarity-pattern triggers evaluated after each refresh
    pub triggers: Vec<TriggerSpec>,
    /// Monotonic version counter
    pub version: i64,
    /// When the refresh loop last re-embedded this node
    pub last_refreshed: Option<DateTime<Utc>>,
    /// `1 - cosine(old, new)` from the most recent re-embedding
    pub drift_score: Option<f64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Node {
    /// Whether the node carries the `Deleted` tombstone class.
    #[must_use]
    pub fn is_deleted(&self) -> bool {
        self.classes.iter().any(|c| c == CLASS_DELETED)
    }

    /// Text used for embedding and lexical indexing, if present inline.
    #[must_use]
    pub fn text(&self) -> Option<&str> {
        self.props.get("text").and_then(Value::as_str)
    }

    /// Stable external identity (`{provider}:{tenant}:{resource_id}`), if set.
    #[must_use]
    pub fn external_id(&self) -> Option<&str> {
        self.props.get("external_id").and_then(Value::as_str)
    }

    /// Soft-delete grace deadline, if tombstoned.
    #[must_use]
    pub fn deletion_grace_until(&self) -> Option<DateTime<Utc>> {
        self.props
            .get("deletion_grace_until")
            .and_then(Value::as_str)
            .and_then(|s| s.parse().ok())
    }
}

/// Fields accepted when creating a node.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NewNode {
    pub classes: Vec<String>,
    #[serde(default)]
    pub props: Value,
    #[serde(default)]
    pub metadata: Value,
    #[serde(default)]
    pub payload_ref: Option<String>,
    #[serde(default)]
    pub embedding: Option<Vec<f32>>,
    #[serde(default)]
    pub refresh_policy: Option<RefreshPolicy>,
    #[serde(default)]
    pub triggers: Vec<TriggerSpec>,
}

/// Partial update applied to a node. `None` fields are left untouched.
///
/// `expected_version` enables optimistic concurrency: when set, the update
/// fails with a conflict if the stored version differs.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NodePatch {
    pub classes: Option<Vec<String>>,
    pub props: Option<Value>,
    pub metadata: Option<Value>,
    pub payload_ref: Option<Option<String>>,
    pub embedding: Option<Option<Vec<f32>>>,
    pub refresh_policy: Option<Option<RefreshPolicy>>,
    pub triggers: Option<Vec<TriggerSpec>>,
    pub expected_version: Option<i64>,
}

/// Re-embedding schedule attached to a node.
///
/// `cron` takes precedence; a cron expression that fails to parse falls back
/// to `interval`. With neither valid the node is never due.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RefreshPolicy {
    /// Interval expression, e.g. `"90s"`, `"15m"`, `"1h"`, or plain seconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interval: Option<String>,
    /// Standard 5-field cron expression
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cron: Option<String>,
    /// Minimum drift required to emit a `refreshed` event
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub drift_threshold: Option<f64>,
}

/// A named similarity trigger on a node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TriggerSpec {
    /// Pattern name looked up in the pattern store
    pub name: String,
    /// Cosine similarity threshold; fires at or above
    #[serde(default = "default_trigger_threshold")]
    pub threshold: f32,
}

fn default_trigger_threshold() -> f32 {
    DEFAULT_TRIGGER_THRESHOLD
}

/// A typed relation between two nodes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Edge {
    pub src: Uuid,
    pub rel: String,
    pub dst: Uuid,
    pub tenant_id: String,
    #[serde(default)]
    pub props: Value,
    pub created_at: DateTime<Utc>,
}

/// Append-only audit entry. Never mutated after insert.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub id: Uuid,
    pub node_id: Uuid,
    pub event_type: EventType,
    pub payload: Value,
    pub tenant_id: String,
    pub actor_id: String,
    pub actor_type: String,
    pub created_at: DateTime<Utc>,
}

/// Audit event kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    Created,
    Updated,
    Deleted,
    Refreshed,
    TriggerFired,
}

impl EventType {
    /// Stable wire/storage representation.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            EventType::Created => "created",
            EventType::Updated => "updated",
            EventType::Deleted => "deleted",
            EventType::Refreshed => "refreshed",
            EventType::TriggerFired => "trigger_fired",
        }
    }
}

impl std::str::FromStr for EventType {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "created" => Ok(EventType::Created),
            "updated" => Ok(EventType::Updated),
            "deleted" => Ok(EventType::Deleted),
            "refreshed" => Ok(EventType::Refreshed),
            "trigger_fired" => Ok(EventType::TriggerFired),
            other => Err(crate::Error::Validation(format!(
                "unknown event type: {other}"
            ))),
        }
    }
}

/// Immutable snapshot of a node written on meaningful change.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeVersion {
    pub node_id: Uuid,
    pub version: i64,
    pub classes: Vec<String>,
    pub props: Value,
    pub metadata: Value,
    pub created_at: DateTime<Utc>,
}

/// One row per refresh that updated a node's embedding.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingHistory {
    pub node_id: Uuid,
    pub drift_score: f64,
    pub embedding_ref: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// A named reference vector evaluated by the trigger engine.
///
/// `tenant_id` is `None` only when the process runs in the global pattern
/// namespace compatibility mode.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Pattern {
    pub name: String,
    pub tenant_id: Option<String>,
    pub embedding: Vec<f32>,
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Which scoring scheme produced a search response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScoreType {
    Cosine,
    Lexical,
    RrfFused,
    WeightedFused,
}

impl ScoreType {
    /// Stable wire representation carried in responses and metric labels.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            ScoreType::Cosine => "cosine",
            ScoreType::Lexical => "lexical",
            ScoreType::RrfFused => "rrf_fused",
            ScoreType::WeightedFused => "weighted_fused",
        }
    }
}

/// A search hit with its fused score.
#[derive(Debug, Clone, Serialize)]
pub struct ScoredNode {
    pub node: Node,
    /// Final score in the scale of the active `ScoreType`
    pub similarity: f32,
    /// Vector-side component before fusion, if the mode used one
    pub vector_score: Option<f32>,
    /// Lexical-side component before fusion, if the mode used one
    pub lexical_score: Option<f32>,
}

/// Trusted per-request identity threaded through every storage call.
///
/// Built from JWT claims (or the dev-mode default tenant); never from
/// user-supplied body or query fields.
#[derive(Debug, Clone)]
pub struct RequestContext {
    pub tenant_id: String,
    pub actor_id: String,
    pub actor_type: String,
    pub scopes: Vec<String>,
}

impl RequestContext {
    /// Context for a tenant-scoped user request.
    #[must_use]
    pub fn user(tenant_id: impl Into<String>, actor_id: impl Into<String>) -> Self {
        Self {
            tenant_id: tenant_id.into(),
            actor_id: actor_id.into(),
            actor_type: "user".to_string(),
            scopes: Vec::new(),
        }
    }

    /// Context for internal system tasks (scheduler, workers).
    #[must_use]
    pub fn system(tenant_id: impl Into<String>) -> Self {
        Self {
            tenant_id: tenant_id.into(),
            actor_id: "system".to_string(),
            actor_type: "system".to_string(),
            scopes: Vec::new(),
        }
    }

    /// Context used by the trigger engine when appending events.
    #[must_use]
    pub fn trigger(tenant_id: impl Into<String>) -> Self {
        Self {
            tenant_id: tenant_id.into(),
            actor_id: "trigger_engine".to_string(),
            actor_type: "trigger".to_string(),
            scopes: Vec::new(),
        }
    }

    /// Whether the caller holds a scope.
    #[must_use]
    pub fn has_scope(&self, scope: &str) -> bool {
        self.scopes.iter().any(|s| s == scope)
    }

    /// Attach scopes (builder style).
    #[must_use]
    pub fn with_scopes(mut self, scopes: Vec<String>) -> Self {
        self.scopes = scopes;
        self
    }
}

/// One ancestor in a lineage traversal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LineageEntry {
    pub id: Uuid,
    pub depth: u32,
    pub classes: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn trigger_spec_defaults_threshold() {
        let spec: TriggerSpec = serde_json::from_value(json!({"name": "urgent"})).unwrap();
        assert_eq!(spec.threshold, DEFAULT_TRIGGER_THRESHOLD);
    }

    #[test]
    fn event_type_round_trips() {
        for ty in [
            EventType::Created,
            EventType::Updated,
            EventType::Deleted,
            EventType::Refreshed,
            EventType::TriggerFired,
        ] {
            assert_eq!(ty.as_str().parse::<EventType>().unwrap(), ty);
        }
    }

    #[test]
    fn node_tombstone_detection() {
        let mut node = Node {
            id: Uuid::new_v4(),
            tenant_id: "t1".into(),
            classes: vec!["Document".into()],
            props: json!({"text": "hello"}),
            metadata: json!({}),
            payload_ref: None,
            embedding: None,
            refresh_policy: None,
            triggers: vec![],
            version: 1,
            last_refreshed: None,
            drift_score: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        assert!(!node.is_deleted());
        node.classes.push("Deleted".into());
        assert!(node.is_deleted());
        assert_eq!(node.text(), Some("hello"));
    }
}
