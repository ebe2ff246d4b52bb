//! # Storage Abstraction
//!
//! Unified trait for tenant-scoped graph storage backends.
//!
//! Every operation takes a [`RequestContext`] whose `tenant_id` scopes the
//! statement; a row invisible under the caller's tenant behaves exactly like
//! a missing row. Backends additionally install schema-level guards so the
//! same contract holds even if a future code path forgets a predicate.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use uuid::Uuid;

use crate::types::{
    Edge, Event, EventType, LineageEntry, NewNode, Node, NodePatch, NodeVersion, Pattern,
    RequestContext,
};
use crate::Result;

/// Filters applied to vector and lexical search.
#[derive(Debug, Clone, Default)]
pub struct SearchFilters {
    /// Restrict to nodes carrying all of these classes
    pub classes: Vec<String>,
    /// Exact-match metadata key/value pairs
    pub metadata: Option<Value>,
    /// Include tombstoned nodes (default false)
    pub include_deleted: bool,
}

/// Filter for event listing.
#[derive(Debug, Clone, Default)]
pub struct EventFilter {
    pub node_id: Option<Uuid>,
    pub event_type: Option<EventType>,
    pub limit: usize,
}

/// A new audit entry.
#[derive(Debug, Clone)]
pub struct NewEvent {
    pub event_type: EventType,
    pub payload: Value,
}

/// A new edge between two nodes.
#[derive(Debug, Clone)]
pub struct NewEdge {
    pub src: Uuid,
    pub rel: String,
    pub dst: Uuid,
    pub props: Value,
}

/// Persisted connector configuration row. `config` holds ciphertext strings
/// for secret-valued fields.
#[derive(Debug, Clone)]
pub struct ConnectorConfigRecord {
    pub tenant_id: String,
    pub provider: String,
    pub config: Value,
    pub key_version: i64,
    pub enabled: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Persisted incremental-sync cursor per `(tenant, provider)`.
#[derive(Debug, Clone)]
pub struct ConnectorCursorRecord {
    pub tenant_id: String,
    pub provider: String,
    pub cursor: Value,
    pub updated_at: DateTime<Utc>,
}

/// Admin-side filter for key rotation candidates.
#[derive(Debug, Clone, Default)]
pub struct RotationFilter {
    /// Only rows whose key version differs from this one
    pub not_key_version: Option<i64>,
    pub providers: Vec<String>,
    pub tenants: Vec<String>,
}

/// Outcome of a purge pass over past-grace tombstones.
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct PurgeReport {
    pub candidates: u64,
    pub parents_deleted: u64,
    pub chunks_deleted: u64,
    pub dry_run: bool,
}

/// Result of updating a node's refresh state.
#[derive(Debug, Clone)]
pub struct RefreshStateUpdate {
    pub embedding: Vec<f32>,
    pub drift_score: f64,
    pub last_refreshed: DateTime<Utc>,
}

/// Unified tenant-scoped graph storage trait.
///
/// All operations are async; all reads and writes are scoped by the context
/// tenant. Backends retry transient failures internally with jittered
/// backoff and surface `Error::Storage` once attempts are exhausted.
#[async_trait]
pub trait GraphStore: Send + Sync {
    /// Apply idempotent DDL (tables, indexes, guard triggers).
    async fn migrate(&self) -> Result<()>;

    /// Create the vector ANN index on the embedding column if absent.
    async fn ensure_vector_index(&self) -> Result<()>;

    // ---- nodes -----------------------------------------------------------

    /// Create a node, writing the `created` event and initial version.
    ///
    /// # Errors
    ///
    /// `Error::Validation` if the context tenant is empty or the embedding
    /// dimension is wrong.
    async fn create_node(&self, ctx: &RequestContext, node: NewNode) -> Result<Uuid>;

    /// Fetch a node; `None` when absent or invisible under the tenant.
    async fn get_node(&self, ctx: &RequestContext, id: Uuid) -> Result<Option<Node>>;

    /// Fetch a node by its `external_id` prop.
    async fn get_node_by_external_id(
        &self,
        ctx: &RequestContext,
        external_id: &str,
    ) -> Result<Option<Node>>;

    /// Apply a partial update, bump `version`, write the `updated` event and
    /// a version snapshot.
    ///
    /// # Errors
    ///
    /// `Error::Conflict` when `patch.expected_version` is set and differs
    /// from the stored version.
    async fn update_node(&self, ctx: &RequestContext, id: Uuid, patch: NodePatch) -> Result<Node>;

    /// Soft delete (tag `Deleted` + grace deadline) or hard delete.
    ///
    /// Returns `false` when the node is not visible under the tenant.
    async fn delete_node(&self, ctx: &RequestContext, id: Uuid, hard: bool) -> Result<bool>;

    /// List nodes, newest first.
    async fn list_nodes(
        &self,
        ctx: &RequestContext,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<Node>>;

    /// List version snapshots, oldest first.
    async fn list_versions(&self, ctx: &RequestContext, id: Uuid) -> Result<Vec<NodeVersion>>;

    // ---- edges and lineage ----------------------------------------------

    /// Create an edge; both endpoints must be visible under the tenant.
    async fn create_edge(&self, ctx: &RequestContext, edge: NewEdge) -> Result<()>;

    /// Walk `DERIVED_FROM` edges from a node up to `max_depth`, returning
    /// ancestors ordered by depth.
    async fn get_lineage(
        &self,
        ctx: &RequestContext,
        id: Uuid,
        max_depth: u32,
    ) -> Result<Vec<LineageEntry>>;

    /// Edges originating from a node (used by cascade deletion).
    async fn edges_from(&self, ctx: &RequestContext, src: Uuid) -> Result<Vec<Edge>>;

    /// Ids of nodes whose `parent_id` prop points at the given node
    /// (a parent document's chunks).
    async fn find_children(&self, ctx: &RequestContext, parent: Uuid) -> Result<Vec<Uuid>>;

    // ---- search ----------------------------------------------------------

    /// ANN over embeddings with cosine distance; returns `(node, similarity)`
    /// with `similarity = 1 - distance`, best first.
    async fn vector_search(
        &self,
        ctx: &RequestContext,
        query: &[f32],
        top_k: usize,
        filters: &SearchFilters,
    ) -> Result<Vec<(Node, f32)>>;

    /// Full-text BM25 ranking over indexed node text, best first.
    async fn lexical_search(
        &self,
        ctx: &RequestContext,
        query: &str,
        top_k: usize,
        filters: &SearchFilters,
    ) -> Result<Vec<(Node, f32)>>;

    // ---- events and history ---------------------------------------------

    /// Append an audit event. Events are never mutated.
    async fn append_event(
        &self,
        ctx: &RequestContext,
        node_id: Uuid,
        event: NewEvent,
    ) -> Result<()>;

    /// List events, newest first.
    async fn list_events(&self, ctx: &RequestContext, filter: &EventFilter) -> Result<Vec<Event>>;

    /// Record one embedding-history row for a refresh.
    async fn write_embedding_history(
        &self,
        ctx: &RequestContext,
        node_id: Uuid,
        drift_score: f64,
        embedding_ref: Option<&str>,
    ) -> Result<()>;

    // ---- refresh support -------------------------------------------------

    /// Nodes carrying a refresh policy for a tenant, oldest-refreshed first.
    /// The due predicate itself is evaluated by the scheduler.
    async fn refresh_candidates(
        &self,
        ctx: &RequestContext,
        limit: usize,
    ) -> Result<Vec<Node>>;

    /// Tenants that own at least one node with a refresh policy.
    async fn tenants_with_policies(&self) -> Result<Vec<String>>;

    /// Persist a new embedding plus refresh bookkeeping, bumping `version`.
    /// Returns the new version.
    async fn set_refresh_state(
        &self,
        ctx: &RequestContext,
        id: Uuid,
        update: RefreshStateUpdate,
    ) -> Result<i64>;

    /// Nodes with non-empty trigger lists across all tenants (full trigger
    /// scan; admin path).
    async fn nodes_with_triggers(&self, limit: usize, offset: usize) -> Result<Vec<Node>>;

    // ---- patterns --------------------------------------------------------

    /// Insert or update a named pattern vector.
    async fn upsert_pattern(
        &self,
        ctx: &RequestContext,
        name: &str,
        embedding: &[f32],
        description: Option<&str>,
    ) -> Result<()>;

    /// Fetch a pattern by name within the active namespace.
    async fn get_pattern(&self, ctx: &RequestContext, name: &str) -> Result<Option<Pattern>>;

    /// List patterns visible to the tenant, ordered by name.
    async fn list_patterns(&self, ctx: &RequestContext) -> Result<Vec<Pattern>>;

    /// Delete a pattern; returns whether a row was removed.
    async fn delete_pattern(&self, ctx: &RequestContext, name: &str) -> Result<bool>;

    // ---- connector configs and cursors ----------------------------------

    /// Insert or update a connector config row.
    async fn upsert_connector_config(&self, record: &ConnectorConfigRecord) -> Result<()>;

    /// Fetch a tenant's config for a provider.
    async fn get_connector_config(
        &self,
        ctx: &RequestContext,
        provider: &str,
    ) -> Result<Option<ConnectorConfigRecord>>;

    /// Admin listing across tenants, filtered for rotation.
    async fn list_connector_configs(
        &self,
        filter: &RotationFilter,
    ) -> Result<Vec<ConnectorConfigRecord>>;

    /// Toggle a connector; returns whether a row was updated.
    async fn set_connector_enabled(
        &self,
        ctx: &RequestContext,
        provider: &str,
        enabled: bool,
    ) -> Result<bool>;

    /// Fetch the sync cursor for `(tenant, provider)`.
    async fn get_connector_cursor(
        &self,
        ctx: &RequestContext,
        provider: &str,
    ) -> Result<Option<ConnectorCursorRecord>>;

    /// Store the sync cursor for `(tenant, provider)`.
    async fn set_connector_cursor(
        &self,
        ctx: &RequestContext,
        provider: &str,
        cursor: &Value,
    ) -> Result<()>;

    // ---- purge -----------------------------------------------------------

    /// Hard-remove tombstoned nodes whose grace deadline passed.
    ///
    /// `tenant` of `None` spans all tenants (admin). Dry-run only counts.
    async fn purge_deleted(
        &self,
        tenant: Option<&str>,
        now: DateTime<Utc>,
        batch_size: usize,
        dry_run: bool,
    ) -> Result<PurgeReport>;
}
