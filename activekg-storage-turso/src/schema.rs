//! Database schema definitions for the graph store.
//!
//! Every tenant-owned table carries a `tenant_id` column and a guard trigger
//! rejecting empty tenants; `events` and `node_versions` additionally refuse
//! updates so the audit trail stays append-only. The guard triggers are what
//! the `RLS_MODE` probe looks for.

/// SQL to create the nodes table.
///
/// `classes`, `props`, `metadata`, `refresh_policy`, and `triggers` are JSON
/// text; `embedding` is a libSQL vector blob sized at migration time.
pub fn create_nodes_table(dimension: usize) -> String {
    format!(
        r#"
CREATE TABLE IF NOT EXISTS nodes (
    id TEXT PRIMARY KEY NOT NULL,
    tenant_id TEXT NOT NULL,
    classes TEXT NOT NULL DEFAULT '[]',
    props TEXT NOT NULL DEFAULT '{{}}',
    metadata TEXT NOT NULL DEFAULT '{{}}',
    payload_ref TEXT,
    embedding F32_BLOB({dimension}),
    refresh_policy TEXT,
    triggers TEXT NOT NULL DEFAULT '[]',
    version INTEGER NOT NULL DEFAULT 1,
    last_refreshed INTEGER,
    drift_score REAL,
    grace_until INTEGER,
    created_at INTEGER NOT NULL,
    updated_at INTEGER NOT NULL
)
"#
    )
}

/// SQL to create the edges table.
pub const CREATE_EDGES_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS edges (
    src TEXT NOT NULL,
    rel TEXT NOT NULL,
    dst TEXT NOT NULL,
    tenant_id TEXT NOT NULL,
    props TEXT NOT NULL DEFAULT '{}',
    created_at INTEGER NOT NULL,
    PRIMARY KEY (src, rel, dst)
)
"#;

/// SQL to create the append-only events table.
pub const CREATE_EVENTS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS events (
    id TEXT PRIMARY KEY NOT NULL,
    node_id TEXT NOT NULL,
    event_type TEXT NOT NULL,
    payload TEXT NOT NULL DEFAULT '{}',
    tenant_id TEXT NOT NULL,
    actor_id TEXT NOT NULL,
    actor_type TEXT NOT NULL,
    created_at INTEGER NOT NULL
)
"#;

/// SQL to create the immutable node version snapshots table.
pub const CREATE_NODE_VERSIONS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS node_versions (
    node_id TEXT NOT NULL,
    version INTEGER NOT NULL,
    tenant_id TEXT NOT NULL,
    classes TEXT NOT NULL DEFAULT '[]',
    props TEXT NOT NULL DEFAULT '{}',
    metadata TEXT NOT NULL DEFAULT '{}',
    created_at INTEGER NOT NULL,
    PRIMARY KEY (node_id, version)
)
"#;

/// SQL to create the embedding history table.
pub const CREATE_EMBEDDING_HISTORY_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS embedding_history (
    id TEXT PRIMARY KEY NOT NULL,
    node_id TEXT NOT NULL,
    tenant_id TEXT NOT NULL,
    drift_score REAL NOT NULL,
    embedding_ref TEXT,
    created_at INTEGER NOT NULL
)
"#;

/// SQL to create the patterns table.
///
/// `tenant_id` is empty string in the global-namespace compatibility mode;
/// uniqueness is per `(tenant_id, name)` either way.
pub fn create_patterns_table(dimension: usize) -> String {
    format!(
        r#"
CREATE TABLE IF NOT EXISTS patterns (
    name TEXT NOT NULL,
    tenant_id TEXT NOT NULL DEFAULT '',
    embedding F32_BLOB({dimension}) NOT NULL,
    description TEXT,
    created_at INTEGER NOT NULL,
    updated_at INTEGER NOT NULL,
    PRIMARY KEY (tenant_id, name)
)
"#
    )
}

/// SQL to create the connector configs table. Secret-valued fields inside
/// `config` are ciphertext strings.
pub const CREATE_CONNECTOR_CONFIGS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS connector_configs (
    tenant_id TEXT NOT NULL,
    provider TEXT NOT NULL,
    config TEXT NOT NULL DEFAULT '{}',
    key_version INTEGER NOT NULL DEFAULT 1,
    enabled INTEGER NOT NULL DEFAULT 1,
    created_at INTEGER NOT NULL,
    updated_at INTEGER NOT NULL,
    PRIMARY KEY (tenant_id, provider)
)
"#;

/// SQL to create the connector cursors table.
pub const CREATE_CONNECTOR_CURSORS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS connector_cursors (
    tenant_id TEXT NOT NULL,
    provider TEXT NOT NULL,
    cursor TEXT NOT NULL DEFAULT '{}',
    updated_at INTEGER NOT NULL,
    PRIMARY KEY (tenant_id, provider)
)
"#;

/// Index on nodes tenant for scoped scans.
pub const CREATE_NODES_TENANT_INDEX: &str = r#"
CREATE INDEX IF NOT EXISTS idx_nodes_tenant
ON nodes(tenant_id, updated_at DESC)
"#;

/// Index on the external id prop for ingestion upserts.
pub const CREATE_NODES_EXTERNAL_ID_INDEX: &str = r#"
CREATE INDEX IF NOT EXISTS idx_nodes_external_id
ON nodes(tenant_id, json_extract(props, '$.external_id'))
"#;

/// Index on refresh bookkeeping for due scans.
pub const CREATE_NODES_REFRESH_INDEX: &str = r#"
CREATE INDEX IF NOT EXISTS idx_nodes_refresh
ON nodes(tenant_id, last_refreshed)
WHERE refresh_policy IS NOT NULL
"#;

/// Index on tombstone grace deadlines for the purger.
pub const CREATE_NODES_GRACE_INDEX: &str = r#"
CREATE INDEX IF NOT EXISTS idx_nodes_grace
ON nodes(grace_until)
WHERE grace_until IS NOT NULL
"#;

/// Index on edges for lineage walks.
pub const CREATE_EDGES_SRC_INDEX: &str = r#"
CREATE INDEX IF NOT EXISTS idx_edges_src
ON edges(tenant_id, src, rel)
"#;

/// Index on edges destination for cascade deletes.
pub const CREATE_EDGES_DST_INDEX: &str = r#"
CREATE INDEX IF NOT EXISTS idx_edges_dst
ON edges(tenant_id, dst, rel)
"#;

/// Index on events for per-node history listing.
pub const CREATE_EVENTS_NODE_INDEX: &str = r#"
CREATE INDEX IF NOT EXISTS idx_events_node
ON events(tenant_id, node_id, created_at DESC)
"#;

/// Index on embedding history for drift-spike queries.
pub const CREATE_HISTORY_NODE_INDEX: &str = r#"
CREATE INDEX IF NOT EXISTS idx_history_node
ON embedding_history(tenant_id, node_id, created_at DESC)
"#;

/// Guard trigger names, probed by the `RLS_MODE` check.
pub const GUARD_TRIGGER_NAMES: [&str; 5] = [
    "nodes_tenant_guard",
    "edges_tenant_guard",
    "events_tenant_guard",
    "events_append_only",
    "node_versions_immutable",
];

/// SQL for the tenant/immutability guard triggers.
pub const CREATE_GUARD_TRIGGERS: &str = r#"
CREATE TRIGGER IF NOT EXISTS nodes_tenant_guard
BEFORE INSERT ON nodes
WHEN NEW.tenant_id IS NULL OR NEW.tenant_id = ''
BEGIN
    SELECT RAISE(ABORT, 'tenant_id required');
END;

CREATE TRIGGER IF NOT EXISTS edges_tenant_guard
BEFORE INSERT ON edges
WHEN NEW.tenant_id IS NULL OR NEW.tenant_id = ''
BEGIN
    SELECT RAISE(ABORT, 'tenant_id required');
END;

CREATE TRIGGER IF NOT EXISTS events_tenant_guard
BEFORE INSERT ON events
WHEN NEW.tenant_id IS NULL OR NEW.tenant_id = ''
BEGIN
    SELECT RAISE(ABORT, 'tenant_id required');
END;

CREATE TRIGGER IF NOT EXISTS events_append_only
BEFORE UPDATE ON events
BEGIN
    SELECT RAISE(ABORT, 'events are append-only');
END;

CREATE TRIGGER IF NOT EXISTS node_versions_immutable
BEFORE UPDATE ON node_versions
BEGIN
    SELECT RAISE(ABORT, 'node versions are immutable');
END;
"#;

/// SQL to create the vector ANN index over node embeddings.
pub const CREATE_NODES_VECTOR_INDEX: &str = r#"
CREATE INDEX IF NOT EXISTS idx_nodes_embedding
ON nodes(libsql_vector_idx(embedding))
"#;
