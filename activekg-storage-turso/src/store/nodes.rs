//! Node CRUD operations and version snapshots.

use activekg_core::constants::CLASS_DELETED;
use activekg_core::types::{
    EventType, NewNode, Node, NodePatch, NodeVersion, RefreshPolicy, RequestContext, TriggerSpec,
};
use activekg_core::{Error, Result};
use chrono::Duration;
use libsql::Connection;
use serde_json::{json, Value};
use tracing::debug;
use uuid::Uuid;

use super::events::insert_event_on;
use crate::{ms_to_datetime, now_ms, query_one, TursoGraphStore};

/// Column list shared by every node SELECT. `vector_extract` renders the
/// embedding blob back to JSON text.
pub(crate) const NODE_COLUMNS: &str = "id, tenant_id, classes, props, metadata, payload_ref, \
     vector_extract(embedding), refresh_policy, triggers, version, \
     last_refreshed, drift_score, grace_until, created_at, updated_at";

/// Map a node row in [`NODE_COLUMNS`] order.
pub(crate) fn node_from_row(row: &libsql::Row) -> Result<Node> {
    let get_err = |e: libsql::Error| Error::Storage(format!("node row: {e}"));

    let id: String = row.get(0).map_err(get_err)?;
    let tenant_id: String = row.get(1).map_err(get_err)?;
    let classes: String = row.get(2).map_err(get_err)?;
    let props: String = row.get(3).map_err(get_err)?;
    let metadata: String = row.get(4).map_err(get_err)?;
    let payload_ref: Option<String> = row.get(5).map_err(get_err)?;
    let embedding: Option<String> = row.get(6).map_err(get_err)?;
    let refresh_policy: Option<String> = row.get(7).map_err(get_err)?;
    let triggers: Option<String> = row.get(8).map_err(get_err)?;
    let version: i64 = row.get(9).map_err(get_err)?;
    let last_refreshed: Option<i64> = row.get(10).map_err(get_err)?;
    let drift_score: Option<f64> = row.get(11).map_err(get_err)?;
    let _grace_until: Option<i64> = row.get(12).map_err(get_err)?;
    let created_at: i64 = row.get(13).map_err(get_err)?;
    let updated_at: i64 = row.get(14).map_err(get_err)?;

    Ok(Node {
        id: id
            .parse()
            .map_err(|e| Error::Storage(format!("invalid node id: {e}")))?,
        tenant_id,
        classes: serde_json::from_str(&classes)?,
        props: serde_json::from_str(&props)?,
        metadata: serde_json::from_str(&metadata)?,
        payload_ref,
        embedding: embedding.map(|e| serde_json::from_str(&e)).transpose()?,
        refresh_policy: refresh_policy
            .map(|p| serde_json::from_str::<RefreshPolicy>(&p))
            .transpose()?,
        triggers: triggers
            .map(|t| serde_json::from_str::<Vec<TriggerSpec>>(&t))
            .transpose()?
            .unwrap_or_default(),
        version,
        last_refreshed: last_refreshed.map(ms_to_datetime),
        drift_score,
        created_at: ms_to_datetime(created_at),
        updated_at: ms_to_datetime(updated_at),
    })
}

fn require_tenant(ctx: &RequestContext) -> Result<()> {
    if ctx.tenant_id.trim().is_empty() {
        return Err(Error::Validation("tenant_id must not be empty".to_string()));
    }
    Ok(())
}

fn json_or<T: serde::Serialize>(value: &T, default: &str) -> Result<String> {
    let s = serde_json::to_string(value)?;
    Ok(if s == "null" { default.to_string() } else { s })
}

/// Insert an immutable version snapshot on the given connection.
pub(crate) async fn insert_version_on(
    conn: &Connection,
    tenant_id: &str,
    node_id: Uuid,
    version: i64,
    classes: &str,
    props: &str,
    metadata: &str,
    now: i64,
) -> Result<()> {
    conn.execute(
        r#"
        INSERT INTO node_versions (node_id, version, tenant_id, classes, props, metadata, created_at)
        VALUES (?, ?, ?, ?, ?, ?, ?)
        "#,
        libsql::params![
            node_id.to_string(),
            version,
            tenant_id,
            classes,
            props,
            metadata,
            now
        ],
    )
    .await
    .map_err(|e| Error::Storage(format!("failed to write version snapshot: {e}")))?;
    Ok(())
}

impl TursoGraphStore {
    fn validate_embedding(&self, embedding: Option<&[f32]>) -> Result<()> {
        if let Some(e) = embedding {
            if e.len() != self.config().dimension {
                return Err(Error::Validation(format!(
                    "embedding dimension {} does not match configured dimension {}",
                    e.len(),
                    self.config().dimension
                )));
            }
        }
        Ok(())
    }

    pub(crate) async fn insert_node(&self, ctx: &RequestContext, node: NewNode) -> Result<Uuid> {
        require_tenant(ctx)?;
        self.validate_embedding(node.embedding.as_deref())?;

        let id = Uuid::new_v4();
        let now = now_ms();
        let classes = json_or(&node.classes, "[]")?;
        let props = json_or(&node.props, "{}")?;
        let metadata = json_or(&node.metadata, "{}")?;
        let triggers = json_or(&node.triggers, "[]")?;
        let refresh_policy = node
            .refresh_policy
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;

        let pooled = self.conn().await?;
        let conn = pooled.connection();
        let tx = conn
            .transaction()
            .await
            .map_err(|e| Error::Storage(format!("begin failed: {e}")))?;

        if let Some(embedding) = &node.embedding {
            let embedding_json = serde_json::to_string(embedding)?;
            tx.execute(
                r#"
                INSERT INTO nodes (id, tenant_id, classes, props, metadata, payload_ref,
                                   embedding, refresh_policy, triggers, version, created_at, updated_at)
                VALUES (?, ?, ?, ?, ?, ?, vector32(?), ?, ?, 1, ?, ?)
                "#,
                libsql::params![
                    id.to_string(),
                    ctx.tenant_id.as_str(),
                    classes.as_str(),
                    props.as_str(),
                    metadata.as_str(),
                    node.payload_ref.clone(),
                    embedding_json,
                    refresh_policy.clone(),
                    triggers.as_str(),
                    now,
                    now
                ],
            )
            .await
        } else {
            tx.execute(
                r#"
                INSERT INTO nodes (id, tenant_id, classes, props, metadata, payload_ref,
                                   embedding, refresh_policy, triggers, version, created_at, updated_at)
                VALUES (?, ?, ?, ?, ?, ?, NULL, ?, ?, 1, ?, ?)
                "#,
                libsql::params![
                    id.to_string(),
                    ctx.tenant_id.as_str(),
                    classes.as_str(),
                    props.as_str(),
                    metadata.as_str(),
                    node.payload_ref.clone(),
                    refresh_policy.clone(),
                    triggers.as_str(),
                    now,
                    now
                ],
            )
            .await
        }
        .map_err(|e| Error::Storage(format!("failed to insert node: {e}")))?;

        insert_version_on(&tx, &ctx.tenant_id, id, 1, &classes, &props, &metadata, now).await?;
        insert_event_on(&tx, ctx, id, EventType::Created, &json!({}), now).await?;

        tx.commit()
            .await
            .map_err(|e| Error::Storage(format!("commit failed: {e}")))?;

        debug!(node_id = %id, tenant = %ctx.tenant_id, "node created");
        Ok(id)
    }

    pub(crate) async fn fetch_node(&self, ctx: &RequestContext, id: Uuid) -> Result<Option<Node>> {
        let pooled = self.conn().await?;
        let sql = format!("SELECT {NODE_COLUMNS} FROM nodes WHERE id = ? AND tenant_id = ?");
        let row = query_one(
            pooled.connection(),
            &sql,
            libsql::params![id.to_string(), ctx.tenant_id.as_str()],
        )
        .await?;
        row.map(|r| node_from_row(&r)).transpose()
    }

    pub(crate) async fn fetch_node_by_external_id(
        &self,
        ctx: &RequestContext,
        external_id: &str,
    ) -> Result<Option<Node>> {
        let pooled = self.conn().await?;
        let sql = format!(
            "SELECT {NODE_COLUMNS} FROM nodes \
             WHERE tenant_id = ? AND json_extract(props, '$.external_id') = ?"
        );
        let row = query_one(
            pooled.connection(),
            &sql,
            libsql::params![ctx.tenant_id.as_str(), external_id],
        )
        .await?;
        row.map(|r| node_from_row(&r)).transpose()
    }

    pub(crate) async fn apply_node_patch(
        &self,
        ctx: &RequestContext,
        id: Uuid,
        patch: NodePatch,
    ) -> Result<Node> {
        if let Some(Some(embedding)) = &patch.embedding {
            self.validate_embedding(Some(embedding))?;
        }

        let pooled = self.conn().await?;
        let conn = pooled.connection();
        let tx = conn
            .transaction()
            .await
            .map_err(|e| Error::Storage(format!("begin failed: {e}")))?;

        let sql = format!("SELECT {NODE_COLUMNS} FROM nodes WHERE id = ? AND tenant_id = ?");
        let Some(row) = query_one(
            &tx,
            &sql,
            libsql::params![id.to_string(), ctx.tenant_id.as_str()],
        )
        .await?
        else {
            return Err(Error::NotFound(format!("node {id}")));
        };
        let current = node_from_row(&row)?;

        if let Some(expected) = patch.expected_version {
            if expected != current.version {
                return Err(Error::Conflict(format!(
                    "expected version {expected}, found {}",
                    current.version
                )));
            }
        }

        let classes = patch.classes.unwrap_or(current.classes);
        let props = patch.props.unwrap_or(current.props);
        let metadata = patch.metadata.unwrap_or(current.metadata);
        let payload_ref = match patch.payload_ref {
            Some(p) => p,
            None => current.payload_ref,
        };
        let triggers = patch.triggers.unwrap_or(current.triggers);
        let refresh_policy = match patch.refresh_policy {
            Some(p) => p,
            None => current.refresh_policy,
        };
        let embedding = match patch.embedding {
            Some(e) => e,
            None => current.embedding,
        };

        let classes_json = json_or(&classes, "[]")?;
        let props_json = json_or(&props, "{}")?;
        let metadata_json = json_or(&metadata, "{}")?;
        let triggers_json = json_or(&triggers, "[]")?;
        let policy_json = refresh_policy
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;
        let now = now_ms();
        let new_version = current.version + 1;

        let affected = if let Some(embedding) = &embedding {
            let embedding_json = serde_json::to_string(embedding)?;
            tx.execute(
                r#"
                UPDATE nodes
                SET classes = ?, props = ?, metadata = ?, payload_ref = ?,
                    embedding = vector32(?), refresh_policy = ?, triggers = ?,
                    version = ?, updated_at = ?
                WHERE id = ? AND tenant_id = ? AND version = ?
                "#,
                libsql::params![
                    classes_json.as_str(),
                    props_json.as_str(),
                    metadata_json.as_str(),
                    payload_ref.clone(),
                    embedding_json,
                    policy_json.clone(),
                    triggers_json.as_str(),
                    new_version,
                    now,
                    id.to_string(),
                    ctx.tenant_id.as_str(),
                    current.version
                ],
            )
            .await
        } else {
            tx.execute(
                r#"
                UPDATE nodes
                SET classes = ?, props = ?, metadata = ?, payload_ref = ?,
                    embedding = NULL, refresh_policy = ?, triggers = ?,
                    version = ?, updated_at = ?
                WHERE id = ? AND tenant_id = ? AND version = ?
                "#,
                libsql::params![
                    classes_json.as_str(),
                    props_json.as_str(),
                    metadata_json.as_str(),
                    payload_ref.clone(),
                    policy_json.clone(),
                    triggers_json.as_str(),
                    new_version,
                    now,
                    id.to_string(),
                    ctx.tenant_id.as_str(),
                    current.version
                ],
            )
            .await
        }
        .map_err(|e| Error::Storage(format!("failed to update node: {e}")))?;

        if affected == 0 {
            return Err(Error::Conflict(format!(
                "node {id} was modified concurrently"
            )));
        }

        insert_version_on(
            &tx,
            &ctx.tenant_id,
            id,
            new_version,
            &classes_json,
            &props_json,
            &metadata_json,
            now,
        )
        .await?;
        insert_event_on(
            &tx,
            ctx,
            id,
            EventType::Updated,
            &json!({ "version": new_version }),
            now,
        )
        .await?;

        tx.commit()
            .await
            .map_err(|e| Error::Storage(format!("commit failed: {e}")))?;

        self.fetch_node(ctx, id)
            .await?
            .ok_or_else(|| Error::Storage(format!("node {id} vanished after update")))
    }

    pub(crate) async fn remove_node(
        &self,
        ctx: &RequestContext,
        id: Uuid,
        hard: bool,
    ) -> Result<bool> {
        let Some(current) = self.fetch_node(ctx, id).await? else {
            return Ok(false);
        };

        let pooled = self.conn().await?;
        let conn = pooled.connection();
        let tx = conn
            .transaction()
            .await
            .map_err(|e| Error::Storage(format!("begin failed: {e}")))?;
        let now = now_ms();

        if hard {
            if self.config().events_retain_on_hard_delete {
                insert_event_on(&tx, ctx, id, EventType::Deleted, &json!({ "hard": true }), now)
                    .await?;
            } else {
                tx.execute(
                    "DELETE FROM events WHERE node_id = ? AND tenant_id = ?",
                    libsql::params![id.to_string(), ctx.tenant_id.as_str()],
                )
                .await
                .map_err(|e| Error::Storage(format!("failed to delete events: {e}")))?;
            }
            tx.execute(
                "DELETE FROM edges WHERE tenant_id = ? AND (src = ? OR dst = ?)",
                libsql::params![ctx.tenant_id.as_str(), id.to_string(), id.to_string()],
            )
            .await
            .map_err(|e| Error::Storage(format!("failed to delete edges: {e}")))?;
            for table in ["node_versions", "embedding_history"] {
                let sql = format!("DELETE FROM {table} WHERE tenant_id = ? AND node_id = ?");
                tx.execute(
                    &sql,
                    libsql::params![ctx.tenant_id.as_str(), id.to_string()],
                )
                .await
                .map_err(|e| Error::Storage(format!("failed cascade delete: {e}")))?;
            }
            tx.execute(
                "DELETE FROM nodes WHERE id = ? AND tenant_id = ?",
                libsql::params![id.to_string(), ctx.tenant_id.as_str()],
            )
            .await
            .map_err(|e| Error::Storage(format!("failed to delete node: {e}")))?;
        } else {
            let grace_until =
                ms_to_datetime(now) + Duration::seconds(self.config().deletion_grace_secs);
            let mut classes = current.classes.clone();
            if !classes.iter().any(|c| c == CLASS_DELETED) {
                classes.push(CLASS_DELETED.to_string());
            }
            let mut props = current.props.clone();
            if let Value::Object(map) = &mut props {
                map.insert(
                    "deletion_grace_until".to_string(),
                    Value::String(grace_until.to_rfc3339()),
                );
            }
            let classes_json = json_or(&classes, "[]")?;
            let props_json = json_or(&props, "{}")?;
            let new_version = current.version + 1;

            tx.execute(
                r#"
                UPDATE nodes
                SET classes = ?, props = ?, grace_until = ?, version = ?, updated_at = ?
                WHERE id = ? AND tenant_id = ?
                "#,
                libsql::params![
                    classes_json.as_str(),
                    props_json.as_str(),
                    grace_until.timestamp_millis(),
                    new_version,
                    now,
                    id.to_string(),
                    ctx.tenant_id.as_str()
                ],
            )
            .await
            .map_err(|e| Error::Storage(format!("failed to soft delete: {e}")))?;

            insert_version_on(
                &tx,
                &ctx.tenant_id,
                id,
                new_version,
                &classes_json,
                &props_json,
                &json_or(&current.metadata, "{}")?,
                now,
            )
            .await?;
            insert_event_on(
                &tx,
                ctx,
                id,
                EventType::Deleted,
                &json!({ "hard": false, "grace_until": grace_until.to_rfc3339() }),
                now,
            )
            .await?;
        }

        tx.commit()
            .await
            .map_err(|e| Error::Storage(format!("commit failed: {e}")))?;
        debug!(node_id = %id, hard, "node deleted");
        Ok(true)
    }

    pub(crate) async fn fetch_nodes_page(
        &self,
        ctx: &RequestContext,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<Node>> {
        let pooled = self.conn().await?;
        let sql = format!(
            "SELECT {NODE_COLUMNS} FROM nodes WHERE tenant_id = ? \
             ORDER BY updated_at DESC, id LIMIT ? OFFSET ?"
        );
        let mut rows = pooled
            .connection()
            .query(
                &sql,
                libsql::params![ctx.tenant_id.as_str(), limit as i64, offset as i64],
            )
            .await
            .map_err(|e| Error::Storage(format!("list failed: {e}")))?;

        let mut nodes = Vec::new();
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| Error::Storage(e.to_string()))?
        {
            nodes.push(node_from_row(&row)?);
        }
        Ok(nodes)
    }

    pub(crate) async fn fetch_children(
        &self,
        ctx: &RequestContext,
        parent: Uuid,
    ) -> Result<Vec<Uuid>> {
        let pooled = self.conn().await?;
        let mut rows = pooled
            .connection()
            .query(
                "SELECT id FROM nodes \
                 WHERE tenant_id = ? AND json_extract(props, '$.parent_id') = ? \
                 ORDER BY json_extract(props, '$.chunk_index'), id",
                libsql::params![ctx.tenant_id.as_str(), parent.to_string()],
            )
            .await
            .map_err(|e| Error::Storage(format!("children query failed: {e}")))?;

        let mut children = Vec::new();
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| Error::Storage(e.to_string()))?
        {
            let id: String = row.get(0).map_err(|e| Error::Storage(e.to_string()))?;
            children.push(
                id.parse()
                    .map_err(|e| Error::Storage(format!("invalid child id: {e}")))?,
            );
        }
        Ok(children)
    }

    pub(crate) async fn fetch_versions(
        &self,
        ctx: &RequestContext,
        id: Uuid,
    ) -> Result<Vec<NodeVersion>> {
        let pooled = self.conn().await?;
        let mut rows = pooled
            .connection()
            .query(
                r#"
                SELECT node_id, version, classes, props, metadata, created_at
                FROM node_versions
                WHERE tenant_id = ? AND node_id = ?
                ORDER BY version ASC
                "#,
                libsql::params![ctx.tenant_id.as_str(), id.to_string()],
            )
            .await
            .map_err(|e| Error::Storage(format!("versions query failed: {e}")))?;

        let mut versions = Vec::new();
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| Error::Storage(e.to_string()))?
        {
            let node_id: String = row.get(0).map_err(|e| Error::Storage(e.to_string()))?;
            let classes: String = row.get(2).map_err(|e| Error::Storage(e.to_string()))?;
            let props: String = row.get(3).map_err(|e| Error::Storage(e.to_string()))?;
            let metadata: String = row.get(4).map_err(|e| Error::Storage(e.to_string()))?;
            versions.push(NodeVersion {
                node_id: node_id
                    .parse()
                    .map_err(|e| Error::Storage(format!("invalid node id: {e}")))?,
                version: row.get(1).map_err(|e| Error::Storage(e.to_string()))?,
                classes: serde_json::from_str(&classes)?,
                props: serde_json::from_str(&props)?,
                metadata: serde_json::from_str(&metadata)?,
                created_at: ms_to_datetime(
                    row.get(5).map_err(|e| Error::Storage(e.to_string()))?,
                ),
            });
        }
        Ok(versions)
    }
}
