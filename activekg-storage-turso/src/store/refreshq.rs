//! Refresh-loop queries: candidates, tenants, state updates, trigger scans.

use activekg_core::storage::RefreshStateUpdate;
use activekg_core::types::{Node, RequestContext};
use activekg_core::{Error, Result};
use uuid::Uuid;

use super::nodes::{node_from_row, NODE_COLUMNS};
use crate::{now_ms, query_one, TursoGraphStore};

impl TursoGraphStore {
    /// Nodes with a refresh policy for the context tenant, oldest-refreshed
    /// first so starved nodes are considered before recently touched ones.
    pub(crate) async fn fetch_refresh_candidates(
        &self,
        ctx: &RequestContext,
        limit: usize,
    ) -> Result<Vec<Node>> {
        let sql = format!(
            "SELECT {NODE_COLUMNS} FROM nodes \
             WHERE tenant_id = ? AND refresh_policy IS NOT NULL \
               AND classes NOT LIKE '%\"Deleted\"%' \
             ORDER BY COALESCE(last_refreshed, 0) ASC \
             LIMIT ?"
        );
        let pooled = self.conn().await?;
        let mut rows = pooled
            .connection()
            .query(
                &sql,
                libsql::params![ctx.tenant_id.as_str(), limit.max(1) as i64],
            )
            .await
            .map_err(|e| Error::Storage(format!("refresh candidates query failed: {e}")))?;

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

    pub(crate) async fn fetch_tenants_with_policies(&self) -> Result<Vec<String>> {
        let pooled = self.conn().await?;
        let mut rows = pooled
            .connection()
            .query(
                "SELECT DISTINCT tenant_id FROM nodes WHERE refresh_policy IS NOT NULL ORDER BY tenant_id",
                (),
            )
            .await
            .map_err(|e| Error::Storage(format!("tenant scan failed: {e}")))?;

        let mut tenants = Vec::new();
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| Error::Storage(e.to_string()))?
        {
            tenants.push(row.get(0).map_err(|e| Error::Storage(e.to_string()))?);
        }
        Ok(tenants)
    }

    /// Persist a fresh embedding plus refresh bookkeeping, bumping version.
    pub(crate) async fn apply_refresh_state(
        &self,
        ctx: &RequestContext,
        id: Uuid,
        update: &RefreshStateUpdate,
    ) -> Result<i64> {
        if update.embedding.len() != self.config().dimension {
            return Err(Error::Validation(format!(
                "embedding dimension {} does not match configured dimension {}",
                update.embedding.len(),
                self.config().dimension
            )));
        }

        let embedding_json = serde_json::to_string(&update.embedding)?;
        let pooled = self.conn().await?;
        let row = query_one(
            pooled.connection(),
            r#"
            UPDATE nodes
            SET embedding = vector32(?), drift_score = ?, last_refreshed = ?,
                version = version + 1, updated_at = ?
            WHERE id = ? AND tenant_id = ?
            RETURNING version
            "#,
            libsql::params![
                embedding_json,
                update.drift_score,
                update.last_refreshed.timestamp_millis(),
                now_ms(),
                id.to_string(),
                ctx.tenant_id.as_str()
            ],
        )
        .await?;

        match row {
            Some(row) => row.get(0).map_err(|e| Error::Storage(e.to_string())),
            None => Err(Error::NotFound(format!("node {id}"))),
        }
    }

    /// Nodes carrying triggers across all tenants (full trigger scan).
    pub(crate) async fn fetch_nodes_with_triggers(
        &self,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<Node>> {
        let sql = format!(
            "SELECT {NODE_COLUMNS} FROM nodes \
             WHERE triggers != '[]' AND embedding IS NOT NULL \
               AND classes NOT LIKE '%\"Deleted\"%' \
             ORDER BY tenant_id, id \
             LIMIT ? OFFSET ?"
        );
        let pooled = self.conn().await?;
        let mut rows = pooled
            .connection()
            .query(&sql, libsql::params![limit.max(1) as i64, offset as i64])
            .await
            .map_err(|e| Error::Storage(format!("trigger scan failed: {e}")))?;

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
}
