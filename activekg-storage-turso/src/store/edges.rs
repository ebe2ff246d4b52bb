//! Edges and lineage traversal.

use activekg_core::constants::DERIVED_FROM;
use activekg_core::storage::NewEdge;
use activekg_core::types::{Edge, LineageEntry, RequestContext};
use activekg_core::{Error, Result};
use uuid::Uuid;

use crate::{ms_to_datetime, now_ms, query_one, TursoGraphStore};

impl TursoGraphStore {
    pub(crate) async fn insert_edge(&self, ctx: &RequestContext, edge: NewEdge) -> Result<()> {
        // Both endpoints must be visible under the caller's tenant
        let pooled = self.conn().await?;
        let conn = pooled.connection();
        for endpoint in [edge.src, edge.dst] {
            let row = query_one(
                conn,
                "SELECT 1 FROM nodes WHERE id = ? AND tenant_id = ?",
                libsql::params![endpoint.to_string(), ctx.tenant_id.as_str()],
            )
            .await?;
            if row.is_none() {
                return Err(Error::NotFound(format!("node {endpoint}")));
            }
        }

        conn.execute(
            r#"
            INSERT OR REPLACE INTO edges (src, rel, dst, tenant_id, props, created_at)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
            libsql::params![
                edge.src.to_string(),
                edge.rel.as_str(),
                edge.dst.to_string(),
                ctx.tenant_id.as_str(),
                serde_json::to_string(&edge.props)?,
                now_ms()
            ],
        )
        .await
        .map_err(|e| Error::Storage(format!("failed to insert edge: {e}")))?;
        Ok(())
    }

    /// Walk `DERIVED_FROM` ancestors with a recursive CTE, depth-bounded and
    /// ordered by depth.
    pub(crate) async fn fetch_lineage(
        &self,
        ctx: &RequestContext,
        id: Uuid,
        max_depth: u32,
    ) -> Result<Vec<LineageEntry>> {
        let pooled = self.conn().await?;
        let mut rows = pooled
            .connection()
            .query(
                r#"
                WITH RECURSIVE lineage(id, depth) AS (
                    SELECT e.dst, 1
                    FROM edges e
                    WHERE e.src = ? AND e.rel = ? AND e.tenant_id = ?
                    UNION
                    SELECT e.dst, l.depth + 1
                    FROM edges e
                    JOIN lineage l ON e.src = l.id
                    WHERE e.rel = ? AND e.tenant_id = ? AND l.depth < ?
                )
                SELECT l.id, MIN(l.depth) AS depth, n.classes
                FROM lineage l
                JOIN nodes n ON n.id = l.id AND n.tenant_id = ?
                GROUP BY l.id, n.classes
                ORDER BY depth ASC, l.id
                "#,
                libsql::params![
                    id.to_string(),
                    DERIVED_FROM,
                    ctx.tenant_id.as_str(),
                    DERIVED_FROM,
                    ctx.tenant_id.as_str(),
                    i64::from(max_depth.max(1)),
                    ctx.tenant_id.as_str()
                ],
            )
            .await
            .map_err(|e| Error::Storage(format!("lineage query failed: {e}")))?;

        let mut ancestors = Vec::new();
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| Error::Storage(e.to_string()))?
        {
            let ancestor_id: String = row.get(0).map_err(|e| Error::Storage(e.to_string()))?;
            let depth: i64 = row.get(1).map_err(|e| Error::Storage(e.to_string()))?;
            let classes: String = row.get(2).map_err(|e| Error::Storage(e.to_string()))?;
            ancestors.push(LineageEntry {
                id: ancestor_id
                    .parse()
                    .map_err(|e| Error::Storage(format!("invalid ancestor id: {e}")))?,
                depth: depth as u32,
                classes: serde_json::from_str(&classes)?,
            });
        }
        Ok(ancestors)
    }

    pub(crate) async fn fetch_edges_from(
        &self,
        ctx: &RequestContext,
        src: Uuid,
    ) -> Result<Vec<Edge>> {
        let pooled = self.conn().await?;
        let mut rows = pooled
            .connection()
            .query(
                r#"
                SELECT src, rel, dst, tenant_id, props, created_at
                FROM edges WHERE tenant_id = ? AND src = ?
                ORDER BY rel, dst
                "#,
                libsql::params![ctx.tenant_id.as_str(), src.to_string()],
            )
            .await
            .map_err(|e| Error::Storage(format!("edges query failed: {e}")))?;

        let mut edges = Vec::new();
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| Error::Storage(e.to_string()))?
        {
            let get_err = |e: libsql::Error| Error::Storage(format!("edge row: {e}"));
            let src: String = row.get(0).map_err(get_err)?;
            let dst: String = row.get(2).map_err(get_err)?;
            let props: String = row.get(4).map_err(get_err)?;
            edges.push(Edge {
                src: src
                    .parse()
                    .map_err(|e| Error::Storage(format!("invalid src: {e}")))?,
                rel: row.get(1).map_err(get_err)?,
                dst: dst
                    .parse()
                    .map_err(|e| Error::Storage(format!("invalid dst: {e}")))?,
                tenant_id: row.get(3).map_err(get_err)?,
                props: serde_json::from_str(&props)?,
                created_at: ms_to_datetime(row.get(5).map_err(get_err)?),
            });
        }
        Ok(edges)
    }
}
