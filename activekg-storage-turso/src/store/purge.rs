//! Hard removal of past-grace tombstones.

use activekg_core::storage::PurgeReport;
use activekg_core::{Error, Result};
use chrono::{DateTime, Utc};
use libsql::Connection;
use tracing::info;

use crate::{query_one, TursoGraphStore};

struct Candidate {
    id: String,
    tenant_id: String,
    is_chunk: bool,
}

async fn delete_node_rows(
    conn: &Connection,
    tenant_id: &str,
    id: &str,
    retain_events: bool,
) -> Result<()> {
    conn.execute(
        "DELETE FROM edges WHERE tenant_id = ? AND (src = ? OR dst = ?)",
        libsql::params![tenant_id, id, id],
    )
    .await
    .map_err(|e| Error::Storage(format!("purge edges failed: {e}")))?;
    for table in ["node_versions", "embedding_history"] {
        let sql = format!("DELETE FROM {table} WHERE tenant_id = ? AND node_id = ?");
        conn.execute(&sql, libsql::params![tenant_id, id])
            .await
            .map_err(|e| Error::Storage(format!("purge cascade failed: {e}")))?;
    }
    if !retain_events {
        conn.execute(
            "DELETE FROM events WHERE tenant_id = ? AND node_id = ?",
            libsql::params![tenant_id, id],
        )
        .await
        .map_err(|e| Error::Storage(format!("purge events failed: {e}")))?;
    }
    conn.execute(
        "DELETE FROM nodes WHERE tenant_id = ? AND id = ?",
        libsql::params![tenant_id, id],
    )
    .await
    .map_err(|e| Error::Storage(format!("purge node failed: {e}")))?;
    Ok(())
}

impl TursoGraphStore {
    /// One purge pass: count candidates, then (unless dry-run) remove up to
    /// `batch_size` of them with their chunks.
    pub(crate) async fn purge_pass(
        &self,
        tenant: Option<&str>,
        now: DateTime<Utc>,
        batch_size: usize,
        dry_run: bool,
    ) -> Result<PurgeReport> {
        let now_ms = now.timestamp_millis();
        let pooled = self.conn().await?;
        let conn = pooled.connection();

        let (count_sql, select_sql);
        let mut count_params: Vec<libsql::Value> = vec![now_ms.into()];
        if let Some(tenant) = tenant {
            count_sql = "SELECT COUNT(*) FROM nodes \
                         WHERE grace_until IS NOT NULL AND grace_until <= ? AND tenant_id = ?";
            select_sql = "SELECT id, tenant_id, classes LIKE '%\"Chunk\"%' FROM nodes \
                          WHERE grace_until IS NOT NULL AND grace_until <= ? AND tenant_id = ? \
                          ORDER BY grace_until ASC LIMIT ?";
            count_params.push(tenant.to_string().into());
        } else {
            count_sql = "SELECT COUNT(*) FROM nodes \
                         WHERE grace_until IS NOT NULL AND grace_until <= ?";
            select_sql = "SELECT id, tenant_id, classes LIKE '%\"Chunk\"%' FROM nodes \
                          WHERE grace_until IS NOT NULL AND grace_until <= ? \
                          ORDER BY grace_until ASC LIMIT ?";
        }

        let candidates: i64 = match query_one(conn, count_sql, libsql::params_from_iter(count_params.clone())).await? {
            Some(row) => row.get(0).map_err(|e| Error::Storage(e.to_string()))?,
            None => 0,
        };

        let mut report = PurgeReport {
            candidates: candidates as u64,
            dry_run,
            ..PurgeReport::default()
        };
        if dry_run || candidates == 0 {
            return Ok(report);
        }

        let mut select_params = count_params;
        select_params.push((batch_size.max(1) as i64).into());
        let mut rows = conn
            .query(select_sql, libsql::params_from_iter(select_params))
            .await
            .map_err(|e| Error::Storage(format!("purge scan failed: {e}")))?;

        let mut batch = Vec::new();
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| Error::Storage(e.to_string()))?
        {
            let is_chunk: i64 = row.get(2).map_err(|e| Error::Storage(e.to_string()))?;
            batch.push(Candidate {
                id: row.get(0).map_err(|e| Error::Storage(e.to_string()))?,
                tenant_id: row.get(1).map_err(|e| Error::Storage(e.to_string()))?,
                is_chunk: is_chunk != 0,
            });
        }

        let retain_events = self.config().events_retain_on_hard_delete;
        let tx = conn
            .transaction()
            .await
            .map_err(|e| Error::Storage(format!("begin failed: {e}")))?;

        // Chunks cascaded with their parent may also sit in the batch
        let mut already_deleted = std::collections::HashSet::new();
        for candidate in &batch {
            if already_deleted.contains(&candidate.id) {
                continue;
            }
            if !candidate.is_chunk {
                // Cascade the parent's chunks even if their own grace has
                // not passed; an orphaned chunk has nothing to cite
                let mut chunk_rows = tx
                    .query(
                        "SELECT id FROM nodes \
                         WHERE tenant_id = ? AND json_extract(props, '$.parent_id') = ?",
                        libsql::params![candidate.tenant_id.as_str(), candidate.id.as_str()],
                    )
                    .await
                    .map_err(|e| Error::Storage(format!("chunk scan failed: {e}")))?;
                let mut chunk_ids = Vec::new();
                while let Some(row) = chunk_rows
                    .next()
                    .await
                    .map_err(|e| Error::Storage(e.to_string()))?
                {
                    let id: String = row.get(0).map_err(|e| Error::Storage(e.to_string()))?;
                    chunk_ids.push(id);
                }
                for chunk_id in chunk_ids {
                    delete_node_rows(&tx, &candidate.tenant_id, &chunk_id, retain_events).await?;
                    already_deleted.insert(chunk_id);
                    report.chunks_deleted += 1;
                }
            }

            delete_node_rows(&tx, &candidate.tenant_id, &candidate.id, retain_events).await?;
            already_deleted.insert(candidate.id.clone());
            if candidate.is_chunk {
                report.chunks_deleted += 1;
            } else {
                report.parents_deleted += 1;
            }
        }

        tx.commit()
            .await
            .map_err(|e| Error::Storage(format!("commit failed: {e}")))?;

        info!(
            candidates = report.candidates,
            parents = report.parents_deleted,
            chunks = report.chunks_deleted,
            "purge pass complete"
        );
        Ok(report)
    }
}
