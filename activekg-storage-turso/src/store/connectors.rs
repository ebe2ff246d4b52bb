//! Connector config and cursor persistence.

use activekg_core::storage::{ConnectorConfigRecord, ConnectorCursorRecord, RotationFilter};
use activekg_core::types::RequestContext;
use activekg_core::{Error, Result};
use serde_json::Value;

use crate::{ms_to_datetime, now_ms, query_one, TursoGraphStore};

fn config_from_row(row: &libsql::Row) -> Result<ConnectorConfigRecord> {
    let get_err = |e: libsql::Error| Error::Storage(format!("connector config row: {e}"));
    let config: String = row.get(2).map_err(get_err)?;
    let enabled: i64 = row.get(4).map_err(get_err)?;
    Ok(ConnectorConfigRecord {
        tenant_id: row.get(0).map_err(get_err)?,
        provider: row.get(1).map_err(get_err)?,
        config: serde_json::from_str(&config)?,
        key_version: row.get(3).map_err(get_err)?,
        enabled: enabled != 0,
        created_at: ms_to_datetime(row.get(5).map_err(get_err)?),
        updated_at: ms_to_datetime(row.get(6).map_err(get_err)?),
    })
}

const CONFIG_COLUMNS: &str =
    "tenant_id, provider, config, key_version, enabled, created_at, updated_at";

impl TursoGraphStore {
    pub(crate) async fn put_connector_config(
        &self,
        record: &ConnectorConfigRecord,
    ) -> Result<()> {
        if record.tenant_id.trim().is_empty() {
            return Err(Error::Validation("tenant_id must not be empty".to_string()));
        }
        let now = now_ms();
        let pooled = self.conn().await?;
        pooled
            .connection()
            .execute(
                r#"
                INSERT INTO connector_configs (tenant_id, provider, config, key_version, enabled, created_at, updated_at)
                VALUES (?, ?, ?, ?, ?, ?, ?)
                ON CONFLICT (tenant_id, provider)
                DO UPDATE SET config = excluded.config,
                              key_version = excluded.key_version,
                              enabled = excluded.enabled,
                              updated_at = excluded.updated_at
                "#,
                libsql::params![
                    record.tenant_id.as_str(),
                    record.provider.as_str(),
                    serde_json::to_string(&record.config)?,
                    record.key_version,
                    i64::from(record.enabled),
                    now,
                    now
                ],
            )
            .await
            .map_err(|e| Error::Storage(format!("failed to upsert connector config: {e}")))?;
        Ok(())
    }

    pub(crate) async fn fetch_connector_config(
        &self,
        ctx: &RequestContext,
        provider: &str,
    ) -> Result<Option<ConnectorConfigRecord>> {
        let pooled = self.conn().await?;
        let sql = format!(
            "SELECT {CONFIG_COLUMNS} FROM connector_configs WHERE tenant_id = ? AND provider = ?"
        );
        let row = query_one(
            pooled.connection(),
            &sql,
            libsql::params![ctx.tenant_id.as_str(), provider],
        )
        .await?;
        row.map(|r| config_from_row(&r)).transpose()
    }

    pub(crate) async fn fetch_connector_configs(
        &self,
        filter: &RotationFilter,
    ) -> Result<Vec<ConnectorConfigRecord>> {
        let mut sql = format!("SELECT {CONFIG_COLUMNS} FROM connector_configs WHERE 1 = 1");
        let mut params: Vec<libsql::Value> = Vec::new();

        if let Some(version) = filter.not_key_version {
            sql.push_str(" AND key_version != ?");
            params.push(version.into());
        }
        if !filter.providers.is_empty() {
            let placeholders = vec!["?"; filter.providers.len()].join(", ");
            sql.push_str(&format!(" AND provider IN ({placeholders})"));
            params.extend(filter.providers.iter().map(|p| p.clone().into()));
        }
        if !filter.tenants.is_empty() {
            let placeholders = vec!["?"; filter.tenants.len()].join(", ");
            sql.push_str(&format!(" AND tenant_id IN ({placeholders})"));
            params.extend(filter.tenants.iter().map(|t| t.clone().into()));
        }
        sql.push_str(" ORDER BY tenant_id, provider");

        let pooled = self.conn().await?;
        let mut rows = pooled
            .connection()
            .query(&sql, libsql::params_from_iter(params))
            .await
            .map_err(|e| Error::Storage(format!("connector configs query failed: {e}")))?;

        let mut records = Vec::new();
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| Error::Storage(e.to_string()))?
        {
            records.push(config_from_row(&row)?);
        }
        Ok(records)
    }

    pub(crate) async fn toggle_connector(
        &self,
        ctx: &RequestContext,
        provider: &str,
        enabled: bool,
    ) -> Result<bool> {
        let pooled = self.conn().await?;
        let affected = pooled
            .connection()
            .execute(
                "UPDATE connector_configs SET enabled = ?, updated_at = ? \
                 WHERE tenant_id = ? AND provider = ?",
                libsql::params![
                    i64::from(enabled),
                    now_ms(),
                    ctx.tenant_id.as_str(),
                    provider
                ],
            )
            .await
            .map_err(|e| Error::Storage(format!("failed to toggle connector: {e}")))?;
        Ok(affected > 0)
    }

    pub(crate) async fn fetch_connector_cursor(
        &self,
        ctx: &RequestContext,
        provider: &str,
    ) -> Result<Option<ConnectorCursorRecord>> {
        let pooled = self.conn().await?;
        let row = query_one(
            pooled.connection(),
            "SELECT tenant_id, provider, cursor, updated_at FROM connector_cursors \
             WHERE tenant_id = ? AND provider = ?",
            libsql::params![ctx.tenant_id.as_str(), provider],
        )
        .await?;
        row.map(|row| -> Result<ConnectorCursorRecord> {
            let get_err = |e: libsql::Error| Error::Storage(format!("cursor row: {e}"));
            let cursor: String = row.get(2).map_err(get_err)?;
            Ok(ConnectorCursorRecord {
                tenant_id: row.get(0).map_err(get_err)?,
                provider: row.get(1).map_err(get_err)?,
                cursor: serde_json::from_str(&cursor)?,
                updated_at: ms_to_datetime(row.get(3).map_err(get_err)?),
            })
        })
        .transpose()
    }

    pub(crate) async fn put_connector_cursor(
        &self,
        ctx: &RequestContext,
        provider: &str,
        cursor: &Value,
    ) -> Result<()> {
        let pooled = self.conn().await?;
        pooled
            .connection()
            .execute(
                r#"
                INSERT INTO connector_cursors (tenant_id, provider, cursor, updated_at)
                VALUES (?, ?, ?, ?)
                ON CONFLICT (tenant_id, provider)
                DO UPDATE SET cursor = excluded.cursor, updated_at = excluded.updated_at
                "#,
                libsql::params![
                    ctx.tenant_id.as_str(),
                    provider,
                    serde_json::to_string(cursor)?,
                    now_ms()
                ],
            )
            .await
            .map_err(|e| Error::Storage(format!("failed to store cursor: {e}")))?;
        Ok(())
    }
}
