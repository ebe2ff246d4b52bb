//! Append-only events and embedding history.

use activekg_core::storage::{EventFilter, NewEvent};
use activekg_core::types::{Event, EventType, RequestContext};
use activekg_core::{Error, Result};
use libsql::Connection;
use serde_json::Value;
use uuid::Uuid;

use crate::{ms_to_datetime, now_ms, TursoGraphStore};

/// Insert an event on an existing connection (usable inside transactions).
pub(crate) async fn insert_event_on(
    conn: &Connection,
    ctx: &RequestContext,
    node_id: Uuid,
    event_type: EventType,
    payload: &Value,
    now: i64,
) -> Result<()> {
    conn.execute(
        r#"
        INSERT INTO events (id, node_id, event_type, payload, tenant_id, actor_id, actor_type, created_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?)
        "#,
        libsql::params![
            Uuid::new_v4().to_string(),
            node_id.to_string(),
            event_type.as_str(),
            serde_json::to_string(payload)?,
            ctx.tenant_id.as_str(),
            ctx.actor_id.as_str(),
            ctx.actor_type.as_str(),
            now
        ],
    )
    .await
    .map_err(|e| Error::Storage(format!("failed to append event: {e}")))?;
    Ok(())
}

impl TursoGraphStore {
    pub(crate) async fn insert_event(
        &self,
        ctx: &RequestContext,
        node_id: Uuid,
        event: &NewEvent,
    ) -> Result<()> {
        let pooled = self.conn().await?;
        insert_event_on(
            pooled.connection(),
            ctx,
            node_id,
            event.event_type,
            &event.payload,
            now_ms(),
        )
        .await
    }

    pub(crate) async fn fetch_events(
        &self,
        ctx: &RequestContext,
        filter: &EventFilter,
    ) -> Result<Vec<Event>> {
        let mut sql = String::from(
            "SELECT id, node_id, event_type, payload, tenant_id, actor_id, actor_type, created_at \
             FROM events WHERE tenant_id = ?",
        );
        let mut params: Vec<libsql::Value> = vec![ctx.tenant_id.clone().into()];

        if let Some(node_id) = filter.node_id {
            sql.push_str(" AND node_id = ?");
            params.push(node_id.to_string().into());
        }
        if let Some(event_type) = filter.event_type {
            sql.push_str(" AND event_type = ?");
            params.push(event_type.as_str().to_string().into());
        }
        // rowid breaks same-millisecond ties in insert order
        sql.push_str(" ORDER BY created_at DESC, rowid DESC LIMIT ?");
        params.push((filter.limit.max(1) as i64).into());

        let pooled = self.conn().await?;
        let mut rows = pooled
            .connection()
            .query(&sql, libsql::params_from_iter(params))
            .await
            .map_err(|e| Error::Storage(format!("events query failed: {e}")))?;

        let mut events = Vec::new();
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| Error::Storage(e.to_string()))?
        {
            let get_err = |e: libsql::Error| Error::Storage(format!("event row: {e}"));
            let id: String = row.get(0).map_err(get_err)?;
            let node_id: String = row.get(1).map_err(get_err)?;
            let event_type: String = row.get(2).map_err(get_err)?;
            let payload: String = row.get(3).map_err(get_err)?;
            events.push(Event {
                id: id
                    .parse()
                    .map_err(|e| Error::Storage(format!("invalid event id: {e}")))?,
                node_id: node_id
                    .parse()
                    .map_err(|e| Error::Storage(format!("invalid node id: {e}")))?,
                event_type: event_type.parse()?,
                payload: serde_json::from_str(&payload)?,
                tenant_id: row.get(4).map_err(get_err)?,
                actor_id: row.get(5).map_err(get_err)?,
                actor_type: row.get(6).map_err(get_err)?,
                created_at: ms_to_datetime(row.get(7).map_err(get_err)?),
            });
        }
        Ok(events)
    }

    pub(crate) async fn insert_embedding_history(
        &self,
        ctx: &RequestContext,
        node_id: Uuid,
        drift_score: f64,
        embedding_ref: Option<&str>,
    ) -> Result<()> {
        let pooled = self.conn().await?;
        pooled
            .connection()
            .execute(
                r#"
                INSERT INTO embedding_history (id, node_id, tenant_id, drift_score, embedding_ref, created_at)
                VALUES (?, ?, ?, ?, ?, ?)
                "#,
                libsql::params![
                    Uuid::new_v4().to_string(),
                    node_id.to_string(),
                    ctx.tenant_id.as_str(),
                    drift_score,
                    embedding_ref,
                    now_ms()
                ],
            )
            .await
            .map_err(|e| Error::Storage(format!("failed to write embedding history: {e}")))?;
        Ok(())
    }
}
