//! Named pattern vectors for the trigger engine.
//!
//! Patterns are namespaced per tenant by default; the global compatibility
//! mode collapses the namespace onto the empty tenant key.

use activekg_core::config::PatternNamespace;
use activekg_core::types::{Pattern, RequestContext};
use activekg_core::{Error, Result};

use crate::{ms_to_datetime, now_ms, query_one, TursoGraphStore};

impl TursoGraphStore {
    /// Namespace key for pattern rows: the tenant, or `""` in global mode.
    fn pattern_tenant_key<'a>(&self, ctx: &'a RequestContext) -> &'a str {
        match self.config().pattern_namespace {
            PatternNamespace::PerTenant => ctx.tenant_id.as_str(),
            PatternNamespace::Global => "",
        }
    }

    pub(crate) async fn put_pattern(
        &self,
        ctx: &RequestContext,
        name: &str,
        embedding: &[f32],
        description: Option<&str>,
    ) -> Result<()> {
        if name.trim().is_empty() {
            return Err(Error::Validation("pattern name must not be empty".to_string()));
        }
        if embedding.len() != self.config().dimension {
            return Err(Error::Validation(format!(
                "pattern dimension {} does not match configured dimension {}",
                embedding.len(),
                self.config().dimension
            )));
        }

        let now = now_ms();
        let embedding_json = serde_json::to_string(embedding)?;
        let pooled = self.conn().await?;
        pooled
            .connection()
            .execute(
                r#"
                INSERT INTO patterns (name, tenant_id, embedding, description, created_at, updated_at)
                VALUES (?, ?, vector32(?), ?, ?, ?)
                ON CONFLICT (tenant_id, name)
                DO UPDATE SET embedding = excluded.embedding,
                              description = excluded.description,
                              updated_at = excluded.updated_at
                "#,
                libsql::params![
                    name,
                    self.pattern_tenant_key(ctx),
                    embedding_json,
                    description,
                    now,
                    now
                ],
            )
            .await
            .map_err(|e| Error::Storage(format!("failed to upsert pattern: {e}")))?;
        Ok(())
    }

    pub(crate) async fn fetch_pattern(
        &self,
        ctx: &RequestContext,
        name: &str,
    ) -> Result<Option<Pattern>> {
        let pooled = self.conn().await?;
        let row = query_one(
            pooled.connection(),
            r#"
            SELECT name, tenant_id, vector_extract(embedding), description, created_at, updated_at
            FROM patterns WHERE tenant_id = ? AND name = ?
            "#,
            libsql::params![self.pattern_tenant_key(ctx), name],
        )
        .await?;
        row.map(|r| pattern_from_row(&r)).transpose()
    }

    pub(crate) async fn fetch_patterns(&self, ctx: &RequestContext) -> Result<Vec<Pattern>> {
        let pooled = self.conn().await?;
        let mut rows = pooled
            .connection()
            .query(
                r#"
                SELECT name, tenant_id, vector_extract(embedding), description, created_at, updated_at
                FROM patterns WHERE tenant_id = ? ORDER BY name
                "#,
                libsql::params![self.pattern_tenant_key(ctx)],
            )
            .await
            .map_err(|e| Error::Storage(format!("patterns query failed: {e}")))?;

        let mut patterns = Vec::new();
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| Error::Storage(e.to_string()))?
        {
            patterns.push(pattern_from_row(&row)?);
        }
        Ok(patterns)
    }

    pub(crate) async fn remove_pattern(&self, ctx: &RequestContext, name: &str) -> Result<bool> {
        let pooled = self.conn().await?;
        let affected = pooled
            .connection()
            .execute(
                "DELETE FROM patterns WHERE tenant_id = ? AND name = ?",
                libsql::params![self.pattern_tenant_key(ctx), name],
            )
            .await
            .map_err(|e| Error::Storage(format!("failed to delete pattern: {e}")))?;
        Ok(affected > 0)
    }
}

fn pattern_from_row(row: &libsql::Row) -> Result<Pattern> {
    let get_err = |e: libsql::Error| Error::Storage(format!("pattern row: {e}"));
    let tenant_id: String = row.get(1).map_err(get_err)?;
    let embedding: String = row.get(2).map_err(get_err)?;
    Ok(Pattern {
        name: row.get(0).map_err(get_err)?,
        tenant_id: (!tenant_id.is_empty()).then_some(tenant_id),
        embedding: serde_json::from_str(&embedding)?,
        description: row.get(3).map_err(get_err)?,
        created_at: ms_to_datetime(row.get(4).map_err(get_err)?),
        updated_at: ms_to_datetime(row.get(5).map_err(get_err)?),
    })
}
