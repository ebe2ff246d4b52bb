//! Vector and lexical (FTS5/BM25) search.

use activekg_core::storage::SearchFilters;
use activekg_core::types::{Node, RequestContext};
use activekg_core::{Error, Result};
use serde_json::Value;

use super::nodes::{node_from_row, NODE_COLUMNS};
use crate::TursoGraphStore;

/// Node columns prefixed for joined queries.
const NODE_COLUMNS_PREFIXED: &str = "n.id, n.tenant_id, n.classes, n.props, n.metadata, \
     n.payload_ref, vector_extract(n.embedding), n.refresh_policy, n.triggers, n.version, \
     n.last_refreshed, n.drift_score, n.grace_until, n.created_at, n.updated_at";

/// Append filter clauses and their params. `prefix` is `""` for single-table
/// queries or `"n."` for joins.
fn filter_clauses(
    filters: &SearchFilters,
    prefix: &str,
    params: &mut Vec<libsql::Value>,
) -> String {
    let mut sql = String::new();

    for class in &filters.classes {
        sql.push_str(&format!(" AND {prefix}classes LIKE ?"));
        params.push(format!("%\"{class}\"%").into());
    }
    if !filters.include_deleted {
        sql.push_str(&format!(" AND {prefix}classes NOT LIKE ?"));
        params.push("%\"Deleted\"%".to_string().into());
    }
    if let Some(Value::Object(map)) = &filters.metadata {
        for (key, value) in map {
            let bound: Option<libsql::Value> = match value {
                Value::String(s) => Some(s.clone().into()),
                Value::Number(n) => {
                    if let Some(i) = n.as_i64() {
                        Some(i.into())
                    } else {
                        n.as_f64().map(Into::into)
                    }
                }
                Value::Bool(b) => Some(i64::from(*b).into()),
                _ => None,
            };
            if let Some(bound) = bound {
                sql.push_str(&format!(" AND json_extract({prefix}metadata, ?) = ?"));
                params.push(format!("$.{key}").into());
                params.push(bound);
            }
        }
    }

    sql
}

/// Quote query terms for FTS5 MATCH; OR-joined for recall, BM25 ranks.
fn fts_match_query(query: &str) -> Option<String> {
    let terms: Vec<String> = query
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(|t| format!("\"{t}\""))
        .collect();
    if terms.is_empty() {
        None
    } else {
        Some(terms.join(" OR "))
    }
}

impl TursoGraphStore {
    /// Cosine-distance search over node embeddings; `similarity = 1 - distance`.
    pub(crate) async fn search_vector(
        &self,
        ctx: &RequestContext,
        query: &[f32],
        top_k: usize,
        filters: &SearchFilters,
    ) -> Result<Vec<(Node, f32)>> {
        if query.len() != self.config().dimension {
            return Err(Error::Validation(format!(
                "query dimension {} does not match configured dimension {}",
                query.len(),
                self.config().dimension
            )));
        }

        let query_json = serde_json::to_string(query)?;
        let mut params: Vec<libsql::Value> =
            vec![query_json.into(), ctx.tenant_id.clone().into()];
        let filter_sql = filter_clauses(filters, "", &mut params);
        params.push((top_k.max(1) as i64).into());

        let sql = format!(
            "SELECT {NODE_COLUMNS}, vector_distance_cos(embedding, vector32(?)) AS distance \
             FROM nodes \
             WHERE tenant_id = ? AND embedding IS NOT NULL{filter_sql} \
             ORDER BY distance ASC \
             LIMIT ?"
        );

        let pooled = self.conn().await?;
        let mut rows = pooled
            .connection()
            .query(&sql, libsql::params_from_iter(params))
            .await
            .map_err(|e| Error::Storage(format!("vector search failed: {e}")))?;

        let mut hits = Vec::new();
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| Error::Storage(e.to_string()))?
        {
            let node = node_from_row(&row)?;
            let distance: f64 = row.get(15).map_err(|e| Error::Storage(e.to_string()))?;
            hits.push((node, (1.0 - distance) as f32));
        }
        Ok(hits)
    }

    /// BM25-ranked full-text search over indexed node text and title.
    pub(crate) async fn search_lexical(
        &self,
        ctx: &RequestContext,
        query: &str,
        top_k: usize,
        filters: &SearchFilters,
    ) -> Result<Vec<(Node, f32)>> {
        let Some(match_query) = fts_match_query(query) else {
            return Ok(Vec::new());
        };

        let mut params: Vec<libsql::Value> =
            vec![match_query.into(), ctx.tenant_id.clone().into()];
        let filter_sql = filter_clauses(filters, "n.", &mut params);
        params.push((top_k.max(1) as i64).into());

        // bm25() is lower-is-better; negate so callers get higher-is-better
        let sql = format!(
            "SELECT {NODE_COLUMNS_PREFIXED}, -bm25(nodes_fts) AS score \
             FROM nodes_fts \
             JOIN nodes n ON n.id = nodes_fts.id \
             WHERE nodes_fts MATCH ? AND n.tenant_id = ?{filter_sql} \
             ORDER BY bm25(nodes_fts) ASC \
             LIMIT ?"
        );

        let pooled = self.conn().await?;
        let mut rows = pooled
            .connection()
            .query(&sql, libsql::params_from_iter(params))
            .await
            .map_err(|e| Error::Storage(format!("lexical search failed: {e}")))?;

        let mut hits = Vec::new();
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| Error::Storage(e.to_string()))?
        {
            let node = node_from_row(&row)?;
            let score: f64 = row.get(15).map_err(|e| Error::Storage(e.to_string()))?;
            hits.push((node, score as f32));
        }
        Ok(hits)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn match_query_quotes_terms() {
        assert_eq!(
            fts_match_query("python postgresql").as_deref(),
            Some("\"python\" OR \"postgresql\"")
        );
        assert_eq!(
            fts_match_query("c++ & sql!").as_deref(),
            Some("\"c\" OR \"sql\"")
        );
        assert!(fts_match_query("!!!").is_none());
        assert!(fts_match_query("").is_none());
    }

    #[test]
    fn filter_clauses_bind_classes_and_metadata() {
        let mut params = Vec::new();
        let filters = SearchFilters {
            classes: vec!["Chunk".to_string()],
            metadata: Some(serde_json::json!({"lang": "en", "stars": 5})),
            include_deleted: false,
        };
        let sql = filter_clauses(&filters, "", &mut params);
        assert!(sql.contains("classes LIKE ?"));
        assert!(sql.contains("classes NOT LIKE ?"));
        assert_eq!(sql.matches("json_extract").count(), 2);
        // class + deleted + 2 metadata key/value pairs
        assert_eq!(params.len(), 1 + 1 + 4);
    }
}
