//! `GraphStore` implementation, split into submodules per concern.

mod connectors;
mod edges;
mod events;
mod nodes;
mod patterns;
mod purge;
mod refreshq;
mod search;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use uuid::Uuid;

use activekg_core::storage::{
    ConnectorConfigRecord, ConnectorCursorRecord, EventFilter, GraphStore, NewEdge, NewEvent,
    PurgeReport, RotationFilter, SearchFilters,
};
use activekg_core::types::{
    Edge, Event, LineageEntry, NewNode, Node, NodePatch, NodeVersion, Pattern, RequestContext,
};
use activekg_core::Result;

use crate::TursoGraphStore;

#[async_trait]
impl GraphStore for TursoGraphStore {
    async fn migrate(&self) -> Result<()> {
        self.initialize().await
    }

    async fn ensure_vector_index(&self) -> Result<()> {
        self.build_vector_index().await
    }

    async fn create_node(&self, ctx: &RequestContext, node: NewNode) -> Result<Uuid> {
        self.insert_node(ctx, node).await
    }

    async fn get_node(&self, ctx: &RequestContext, id: Uuid) -> Result<Option<Node>> {
        self.with_read_retry(|| self.fetch_node(ctx, id)).await
    }

    async fn get_node_by_external_id(
        &self,
        ctx: &RequestContext,
        external_id: &str,
    ) -> Result<Option<Node>> {
        self.with_read_retry(|| self.fetch_node_by_external_id(ctx, external_id))
            .await
    }

    async fn update_node(&self, ctx: &RequestContext, id: Uuid, patch: NodePatch) -> Result<Node> {
        self.apply_node_patch(ctx, id, patch).await
    }

    async fn delete_node(&self, ctx: &RequestContext, id: Uuid, hard: bool) -> Result<bool> {
        self.remove_node(ctx, id, hard).await
    }

    async fn list_nodes(
        &self,
        ctx: &RequestContext,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<Node>> {
        self.with_read_retry(|| self.fetch_nodes_page(ctx, limit, offset))
            .await
    }

    async fn list_versions(&self, ctx: &RequestContext, id: Uuid) -> Result<Vec<NodeVersion>> {
        self.with_read_retry(|| self.fetch_versions(ctx, id)).await
    }

    async fn create_edge(&self, ctx: &RequestContext, edge: NewEdge) -> Result<()> {
        self.insert_edge(ctx, edge).await
    }

    async fn get_lineage(
        &self,
        ctx: &RequestContext,
        id: Uuid,
        max_depth: u32,
    ) -> Result<Vec<LineageEntry>> {
        self.with_read_retry(|| self.fetch_lineage(ctx, id, max_depth))
            .await
    }

    async fn edges_from(&self, ctx: &RequestContext, src: Uuid) -> Result<Vec<Edge>> {
        self.with_read_retry(|| self.fetch_edges_from(ctx, src))
            .await
    }

    async fn find_children(&self, ctx: &RequestContext, parent: Uuid) -> Result<Vec<Uuid>> {
        self.with_read_retry(|| self.fetch_children(ctx, parent))
            .await
    }

    async fn vector_search(
        &self,
        ctx: &RequestContext,
        query: &[f32],
        top_k: usize,
        filters: &SearchFilters,
    ) -> Result<Vec<(Node, f32)>> {
        self.with_read_retry(|| self.search_vector(ctx, query, top_k, filters))
            .await
    }

    async fn lexical_search(
        &self,
        ctx: &RequestContext,
        query: &str,
        top_k: usize,
        filters: &SearchFilters,
    ) -> Result<Vec<(Node, f32)>> {
        self.with_read_retry(|| self.search_lexical(ctx, query, top_k, filters))
            .await
    }

    async fn append_event(
        &self,
        ctx: &RequestContext,
        node_id: Uuid,
        event: NewEvent,
    ) -> Result<()> {
        self.insert_event(ctx, node_id, &event).await
    }

    async fn list_events(&self, ctx: &RequestContext, filter: &EventFilter) -> Result<Vec<Event>> {
        self.with_read_retry(|| self.fetch_events(ctx, filter))
            .await
    }

    async fn write_embedding_history(
        &self,
        ctx: &RequestContext,
        node_id: Uuid,
        drift_score: f64,
        embedding_ref: Option<&str>,
    ) -> Result<()> {
        self.insert_embedding_history(ctx, node_id, drift_score, embedding_ref)
            .await
    }

    async fn refresh_candidates(&self, ctx: &RequestContext, limit: usize) -> Result<Vec<Node>> {
        self.with_read_retry(|| self.fetch_refresh_candidates(ctx, limit))
            .await
    }

    async fn tenants_with_policies(&self) -> Result<Vec<String>> {
        self.with_read_retry(|| self.fetch_tenants_with_policies())
            .await
    }

    async fn set_refresh_state(
        &self,
        ctx: &RequestContext,
        id: Uuid,
        update: activekg_core::storage::RefreshStateUpdate,
    ) -> Result<i64> {
        self.apply_refresh_state(ctx, id, &update).await
    }

    async fn nodes_with_triggers(&self, limit: usize, offset: usize) -> Result<Vec<Node>> {
        self.with_read_retry(|| self.fetch_nodes_with_triggers(limit, offset))
            .await
    }

    async fn upsert_pattern(
        &self,
        ctx: &RequestContext,
        name: &str,
        embedding: &[f32],
        description: Option<&str>,
    ) -> Result<()> {
        self.put_pattern(ctx, name, embedding, description).await
    }

    async fn get_pattern(&self, ctx: &RequestContext, name: &str) -> Result<Option<Pattern>> {
        self.with_read_retry(|| self.fetch_pattern(ctx, name)).await
    }

    async fn list_patterns(&self, ctx: &RequestContext) -> Result<Vec<Pattern>> {
        self.with_read_retry(|| self.fetch_patterns(ctx)).await
    }

    async fn delete_pattern(&self, ctx: &RequestContext, name: &str) -> Result<bool> {
        self.remove_pattern(ctx, name).await
    }

    async fn upsert_connector_config(&self, record: &ConnectorConfigRecord) -> Result<()> {
        self.put_connector_config(record).await
    }

    async fn get_connector_config(
        &self,
        ctx: &RequestContext,
        provider: &str,
    ) -> Result<Option<ConnectorConfigRecord>> {
        self.with_read_retry(|| self.fetch_connector_config(ctx, provider))
            .await
    }

    async fn list_connector_configs(
        &self,
        filter: &RotationFilter,
    ) -> Result<Vec<ConnectorConfigRecord>> {
        self.with_read_retry(|| self.fetch_connector_configs(filter))
            .await
    }

    async fn set_connector_enabled(
        &self,
        ctx: &RequestContext,
        provider: &str,
        enabled: bool,
    ) -> Result<bool> {
        self.toggle_connector(ctx, provider, enabled).await
    }

    async fn get_connector_cursor(
        &self,
        ctx: &RequestContext,
        provider: &str,
    ) -> Result<Option<ConnectorCursorRecord>> {
        self.with_read_retry(|| self.fetch_connector_cursor(ctx, provider))
            .await
    }

    async fn set_connector_cursor(
        &self,
        ctx: &RequestContext,
        provider: &str,
        cursor: &Value,
    ) -> Result<()> {
        self.put_connector_cursor(ctx, provider, cursor).await
    }

    async fn purge_deleted(
        &self,
        tenant: Option<&str>,
        now: DateTime<Utc>,
        batch_size: usize,
        dry_run: bool,
    ) -> Result<PurgeReport> {
        self.purge_pass(tenant, now, batch_size, dry_run).await
    }
}
