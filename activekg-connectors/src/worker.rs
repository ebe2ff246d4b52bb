//! Long-running ingestion worker: queue pop, fetch, chunk, upsert.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use activekg_core::chunking::chunk_text;
use activekg_core::config::{ChunkingSettings, ConnectorSettings};
use activekg_core::constants::{CLASS_CHUNK, CLASS_DOCUMENT, DERIVED_FROM};
use activekg_core::embeddings::EmbeddingProvider;
use activekg_core::kv::KvStore;
use activekg_core::storage::{GraphStore, NewEdge};
use activekg_core::types::{NewNode, NodePatch, RequestContext};
use activekg_core::{Error, Result, Telemetry};
use parking_lot::Mutex;
use serde_json::{json, Value};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config_store::ConnectorConfigStore;
use crate::connector::{content_hash, Connector, ConnectorRegistry};
use crate::queue::{push_dlq, queue_key};
use crate::types::{ChangeItem, ChangeOperation, FetchResult};

/// Builds connectors from resolved configs. The registry is the production
/// implementation; tests substitute fixed-content connectors.
pub trait ConnectorFactory: Send + Sync {
    /// Build a connector for `(provider, tenant)`.
    fn build(&self, provider: &str, tenant_id: &str, config: &Value)
        -> Result<Arc<dyn Connector>>;
}

/// Factory backed by [`ConnectorRegistry`].
#[derive(Debug, Default)]
pub struct RegistryFactory;

impl ConnectorFactory for RegistryFactory {
    fn build(
        &self,
        provider: &str,
        tenant_id: &str,
        config: &Value,
    ) -> Result<Arc<dyn Connector>> {
        ConnectorRegistry::build(provider, tenant_id, config)
    }
}

/// Per-provider ingestion consumer.
///
/// Pops change items from tenant queues (rotating the key order for
/// fairness), fetches content with transient-aware retries, skips unchanged
/// documents by content hash, chunks and embeds, and upserts the parent and
/// chunk nodes with lineage edges. Exhausted or permanent failures go to
/// the DLQ with a reason.
pub struct IngestionWorker {
    provider: String,
    store: Arc<dyn GraphStore>,
    kv: Arc<dyn KvStore>,
    embedder: Arc<dyn EmbeddingProvider>,
    config_store: Arc<ConnectorConfigStore>,
    factory: Arc<dyn ConnectorFactory>,
    chunking: ChunkingSettings,
    settings: ConnectorSettings,
    telemetry: Telemetry,
    rotation: AtomicUsize,
    tenants: Mutex<(Vec<String>, Option<Instant>)>,
}

impl IngestionWorker {
    /// Create a worker for one provider.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        provider: String,
        store: Arc<dyn GraphStore>,
        kv: Arc<dyn KvStore>,
        embedder: Arc<dyn EmbeddingProvider>,
        config_store: Arc<ConnectorConfigStore>,
        factory: Arc<dyn ConnectorFactory>,
        chunking: ChunkingSettings,
        settings: ConnectorSettings,
        telemetry: Telemetry,
    ) -> Self {
        Self {
            provider,
            store,
            kv,
            embedder,
            config_store,
            factory,
            chunking,
            settings,
            telemetry,
            rotation: AtomicUsize::new(0),
            tenants: Mutex::new((Vec::new(), None)),
        }
    }

    /// Start the consumer loop; stops after the current message when
    /// signalled.
    pub fn spawn(self: &Arc<Self>) -> (watch::Sender<bool>, JoinHandle<()>) {
        let (stop_tx, mut stop_rx) = watch::channel(false);
        let worker = Arc::clone(self);
        let handle = tokio::spawn(async move {
            info!(provider = %worker.provider, "ingestion worker started");
            loop {
                if *stop_rx.borrow() {
                    break;
                }
                tokio::select! {
                    () = worker.poll_once() => {}
                    _ = stop_rx.changed() => break,
                }
            }
            info!(provider = %worker.provider, "ingestion worker stopped");
        });
        (stop_tx, handle)
    }

    async fn poll_once(&self) {
        let keys = match self.queue_keys().await {
            Ok(keys) if !keys.is_empty() => keys,
            Ok(_) => {
                tokio::time::sleep(Duration::from_secs(1)).await;
                return;
            }
            Err(e) => {
                warn!(error = %e, "tenant discovery failed");
                tokio::time::sleep(Duration::from_secs(1)).await;
                return;
            }
        };

        match self.kv.brpop(&keys, Duration::from_secs(1)).await {
            Ok(Some((_, raw))) => {
                if let Err(e) = self.process_raw(&raw).await {
                    warn!(error = %e, "item processing failed");
                }
            }
            Ok(None) => {}
            Err(e) => {
                warn!(error = %e, "queue pop failed");
                tokio::time::sleep(Duration::from_secs(1)).await;
            }
        }
    }

    /// Queue keys for all tenants with a config for this provider, rotated
    /// each call so no tenant starves.
    async fn queue_keys(&self) -> Result<Vec<String>> {
        let refresh_needed = {
            let cached = self.tenants.lock();
            cached
                .1
                .map_or(true, |at| at.elapsed() > Duration::from_secs(30))
        };
        if refresh_needed {
            let records = self
                .store
                .list_connector_configs(&activekg_core::storage::RotationFilter {
                    providers: vec![self.provider.clone()],
                    ..Default::default()
                })
                .await?;
            let tenants: Vec<String> = records
                .into_iter()
                .filter(|r| r.enabled)
                .map(|r| r.tenant_id)
                .collect();
            *self.tenants.lock() = (tenants, Some(Instant::now()));
        }

        let tenants = self.tenants.lock().0.clone();
        if tenants.is_empty() {
            return Ok(Vec::new());
        }
        let offset = self.rotation.fetch_add(1, Ordering::Relaxed) % tenants.len();
        let mut keys: Vec<String> = tenants
            .iter()
            .cycle()
            .skip(offset)
            .take(tenants.len())
            .map(|tenant| queue_key(&self.provider, tenant))
            .collect();
        keys.dedup();
        Ok(keys)
    }

    /// Parse and process one raw queue entry. Exposed for tests and for
    /// synchronous draining in backfills.
    pub async fn process_raw(&self, raw: &str) -> Result<()> {
        let item: ChangeItem = match serde_json::from_str(raw) {
            Ok(item) => item,
            Err(e) => {
                self.telemetry
                    .counter_with("ingest_invalid_items_total", &[("provider", self.provider.as_str())])
                    .increment();
                return Err(Error::Validation(format!("unparseable queue item: {e}")));
            }
        };

        if !self.admit(&item).await? {
            return Ok(());
        }

        let result = self.process_item(&item).await;
        match result {
            Ok(()) => {
                self.telemetry
                    .counter_with(
                        "ingest_processed_total",
                        &[("provider", self.provider.as_str()), ("result", "ok")],
                    )
                    .increment();
                Ok(())
            }
            Err(e) => {
                self.telemetry
                    .counter_with(
                        "ingest_processed_total",
                        &[("provider", self.provider.as_str()), ("result", "error")],
                    )
                    .increment();
                push_dlq(&self.kv, &self.telemetry, &self.provider, &item, &e.to_string()).await?;
                Err(e)
            }
        }
    }

    /// Per-tenant docs/hour token bucket; over-limit items are requeued.
    async fn admit(&self, item: &ChangeItem) -> Result<bool> {
        let key = format!(
            "throttle:{}:{}:docs",
            self.provider, item.tenant_id
        );
        let count = self
            .kv
            .incr_with_expiry(&key, Duration::from_secs(3600))
            .await
            .unwrap_or(0);
        if count > i64::from(self.settings.docs_per_hour) {
            self.telemetry
                .counter_with("ingest_throttled_total", &[("provider", self.provider.as_str())])
                .increment();
            self.kv
                .lpush(
                    &queue_key(&self.provider, &item.tenant_id),
                    &serde_json::to_string(item)?,
                )
                .await?;
            tokio::time::sleep(Duration::from_millis(200)).await;
            return Ok(false);
        }
        Ok(true)
    }

    async fn process_item(&self, item: &ChangeItem) -> Result<()> {
        let ctx = RequestContext::system(item.tenant_id.clone());

        let Some(resolved) = self.config_store.get(&item.tenant_id, &self.provider).await? else {
            return Err(Error::PermanentConnector(format!(
                "no {} config for tenant {}",
                self.provider, item.tenant_id
            )));
        };
        if !resolved.enabled {
            return Err(Error::PermanentConnector(format!(
                "{} connector disabled for tenant {}",
                self.provider, item.tenant_id
            )));
        }
        let connector = self
            .factory
            .build(&self.provider, &item.tenant_id, &resolved.config)?;

        let external_id = connector.to_external_id(&item.uri);
        if item.operation == ChangeOperation::Deleted {
            return self.handle_deleted(&ctx, &external_id).await;
        }

        // Fast path: a matching etag means the object cannot have changed,
        // so skip the fetch entirely. The content hash below is the slow
        // path for sources with missing or unreliable etags.
        if let Some(etag) = item.etag.as_deref() {
            if let Some(existing) = self.store.get_node_by_external_id(&ctx, external_id.as_str()).await? {
                let stored = existing.props.get("etag").and_then(Value::as_str);
                if stored == Some(etag) && !existing.is_deleted() {
                    self.telemetry
                        .counter_with(
                            "ingest_unchanged_skipped_total",
                            &[("provider", self.provider.as_str())],
                        )
                        .increment();
                    debug!(external_id, etag, "etag unchanged, skipping fetch");
                    return Ok(());
                }
            }
        }

        let fetched = self.fetch_with_retry(connector.as_ref(), &item.uri).await?;
        self.count_bytes(&item.tenant_id, fetched.text.len()).await;
        self.ingest(&ctx, item, &external_id, &fetched).await
    }

    async fn count_bytes(&self, tenant_id: &str, bytes: usize) {
        let key = format!("throttle:{}:{tenant_id}:bytes", self.provider);
        // Best-effort accounting; the docs bucket is the hard gate
        let _ = self
            .kv
            .incr_with_expiry(&key, Duration::from_secs(3600))
            .await;
        self.telemetry
            .counter_with("ingest_bytes_total", &[("provider", self.provider.as_str())])
            .add(bytes as u64);
    }

    async fn fetch_with_retry(&self, connector: &dyn Connector, uri: &str) -> Result<FetchResult> {
        let mut attempt = 0u32;
        loop {
            match connector.fetch_text(uri).await {
                Ok(fetched) => return Ok(fetched),
                Err(e @ Error::TransientConnector(_))
                    if attempt + 1 < self.settings.max_fetch_attempts =>
                {
                    let backoff = self
                        .settings
                        .retry_base_delay_ms
                        .saturating_mul(1u64 << attempt.min(10));
                    debug!(uri, attempt, backoff_ms = backoff, error = %e, "transient fetch failure, retrying");
                    self.telemetry
                        .counter_with("ingest_retries_total", &[("provider", self.provider.as_str())])
                        .increment();
                    tokio::time::sleep(Duration::from_millis(backoff)).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn ingest(
        &self,
        ctx: &RequestContext,
        item: &ChangeItem,
        external_id: &str,
        fetched: &FetchResult,
    ) -> Result<()> {
        let hash = content_hash(&fetched.text);
        let existing = self.store.get_node_by_external_id(ctx, external_id).await?;

        if let Some(existing) = &existing {
            let stored_hash = existing
                .props
                .get("content_hash")
                .and_then(Value::as_str);
            if stored_hash == Some(hash.as_str()) {
                self.telemetry
                    .counter_with(
                        "ingest_unchanged_skipped_total",
                        &[("provider", self.provider.as_str())],
                    )
                    .increment();
                debug!(external_id, "content unchanged, skipping");
                return Ok(());
            }
        }

        let chunks = chunk_text(&fetched.text, &self.chunking);
        let mut to_embed: Vec<String> = Vec::with_capacity(chunks.len() + 1);
        to_embed.push(fetched.text.clone());
        to_embed.extend(chunks.iter().map(|c| c.text.clone()));
        let mut embeddings = self
            .embedder
            .embed_batch(&to_embed)
            .await
            .map_err(Error::Embedding)?;
        let parent_embedding = embeddings.remove(0);

        let parent_props = json!({
            "text": fetched.text,
            "title": fetched.title,
            "external_id": external_id,
            "is_parent": true,
            "etag": item.etag,
            "content_hash": hash,
            "source_uri": item.uri,
            "content_type": fetched.metadata.get("content_type"),
        });

        let parent_id = if let Some(existing) = existing {
            self.store
                .update_node(
                    ctx,
                    existing.id,
                    NodePatch {
                        classes: Some(vec![CLASS_DOCUMENT.to_string()]),
                        props: Some(parent_props),
                        embedding: Some(Some(parent_embedding)),
                        ..NodePatch::default()
                    },
                )
                .await?
                .id
        } else {
            self.store
                .create_node(
                    ctx,
                    NewNode {
                        classes: vec![CLASS_DOCUMENT.to_string()],
                        props: parent_props,
                        metadata: fetched.metadata.clone(),
                        embedding: Some(parent_embedding),
                        ..NewNode::default()
                    },
                )
                .await?
        };

        let existing_children = self.store.find_children(ctx, parent_id).await?;
        for (chunk, embedding) in chunks.iter().zip(embeddings) {
            let chunk_external_id = format!("{external_id}#chunk-{}", chunk.index);
            let chunk_props = json!({
                "text": chunk.text,
                "external_id": chunk_external_id,
                "parent_id": parent_id.to_string(),
                "chunk_index": chunk.index,
            });

            let chunk_id = match self
                .store
                .get_node_by_external_id(ctx, &chunk_external_id)
                .await?
            {
                Some(node) => {
                    self.store
                        .update_node(
                            ctx,
                            node.id,
                            NodePatch {
                                classes: Some(vec![
                                    CLASS_CHUNK.to_string(),
                                    CLASS_DOCUMENT.to_string(),
                                ]),
                                props: Some(chunk_props),
                                embedding: Some(Some(embedding)),
                                ..NodePatch::default()
                            },
                        )
                        .await?
                        .id
                }
                None => {
                    self.store
                        .create_node(
                            ctx,
                            NewNode {
                                classes: vec![
                                    CLASS_CHUNK.to_string(),
                                    CLASS_DOCUMENT.to_string(),
                                ],
                                props: chunk_props,
                                embedding: Some(embedding),
                                ..NewNode::default()
                            },
                        )
                        .await?
                }
            };

            self.store
                .create_edge(
                    ctx,
                    NewEdge {
                        src: chunk_id,
                        rel: DERIVED_FROM.to_string(),
                        dst: parent_id,
                        props: json!({}),
                    },
                )
                .await?;
        }

        // Chunks past the new count are leftovers from a longer revision
        for stale in existing_children.iter().skip(chunks.len()) {
            self.store.delete_node(ctx, *stale, false).await?;
        }

        self.telemetry
            .counter_with("ingest_docs_total", &[("provider", self.provider.as_str())])
            .increment();
        self.telemetry
            .counter_with("ingest_chunks_total", &[("provider", self.provider.as_str())])
            .add(chunks.len() as u64);
        info!(external_id, chunks = chunks.len(), "document ingested");
        Ok(())
    }

    async fn handle_deleted(&self, ctx: &RequestContext, external_id: &str) -> Result<()> {
        let Some(parent) = self.store.get_node_by_external_id(ctx, external_id).await? else {
            debug!(external_id, "delete for unknown document, ignoring");
            return Ok(());
        };
        for child in self.store.find_children(ctx, parent.id).await? {
            self.store.delete_node(ctx, child, false).await?;
        }
        self.store.delete_node(ctx, parent.id, false).await?;
        self.telemetry
            .counter_with("ingest_deletes_total", &[("provider", self.provider.as_str())])
            .increment();
        info!(external_id, "document tombstoned");
        Ok(())
    }

    /// Seed the tenant queue from `list_changes` (admin backfill), storing
    /// the advancing cursor.
    pub async fn backfill(&self, tenant_id: &str) -> Result<u64> {
        let ctx = RequestContext::system(tenant_id);
        let Some(resolved) = self.config_store.get(tenant_id, &self.provider).await? else {
            return Err(Error::Validation(format!(
                "no {} config for tenant {tenant_id}",
                self.provider
            )));
        };
        let connector = self
            .factory
            .build(&self.provider, tenant_id, &resolved.config)?;

        let mut cursor = self
            .store
            .get_connector_cursor(&ctx, &self.provider)
            .await?
            .map(|c| c.cursor);
        let mut queued = 0u64;
        loop {
            let (changes, next) = connector.list_changes(cursor.as_ref()).await?;
            if changes.is_empty() {
                break;
            }
            for change in &changes {
                crate::queue::enqueue_change(&self.kv, &self.provider, change).await?;
                queued += 1;
            }
            match next {
                Some(next) => {
                    self.store
                        .set_connector_cursor(&ctx, &self.provider, &next)
                        .await?;
                    cursor = Some(next);
                }
                None => break,
            }
        }
        info!(tenant = tenant_id, queued, "backfill queued");
        Ok(queued)
    }

    /// Provider this worker consumes.
    #[must_use]
    pub fn provider(&self) -> &str {
        &self.provider
    }
}
