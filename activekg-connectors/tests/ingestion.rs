//! End-to-end ingestion tests: queue item in, graph nodes out.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use activekg_connectors::config_store::ConnectorConfigStore;
use activekg_connectors::connector::Connector;
use activekg_connectors::types::{ChangeItem, ChangeOperation, ConnectorStats, FetchResult};
use activekg_connectors::worker::{ConnectorFactory, IngestionWorker};
use activekg_connectors::SecretEncryption;
use activekg_core::config::{ChunkingSettings, ConnectorSettings};
use activekg_core::embeddings::HashEmbedder;
use activekg_core::kv::{KvStore, MemoryKv};
use activekg_core::storage::GraphStore;
use activekg_core::types::RequestContext;
use activekg_core::Telemetry;
use activekg_storage_turso::{StoreConfig, TursoGraphStore};
use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{json, Value};

const DIM: usize = 8;

struct StaticConnector {
    tenant_id: String,
    text: Arc<Mutex<String>>,
}

#[async_trait]
impl Connector for StaticConnector {
    async fn stat(&self, _uri: &str) -> activekg_core::Result<ConnectorStats> {
        Ok(ConnectorStats {
            exists: true,
            ..ConnectorStats::default()
        })
    }

    async fn fetch_text(&self, uri: &str) -> activekg_core::Result<FetchResult> {
        Ok(FetchResult {
            text: self.text.lock().clone(),
            title: Some("Static Doc".to_string()),
            metadata: json!({ "source_uri": uri, "content_type": "text/plain" }),
        })
    }

    async fn list_changes(
        &self,
        _cursor: Option<&Value>,
    ) -> activekg_core::Result<(Vec<ChangeItem>, Option<Value>)> {
        Ok((Vec::new(), None))
    }

    fn provider(&self) -> &str {
        "s3"
    }

    fn tenant_id(&self) -> &str {
        &self.tenant_id
    }
}

struct StaticFactory {
    text: Arc<Mutex<String>>,
}

impl ConnectorFactory for StaticFactory {
    fn build(
        &self,
        _provider: &str,
        tenant_id: &str,
        _config: &Value,
    ) -> activekg_core::Result<Arc<dyn Connector>> {
        Ok(Arc::new(StaticConnector {
            tenant_id: tenant_id.to_string(),
            text: Arc::clone(&self.text),
        }))
    }
}

struct Harness {
    worker: IngestionWorker,
    store: Arc<dyn GraphStore>,
    text: Arc<Mutex<String>>,
    telemetry: Telemetry,
}

async fn harness() -> Harness {
    let db = libsql::Builder::new_local(":memory:")
        .build()
        .await
        .expect("db");
    let store: Arc<dyn GraphStore> = Arc::new(TursoGraphStore::from_database(
        db,
        StoreConfig {
            dimension: DIM,
            ..StoreConfig::default()
        },
        Telemetry::new(),
    ));
    store.migrate().await.expect("migrate");

    let kv: Arc<dyn KvStore> = Arc::new(MemoryKv::new());
    let encryption = Arc::new(
        SecretEncryption::from_keys(
            BTreeMap::from([(1, SecretEncryption::generate_key())]),
            1,
        )
        .expect("keks"),
    );
    let telemetry = Telemetry::new();
    let config_store = Arc::new(ConnectorConfigStore::new(
        Arc::clone(&store),
        Arc::clone(&kv),
        encryption,
        Duration::from_secs(60),
        telemetry.clone(),
    ));
    config_store
        .upsert("tenant1", "s3", &json!({ "bucket": "my-bucket" }))
        .await
        .expect("config");

    let text = Arc::new(Mutex::new(
        "Rust is a systems programming language. It is fast and memory safe. \
         The borrow checker enforces ownership rules at compile time."
            .to_string(),
    ));
    let worker = IngestionWorker::new(
        "s3".to_string(),
        Arc::clone(&store),
        kv,
        Arc::new(HashEmbedder::new("hash-v1".to_string(), DIM, 8_000)),
        config_store,
        Arc::new(StaticFactory {
            text: Arc::clone(&text),
        }),
        ChunkingSettings {
            size: 60,
            overlap: 10,
        },
        ConnectorSettings::default(),
        telemetry.clone(),
    );

    Harness {
        worker,
        store,
        text,
        telemetry,
    }
}

fn upsert_item_with_etag(etag: &str) -> String {
    serde_json::to_string(&ChangeItem {
        uri: "s3://my-bucket/docs/rust.txt".to_string(),
        operation: ChangeOperation::Upsert,
        etag: Some(etag.to_string()),
        modified_at: None,
        tenant_id: "tenant1".to_string(),
    })
    .expect("item json")
}

fn upsert_item() -> String {
    upsert_item_with_etag("etag-1")
}

#[tokio::test]
async fn upsert_creates_parent_chunks_and_lineage() {
    let h = harness().await;
    let ctx = RequestContext::system("tenant1");

    h.worker.process_raw(&upsert_item()).await.expect("process");

    let parent = h
        .store
        .get_node_by_external_id(&ctx, "s3:tenant1:my-bucket/docs/rust.txt")
        .await
        .unwrap()
        .expect("parent exists");
    assert!(parent.classes.contains(&"Document".to_string()));
    assert_eq!(parent.props["is_parent"], true);
    assert!(parent.embedding.is_some());
    assert_eq!(parent.props["etag"], "etag-1");

    let children = h.store.find_children(&ctx, parent.id).await.unwrap();
    assert!(children.len() > 1, "text should split into multiple chunks");

    for child in &children {
        let chunk = h.store.get_node(&ctx, *child).await.unwrap().unwrap();
        assert!(chunk.classes.contains(&"Chunk".to_string()));
        assert!(chunk.embedding.is_some());
        // Lineage: chunk -> parent at depth 1
        let lineage = h.store.get_lineage(&ctx, *child, 3).await.unwrap();
        assert_eq!(lineage.len(), 1);
        assert_eq!(lineage[0].id, parent.id);
        assert_eq!(lineage[0].depth, 1);
    }
}

#[tokio::test]
async fn unchanged_content_is_skipped_by_etag_and_hash() {
    let h = harness().await;
    h.worker.process_raw(&upsert_item()).await.unwrap();

    // Same etag: skipped without fetching
    h.worker.process_raw(&upsert_item()).await.unwrap();

    // New etag but identical text: fetched, then skipped by content hash
    h.worker
        .process_raw(&upsert_item_with_etag("etag-rolled"))
        .await
        .unwrap();

    let snap = h.telemetry.snapshot();
    assert_eq!(
        snap.counters["ingest_unchanged_skipped_total{provider=\"s3\"}"],
        2
    );
    assert_eq!(snap.counters["ingest_docs_total{provider=\"s3\"}"], 1);
}

#[tokio::test]
async fn changed_content_reingests_and_bumps_version() {
    let h = harness().await;
    let ctx = RequestContext::system("tenant1");
    h.worker.process_raw(&upsert_item()).await.unwrap();

    let before = h
        .store
        .get_node_by_external_id(&ctx, "s3:tenant1:my-bucket/docs/rust.txt")
        .await
        .unwrap()
        .unwrap();

    *h.text.lock() = "Entirely new revision of the document body.".to_string();
    // A changed object arrives with a new etag
    h.worker
        .process_raw(&upsert_item_with_etag("etag-2"))
        .await
        .unwrap();

    let after = h
        .store
        .get_node_by_external_id(&ctx, "s3:tenant1:my-bucket/docs/rust.txt")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(after.id, before.id, "upsert is idempotent on external_id");
    assert!(after.version > before.version);
    assert_ne!(after.props["content_hash"], before.props["content_hash"]);
}

#[tokio::test]
async fn deleted_operation_tombstones_parent_and_chunks() {
    let h = harness().await;
    let ctx = RequestContext::system("tenant1");
    h.worker.process_raw(&upsert_item()).await.unwrap();

    let deleted = serde_json::to_string(&ChangeItem {
        uri: "s3://my-bucket/docs/rust.txt".to_string(),
        operation: ChangeOperation::Deleted,
        etag: None,
        modified_at: None,
        tenant_id: "tenant1".to_string(),
    })
    .unwrap();
    h.worker.process_raw(&deleted).await.unwrap();

    let parent = h
        .store
        .get_node_by_external_id(&ctx, "s3:tenant1:my-bucket/docs/rust.txt")
        .await
        .unwrap()
        .unwrap();
    assert!(parent.is_deleted());
    assert!(parent.deletion_grace_until().is_some());

    for child in h.store.find_children(&ctx, parent.id).await.unwrap() {
        let chunk = h.store.get_node(&ctx, child).await.unwrap().unwrap();
        assert!(chunk.is_deleted());
    }
}

#[tokio::test]
async fn malformed_queue_item_is_counted_and_rejected() {
    let h = harness().await;
    assert!(h.worker.process_raw("{ not json").await.is_err());
    let snap = h.telemetry.snapshot();
    assert_eq!(
        snap.counters["ingest_invalid_items_total{provider=\"s3\"}"],
        1
    );
}
