//! Refresh scheduler and trigger engine against a real store.

use std::sync::Arc;

use activekg_core::config::{PayloadSettings, SchedulerSettings};
use activekg_core::embeddings::{EmbeddingProvider, HashEmbedder};
use activekg_core::refresh::{PayloadLoader, RefreshScheduler};
use activekg_core::storage::{EventFilter, GraphStore};
use activekg_core::triggers::TriggerEngine;
use activekg_core::types::{
    EventType, NewNode, NodePatch, RefreshPolicy, RequestContext, TriggerSpec,
};
use activekg_core::Telemetry;
use activekg_storage_turso::{StoreConfig, TursoGraphStore};
use serde_json::json;

const DIM: usize = 8;

struct Rig {
    store: Arc<dyn GraphStore>,
    scheduler: RefreshScheduler,
    telemetry: Telemetry,
}

async fn rig() -> Rig {
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

    let telemetry = Telemetry::new();
    let embedder: Arc<dyn EmbeddingProvider> =
        Arc::new(HashEmbedder::new("hash-v1".to_string(), DIM, 8_000));
    let triggers = Arc::new(TriggerEngine::new(Arc::clone(&store), telemetry.clone()));
    let scheduler = RefreshScheduler::new(
        Arc::clone(&store),
        embedder,
        triggers,
        PayloadLoader::new(PayloadSettings::default(), None),
        telemetry.clone(),
        SchedulerSettings {
            enabled: true,
            tick_secs: 1,
            batch_per_tenant: 10,
        },
    );

    Rig {
        store,
        scheduler,
        telemetry,
    }
}

fn ctx() -> RequestContext {
    RequestContext::system("tenant1")
}

fn admin_ctx() -> RequestContext {
    RequestContext {
        tenant_id: "tenant1".to_string(),
        actor_id: "admin".to_string(),
        actor_type: "user".to_string(),
        scopes: vec![],
    }
}

async fn policy_node(store: &Arc<dyn GraphStore>, text: &str, threshold: f64) -> uuid::Uuid {
    store
        .create_node(
            &ctx(),
            NewNode {
                classes: vec!["Document".to_string()],
                props: json!({ "text": text }),
                refresh_policy: Some(RefreshPolicy {
                    interval: Some("1m".to_string()),
                    cron: None,
                    drift_threshold: Some(threshold),
                }),
                ..NewNode::default()
            },
        )
        .await
        .expect("node")
}

async fn refreshed_events(store: &Arc<dyn GraphStore>, id: uuid::Uuid) -> Vec<serde_json::Value> {
    store
        .list_events(
            &ctx(),
            &EventFilter {
                node_id: Some(id),
                event_type: Some(EventType::Refreshed),
                limit: 50,
            },
        )
        .await
        .unwrap()
        .into_iter()
        .map(|e| e.payload)
        .collect()
}

#[tokio::test]
async fn manual_refresh_emits_event_even_without_drift() {
    let rig = rig().await;
    let id = policy_node(
        &rig.store,
        "Machine learning fundamentals for beginners",
        0.15,
    )
    .await;
    let node = rig.store.get_node(&ctx(), id).await.unwrap().unwrap();

    let outcome = rig
        .scheduler
        .refresh_node(&admin_ctx(), &node, true)
        .await
        .unwrap();
    // First embedding: no prior vector, so drift is zero
    assert_eq!(outcome.drift_score, 0.0);
    assert!(!outcome.threshold_exceeded);
    assert!(outcome.event_emitted);

    let payloads = refreshed_events(&rig.store, id).await;
    assert_eq!(payloads.len(), 1);
    assert_eq!(payloads[0]["drift_score"], 0.0);
    assert_eq!(payloads[0]["threshold_exceeded"], false);
    assert_eq!(payloads[0]["manual_trigger"], true);
}

#[tokio::test]
async fn unchanged_text_without_manual_flag_emits_no_event() {
    let rig = rig().await;
    let id = policy_node(&rig.store, "stable content", 0.15).await;

    // Seed an embedding first (manual), then refresh again automatically
    let node = rig.store.get_node(&ctx(), id).await.unwrap().unwrap();
    rig.scheduler
        .refresh_node(&admin_ctx(), &node, true)
        .await
        .unwrap();

    let node = rig.store.get_node(&ctx(), id).await.unwrap().unwrap();
    let outcome = rig.scheduler.refresh_node(&ctx(), &node, false).await.unwrap();
    assert_eq!(outcome.drift_score, 0.0);
    assert!(!outcome.event_emitted);

    // Only the manual event exists
    assert_eq!(refreshed_events(&rig.store, id).await.len(), 1);
}

#[tokio::test]
async fn drifted_content_above_threshold_emits_event() {
    let rig = rig().await;
    let text = "original text about databases";
    let id = policy_node(&rig.store, text, 0.15).await;

    // Plant the exact opposite of the text's embedding so the re-embed
    // produces a known drift of 2.0
    let embedder = HashEmbedder::new("hash-v1".to_string(), DIM, 8_000);
    let opposite: Vec<f32> = embedder.generate(text).iter().map(|x| -x).collect();
    rig.store
        .update_node(
            &ctx(),
            id,
            NodePatch {
                embedding: Some(Some(opposite)),
                ..NodePatch::default()
            },
        )
        .await
        .unwrap();

    let node = rig.store.get_node(&ctx(), id).await.unwrap().unwrap();
    let outcome = rig.scheduler.refresh_node(&ctx(), &node, false).await.unwrap();
    assert!(
        (outcome.drift_score - 2.0).abs() < 1e-4,
        "drift {}",
        outcome.drift_score
    );
    assert!(outcome.threshold_exceeded);
    assert!(outcome.event_emitted);

    let payloads = refreshed_events(&rig.store, id).await;
    assert_eq!(payloads.len(), 1);
    assert_eq!(payloads[0]["manual_trigger"], false);
    assert_eq!(payloads[0]["threshold_exceeded"], true);
}

#[tokio::test]
async fn refresh_updates_node_state_and_version() {
    let rig = rig().await;
    let id = policy_node(&rig.store, "some text", 0.5).await;

    let node = rig.store.get_node(&ctx(), id).await.unwrap().unwrap();
    assert!(node.embedding.is_none());
    rig.scheduler
        .refresh_node(&admin_ctx(), &node, true)
        .await
        .unwrap();

    let node = rig.store.get_node(&ctx(), id).await.unwrap().unwrap();
    assert!(node.embedding.is_some());
    assert_eq!(node.drift_score, Some(0.0));
    assert!(node.last_refreshed.is_some());
    assert_eq!(node.version, 2);
}

#[tokio::test]
async fn matching_pattern_fires_trigger_after_refresh() {
    let rig = rig().await;
    let embedder = HashEmbedder::new("hash-v1".to_string(), DIM, 8_000);
    let text = "urgent incident report";

    // Pattern vector equals the node's embedding, so similarity is 1.0
    rig.store
        .upsert_pattern(&ctx(), "urgent", &embedder.generate(text), None)
        .await
        .unwrap();

    let id = rig
        .store
        .create_node(
            &ctx(),
            NewNode {
                classes: vec!["Document".to_string()],
                props: json!({ "text": text }),
                refresh_policy: Some(RefreshPolicy {
                    interval: Some("1m".to_string()),
                    cron: None,
                    drift_threshold: Some(0.5),
                }),
                triggers: vec![TriggerSpec {
                    name: "urgent".to_string(),
                    threshold: 0.85,
                }],
                ..NewNode::default()
            },
        )
        .await
        .unwrap();

    let node = rig.store.get_node(&ctx(), id).await.unwrap().unwrap();
    rig.scheduler
        .refresh_node(&admin_ctx(), &node, true)
        .await
        .unwrap();

    let fired = rig
        .store
        .list_events(
            &ctx(),
            &EventFilter {
                node_id: Some(id),
                event_type: Some(EventType::TriggerFired),
                limit: 10,
            },
        )
        .await
        .unwrap();
    assert_eq!(fired.len(), 1);
    assert_eq!(fired[0].actor_type, "trigger");
    assert_eq!(fired[0].payload["trigger"], "urgent");
    assert!(fired[0].payload["similarity"].as_f64().unwrap() >= 0.85);

    let snap = rig.telemetry.snapshot();
    assert_eq!(
        snap.counters["triggers_fired_total{pattern=\"urgent\",mode=\"targeted\"}"],
        1
    );
}

#[tokio::test]
async fn missing_pattern_is_skipped_silently() {
    let rig = rig().await;
    let id = rig
        .store
        .create_node(
            &ctx(),
            NewNode {
                classes: vec!["Document".to_string()],
                props: json!({ "text": "text" }),
                triggers: vec![TriggerSpec {
                    name: "no-such-pattern".to_string(),
                    threshold: 0.5,
                }],
                ..NewNode::default()
            },
        )
        .await
        .unwrap();

    let node = rig.store.get_node(&ctx(), id).await.unwrap().unwrap();
    // Refresh succeeds; the dangling trigger is ignored
    let outcome = rig
        .scheduler
        .refresh_node(&admin_ctx(), &node, true)
        .await
        .unwrap();
    assert!(outcome.event_emitted);

    let fired = rig
        .store
        .list_events(
            &ctx(),
            &EventFilter {
                node_id: Some(id),
                event_type: Some(EventType::TriggerFired),
                limit: 10,
            },
        )
        .await
        .unwrap();
    assert!(fired.is_empty());
}

#[tokio::test]
async fn run_cycle_refreshes_due_nodes_only() {
    let rig = rig().await;

    // Due: never refreshed, interval policy
    let due = policy_node(&rig.store, "due node", 0.5).await;
    // Not due: no policy at all
    let no_policy = rig
        .store
        .create_node(
            &ctx(),
            NewNode {
                classes: vec!["Document".to_string()],
                props: json!({ "text": "no policy" }),
                ..NewNode::default()
            },
        )
        .await
        .unwrap();

    let stats = rig.scheduler.run_cycle().await.unwrap();
    assert_eq!(stats.refreshed, 1);
    assert_eq!(stats.errors, 0);

    let refreshed = rig.store.get_node(&ctx(), due).await.unwrap().unwrap();
    assert!(refreshed.last_refreshed.is_some());
    let untouched = rig.store.get_node(&ctx(), no_policy).await.unwrap().unwrap();
    assert!(untouched.last_refreshed.is_none());

    // Immediately after, nothing is due
    let stats = rig.scheduler.run_cycle().await.unwrap();
    assert_eq!(stats.refreshed, 0);
}
