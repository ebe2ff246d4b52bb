//! Integration tests for the libSQL graph store against in-memory databases.

use activekg_core::storage::{
    EventFilter, GraphStore, NewEdge, NewEvent, RefreshStateUpdate, RotationFilter, SearchFilters,
    ConnectorConfigRecord,
};
use activekg_core::types::{EventType, NewNode, NodePatch, RequestContext};
use activekg_core::{Error, Telemetry};
use activekg_storage_turso::{StoreConfig, TursoGraphStore};
use chrono::{Duration, Utc};
use serde_json::json;

const DIM: usize = 4;

async fn store() -> TursoGraphStore {
    let db = libsql::Builder::new_local(":memory:")
        .build()
        .await
        .expect("in-memory database");
    let store = TursoGraphStore::from_database(
        db,
        StoreConfig {
            dimension: DIM,
            deletion_grace_secs: 3600,
            ..StoreConfig::default()
        },
        Telemetry::new(),
    );
    store.migrate().await.expect("migration");
    store
}

fn ctx(tenant: &str) -> RequestContext {
    RequestContext::user(tenant, "tester")
}

fn doc(text: &str, embedding: Option<Vec<f32>>) -> NewNode {
    NewNode {
        classes: vec!["Document".to_string()],
        props: json!({ "text": text, "title": text.split(' ').next().unwrap_or("") }),
        embedding,
        ..NewNode::default()
    }
}

#[tokio::test]
async fn guards_are_installed_by_migration() {
    let store = store().await;
    assert!(store.guards_installed().await.unwrap());
}

#[tokio::test]
async fn tenant_isolation_hides_rows_from_other_tenants() {
    let store = store().await;
    let a = ctx("tenant_a");
    let b = ctx("tenant_b");

    let id = store
        .create_node(&a, doc("Tenant A secret", None))
        .await
        .unwrap();

    assert!(store.get_node(&a, id).await.unwrap().is_some());
    assert!(store.get_node(&b, id).await.unwrap().is_none());
    assert!(store.list_nodes(&b, 10, 0).await.unwrap().is_empty());
    assert!(store
        .list_events(&b, &EventFilter { node_id: Some(id), limit: 10, ..EventFilter::default() })
        .await
        .unwrap()
        .is_empty());
}

#[tokio::test]
async fn create_rejects_empty_tenant_and_bad_dimension() {
    let store = store().await;

    let err = store
        .create_node(&ctx("  "), doc("x", None))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Validation(_)));

    let err = store
        .create_node(&ctx("t1"), doc("x", Some(vec![1.0; DIM + 1])))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Validation(_)));
}

#[tokio::test]
async fn update_round_trip_with_optimistic_concurrency() {
    let store = store().await;
    let t = ctx("t1");
    let id = store.create_node(&t, doc("original", None)).await.unwrap();

    let node = store.get_node(&t, id).await.unwrap().unwrap();
    assert_eq!(node.version, 1);

    let updated = store
        .update_node(
            &t,
            id,
            NodePatch {
                props: Some(json!({ "text": "revised" })),
                expected_version: Some(1),
                ..NodePatch::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(updated.version, 2);
    assert_eq!(updated.text(), Some("revised"));

    // Stale version loses
    let err = store
        .update_node(
            &t,
            id,
            NodePatch {
                props: Some(json!({ "text": "too late" })),
                expected_version: Some(1),
                ..NodePatch::default()
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Conflict(_)));

    let versions = store.list_versions(&t, id).await.unwrap();
    assert_eq!(versions.len(), 2);
    assert!(versions[0].version < versions[1].version);
}

#[tokio::test]
async fn events_are_written_and_listed_descending() {
    let store = store().await;
    let t = ctx("t1");
    let id = store.create_node(&t, doc("doc", None)).await.unwrap();
    store
        .update_node(
            &t,
            id,
            NodePatch {
                props: Some(json!({ "text": "v2" })),
                ..NodePatch::default()
            },
        )
        .await
        .unwrap();
    store
        .append_event(
            &t,
            id,
            NewEvent {
                event_type: EventType::Refreshed,
                payload: json!({ "drift_score": 0.0 }),
            },
        )
        .await
        .unwrap();

    let events = store
        .list_events(
            &t,
            &EventFilter {
                node_id: Some(id),
                limit: 10,
                ..EventFilter::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(events.len(), 3);
    for pair in events.windows(2) {
        assert!(pair[0].created_at >= pair[1].created_at);
    }

    let refreshed_only = store
        .list_events(
            &t,
            &EventFilter {
                node_id: Some(id),
                event_type: Some(EventType::Refreshed),
                limit: 10,
            },
        )
        .await
        .unwrap();
    assert_eq!(refreshed_only.len(), 1);
}

#[tokio::test]
async fn lineage_walks_derived_from_in_depth_order() {
    let store = store().await;
    let t = ctx("t1");
    let a = store.create_node(&t, doc("a", None)).await.unwrap();
    let b = store.create_node(&t, doc("b", None)).await.unwrap();
    let c = store.create_node(&t, doc("c", None)).await.unwrap();

    for (src, dst) in [(a, b), (b, c)] {
        store
            .create_edge(
                &t,
                NewEdge {
                    src,
                    rel: "DERIVED_FROM".to_string(),
                    dst,
                    props: json!({}),
                },
            )
            .await
            .unwrap();
    }

    let ancestors = store.get_lineage(&t, a, 5).await.unwrap();
    assert_eq!(ancestors.len(), 2);
    assert_eq!(ancestors[0].id, b);
    assert_eq!(ancestors[0].depth, 1);
    assert_eq!(ancestors[1].id, c);
    assert_eq!(ancestors[1].depth, 2);

    // Depth bound is honored
    let shallow = store.get_lineage(&t, a, 1).await.unwrap();
    assert_eq!(shallow.len(), 1);
}

#[tokio::test]
async fn edge_endpoints_must_be_tenant_visible() {
    let store = store().await;
    let a = ctx("tenant_a");
    let b = ctx("tenant_b");
    let node_a = store.create_node(&a, doc("a", None)).await.unwrap();
    let node_b = store.create_node(&b, doc("b", None)).await.unwrap();

    let err = store
        .create_edge(
            &a,
            NewEdge {
                src: node_a,
                rel: "DERIVED_FROM".to_string(),
                dst: node_b,
                props: json!({}),
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(err, Error::NotFound(_)));
}

#[tokio::test]
async fn vector_search_orders_by_similarity_and_skips_deleted() {
    let store = store().await;
    let t = ctx("t1");

    let close = store
        .create_node(&t, doc("close", Some(vec![1.0, 0.0, 0.0, 0.0])))
        .await
        .unwrap();
    let far = store
        .create_node(&t, doc("far", Some(vec![0.0, 1.0, 0.0, 0.0])))
        .await
        .unwrap();
    let deleted = store
        .create_node(&t, doc("deleted", Some(vec![1.0, 0.0, 0.0, 0.0])))
        .await
        .unwrap();
    store.delete_node(&t, deleted, false).await.unwrap();

    let hits = store
        .vector_search(&t, &[1.0, 0.0, 0.0, 0.0], 10, &SearchFilters::default())
        .await
        .unwrap();
    let ids: Vec<_> = hits.iter().map(|(n, _)| n.id).collect();
    assert_eq!(ids[0], close);
    assert!(ids.contains(&far));
    assert!(!ids.contains(&deleted));
    assert!(hits[0].1 > hits[1].1);
    assert!((hits[0].1 - 1.0).abs() < 1e-5);
}

#[tokio::test]
async fn lexical_search_matches_text_within_tenant() {
    let store = store().await;
    let t = ctx("t1");
    let other = ctx("t2");

    let resume = store
        .create_node(
            &t,
            doc("Senior engineer with python and postgresql experience", None),
        )
        .await
        .unwrap();
    store
        .create_node(&t, doc("Completely unrelated cooking recipe", None))
        .await
        .unwrap();
    store
        .create_node(&other, doc("python postgresql in another tenant", None))
        .await
        .unwrap();

    let hits = store
        .lexical_search(&t, "python postgresql", 5, &SearchFilters::default())
        .await
        .unwrap();
    assert!(!hits.is_empty());
    assert_eq!(hits[0].0.id, resume);
    assert!(hits.iter().all(|(n, _)| n.tenant_id == "t1"));

    let empty = store
        .lexical_search(&t, "", 5, &SearchFilters::default())
        .await
        .unwrap();
    assert!(empty.is_empty());
}

#[tokio::test]
async fn refresh_state_bumps_version_and_history() {
    let store = store().await;
    let t = ctx("t1");
    let id = store.create_node(&t, doc("doc", None)).await.unwrap();

    let version = store
        .set_refresh_state(
            &t,
            id,
            RefreshStateUpdate {
                embedding: vec![0.5, 0.5, 0.5, 0.5],
                drift_score: 0.12,
                last_refreshed: Utc::now(),
            },
        )
        .await
        .unwrap();
    assert_eq!(version, 2);

    store
        .write_embedding_history(&t, id, 0.12, None)
        .await
        .unwrap();

    let node = store.get_node(&t, id).await.unwrap().unwrap();
    assert!(node.embedding.is_some());
    assert_eq!(node.drift_score, Some(0.12));
    assert!(node.last_refreshed.is_some());
}

#[tokio::test]
async fn soft_delete_then_purge_respects_grace_and_tenancy() {
    let store = store().await;
    let t = ctx("t1");
    let other = ctx("t2");

    let parent = store
        .create_node(
            &t,
            NewNode {
                classes: vec!["Document".to_string()],
                props: json!({ "text": "parent", "is_parent": true }),
                ..NewNode::default()
            },
        )
        .await
        .unwrap();
    let chunk = store
        .create_node(
            &t,
            NewNode {
                classes: vec!["Chunk".to_string(), "Document".to_string()],
                props: json!({ "text": "chunk", "parent_id": parent.to_string() }),
                ..NewNode::default()
            },
        )
        .await
        .unwrap();
    let untouched = store.create_node(&other, doc("other", None)).await.unwrap();

    store.delete_node(&t, parent, false).await.unwrap();
    store.delete_node(&t, chunk, false).await.unwrap();

    let node = store.get_node(&t, parent).await.unwrap().unwrap();
    assert!(node.is_deleted());
    assert!(node.deletion_grace_until().is_some());

    // Before grace passes nothing is eligible
    let early = store
        .purge_deleted(Some("t1"), Utc::now(), 100, true)
        .await
        .unwrap();
    assert_eq!(early.candidates, 0);

    let after_grace = Utc::now() + Duration::seconds(3601);
    let dry = store
        .purge_deleted(Some("t1"), after_grace, 100, true)
        .await
        .unwrap();
    assert_eq!(dry.candidates, 2);
    assert_eq!(dry.parents_deleted + dry.chunks_deleted, 0);

    let real = store
        .purge_deleted(Some("t1"), after_grace, 100, false)
        .await
        .unwrap();
    assert_eq!(real.candidates, 2);
    assert_eq!(real.parents_deleted, 1);
    assert_eq!(real.chunks_deleted, 1);

    assert!(store.get_node(&t, parent).await.unwrap().is_none());
    assert!(store.get_node(&t, chunk).await.unwrap().is_none());
    assert!(store.get_node(&other, untouched).await.unwrap().is_some());

    let again = store
        .purge_deleted(Some("t1"), after_grace, 100, true)
        .await
        .unwrap();
    assert_eq!(again.candidates, 0);
}

#[tokio::test]
async fn patterns_are_tenant_namespaced() {
    let store = store().await;
    let t = ctx("t1");
    let other = ctx("t2");

    store
        .upsert_pattern(&t, "urgent", &[1.0, 0.0, 0.0, 0.0], Some("urgent docs"))
        .await
        .unwrap();

    let found = store.get_pattern(&t, "urgent").await.unwrap().unwrap();
    assert_eq!(found.embedding, vec![1.0, 0.0, 0.0, 0.0]);
    assert_eq!(found.description.as_deref(), Some("urgent docs"));

    assert!(store.get_pattern(&other, "urgent").await.unwrap().is_none());

    assert_eq!(store.list_patterns(&t).await.unwrap().len(), 1);
    assert!(store.delete_pattern(&t, "urgent").await.unwrap());
    assert!(!store.delete_pattern(&t, "urgent").await.unwrap());
}

#[tokio::test]
async fn connector_configs_round_trip_and_filter() {
    let store = store().await;
    let now = Utc::now();
    for (tenant, provider, key_version) in
        [("t1", "s3", 1), ("t1", "gcs", 2), ("t2", "s3", 1)]
    {
        store
            .upsert_connector_config(&ConnectorConfigRecord {
                tenant_id: tenant.to_string(),
                provider: provider.to_string(),
                config: json!({ "bucket": "b", "secret_access_key": "ciphertext" }),
                key_version,
                enabled: true,
                created_at: now,
                updated_at: now,
            })
            .await
            .unwrap();
    }

    let fetched = store
        .get_connector_config(&ctx("t1"), "s3")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(fetched.key_version, 1);

    // Rows not on key version 2 are rotation candidates
    let candidates = store
        .list_connector_configs(&RotationFilter {
            not_key_version: Some(2),
            ..RotationFilter::default()
        })
        .await
        .unwrap();
    assert_eq!(candidates.len(), 2);

    let scoped = store
        .list_connector_configs(&RotationFilter {
            not_key_version: Some(2),
            tenants: vec!["t2".to_string()],
            ..RotationFilter::default()
        })
        .await
        .unwrap();
    assert_eq!(scoped.len(), 1);

    assert!(store
        .set_connector_enabled(&ctx("t1"), "s3", false)
        .await
        .unwrap());
    let disabled = store
        .get_connector_config(&ctx("t1"), "s3")
        .await
        .unwrap()
        .unwrap();
    assert!(!disabled.enabled);

    store
        .set_connector_cursor(&ctx("t1"), "s3", &json!({ "token": "abc" }))
        .await
        .unwrap();
    let cursor = store
        .get_connector_cursor(&ctx("t1"), "s3")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(cursor.cursor["token"], "abc");
}

#[tokio::test]
async fn external_id_lookup_is_tenant_scoped() {
    let store = store().await;
    let t = ctx("t1");
    store
        .create_node(
            &t,
            NewNode {
                classes: vec!["Document".to_string()],
                props: json!({ "text": "doc", "external_id": "s3:t1:bucket/key" }),
                ..NewNode::default()
            },
        )
        .await
        .unwrap();

    assert!(store
        .get_node_by_external_id(&t, "s3:t1:bucket/key")
        .await
        .unwrap()
        .is_some());
    assert!(store
        .get_node_by_external_id(&ctx("t2"), "s3:t1:bucket/key")
        .await
        .unwrap()
        .is_none());
}
