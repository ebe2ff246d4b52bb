//! Batched KEK rotation for connector configs.

use std::sync::Arc;
use std::time::Instant;

use activekg_core::storage::{GraphStore, RotationFilter};
use activekg_core::{Result, Telemetry};
use serde::Serialize;
use tracing::{error, info};

use crate::encryption::SecretEncryption;

/// Outcome of a rotation run.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RotationReport {
    pub candidates: u64,
    pub rotated: u64,
    pub errors: u64,
    pub dry_run: bool,
}

/// Rotation request filters.
#[derive(Debug, Clone, Default)]
pub struct RotationRequest {
    pub providers: Vec<String>,
    pub tenants: Vec<String>,
    pub dry_run: bool,
    pub batch_size: usize,
}

/// Re-encrypt every config row whose key version differs from the active
/// KEK, in small batches.
///
/// Each row is decrypted with its stored version (falling back across all
/// loaded KEKs), re-encrypted with the active KEK, and written back with
/// the new `key_version`. Rows that fail to decrypt are counted and left
/// untouched. Dry-run only counts candidates.
pub async fn rotate_keys(
    store: &Arc<dyn GraphStore>,
    encryption: &Arc<SecretEncryption>,
    request: &RotationRequest,
    telemetry: &Telemetry,
) -> Result<RotationReport> {
    let active = encryption.active_version();
    let candidates = store
        .list_connector_configs(&RotationFilter {
            not_key_version: Some(active),
            providers: request.providers.clone(),
            tenants: request.tenants.clone(),
        })
        .await?;

    let mut report = RotationReport {
        candidates: candidates.len() as u64,
        dry_run: request.dry_run,
        ..RotationReport::default()
    };
    if request.dry_run {
        info!(candidates = report.candidates, active, "rotation dry run");
        return Ok(report);
    }

    let batch_size = request.batch_size.max(1);
    for batch in candidates.chunks(batch_size) {
        let started = Instant::now();
        for record in batch {
            let (decrypted, failed) = encryption.decrypt_config(
                &record.config,
                Some(record.key_version),
            );
            if !failed.is_empty() {
                error!(
                    tenant = %record.tenant_id,
                    provider = %record.provider,
                    fields = ?failed,
                    "rotation skipped row: undecryptable fields"
                );
                telemetry
                    .counter_with("rotation_total", &[("result", "error")])
                    .increment();
                report.errors += 1;
                continue;
            }

            let reencrypted = match encryption.encrypt_config(&decrypted) {
                Ok(config) => config,
                Err(e) => {
                    error!(tenant = %record.tenant_id, provider = %record.provider, error = %e, "re-encryption failed");
                    telemetry
                        .counter_with("rotation_total", &[("result", "error")])
                        .increment();
                    report.errors += 1;
                    continue;
                }
            };

            let mut updated = record.clone();
            updated.config = reencrypted;
            updated.key_version = active;
            match store.upsert_connector_config(&updated).await {
                Ok(()) => {
                    telemetry
                        .counter_with("rotation_total", &[("result", "rotated")])
                        .increment();
                    report.rotated += 1;
                }
                Err(e) => {
                    error!(tenant = %record.tenant_id, provider = %record.provider, error = %e, "rotation write failed");
                    telemetry
                        .counter_with("rotation_total", &[("result", "error")])
                        .increment();
                    report.errors += 1;
                }
            }
        }
        telemetry
            .histogram("rotation_batch_latency_seconds")
            .observe(started.elapsed());
    }

    info!(
        candidates = report.candidates,
        rotated = report.rotated,
        errors = report.errors,
        active,
        "rotation complete"
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use activekg_core::Telemetry;
    use activekg_storage_turso::{StoreConfig, TursoGraphStore};
    use serde_json::json;
    use std::collections::BTreeMap;
    use std::sync::atomic::{AtomicU64, Ordering};

    static MEM_DB_COUNTER: AtomicU64 = AtomicU64::new(0);

    /// Unique shared-cache in-memory database URI, so pooled connections
    /// within one test see the same schema while different tests stay
    /// isolated from each other.
    fn unique_memory_db_uri() -> String {
        let id = MEM_DB_COUNTER.fetch_add(1, Ordering::Relaxed);
        format!("file:rotation_test_{id}?mode=memory&cache=shared")
    }

    async fn graph_store() -> Arc<dyn GraphStore> {
        let db = libsql::Builder::new_local(unique_memory_db_uri())
            .build()
            .await
            .unwrap();
        let store = TursoGraphStore::from_database(db, StoreConfig::default(), Telemetry::new());
        store.migrate().await.unwrap();
        Arc::new(store)
    }

    #[tokio::test]
    async fn rotation_reencrypts_all_stale_rows() {
        let store = graph_store().await;
        let telemetry = Telemetry::new();

        let v1 = SecretEncryption::generate_key();
        let v2 = SecretEncryption::generate_key();
        let keys = BTreeMap::from([(1, v1.clone()), (2, v2.clone())]);

        // Encrypt four configs across two tenants with V1 active
        let enc_v1 =
            Arc::new(SecretEncryption::from_keys(BTreeMap::from([(1, v1.clone())]), 1).unwrap());
        let secrets = [
            ("t1", "s3", "secret-a"),
            ("t1", "gcs", "secret-b"),
            ("t2", "s3", "secret-c"),
            ("t2", "drive", "secret-d"),
        ];
        let now = chrono::Utc::now();
        for (tenant, provider, secret) in secrets {
            let config = enc_v1
                .encrypt_config(&json!({ "bucket": "b", "folder_id": "f", "token": secret }))
                .unwrap();
            store
                .upsert_connector_config(&activekg_core::storage::ConnectorConfigRecord {
                    tenant_id: tenant.to_string(),
                    provider: provider.to_string(),
                    config,
                    key_version: 1,
                    enabled: true,
                    created_at: now,
                    updated_at: now,
                })
                .await
                .unwrap();
        }

        // Switch active to V2 with both keys loaded
        let enc_v2 = Arc::new(SecretEncryption::from_keys(keys, 2).unwrap());

        let dry = rotate_keys(
            &store,
            &enc_v2,
            &RotationRequest {
                dry_run: true,
                batch_size: 2,
                ..RotationRequest::default()
            },
            &telemetry,
        )
        .await
        .unwrap();
        assert_eq!(dry.candidates, 4);
        assert_eq!(dry.rotated, 0);

        let real = rotate_keys(
            &store,
            &enc_v2,
            &RotationRequest {
                dry_run: false,
                batch_size: 2,
                ..RotationRequest::default()
            },
            &telemetry,
        )
        .await
        .unwrap();
        assert_eq!(real.rotated, 4);
        assert_eq!(real.errors, 0);

        // All rows now carry the active version and still decrypt to the
        // original plaintext
        let all = store
            .list_connector_configs(&RotationFilter::default())
            .await
            .unwrap();
        assert_eq!(all.len(), 4);
        for record in all {
            assert_eq!(record.key_version, 2);
            let (decrypted, failed) = enc_v2.decrypt_config(&record.config, Some(2));
            assert!(failed.is_empty());
            let expected = secrets
                .iter()
                .find(|(t, p, _)| *t == record.tenant_id && *p == record.provider)
                .map(|(_, _, s)| *s)
                .unwrap();
            assert_eq!(decrypted["token"], expected);
        }

        // Nothing left to rotate
        let again = rotate_keys(
            &store,
            &enc_v2,
            &RotationRequest {
                dry_run: true,
                ..RotationRequest::default()
            },
            &telemetry,
        )
        .await
        .unwrap();
        assert_eq!(again.candidates, 0);
    }

    #[tokio::test]
    async fn provider_filter_limits_rotation() {
        let store = graph_store().await;
        let telemetry = Telemetry::new();
        let v1 = SecretEncryption::generate_key();
        let v2 = SecretEncryption::generate_key();
        let enc_v1 =
            Arc::new(SecretEncryption::from_keys(BTreeMap::from([(1, v1.clone())]), 1).unwrap());
        let now = chrono::Utc::now();
        for provider in ["s3", "gcs"] {
            store
                .upsert_connector_config(&activekg_core::storage::ConnectorConfigRecord {
                    tenant_id: "t1".to_string(),
                    provider: provider.to_string(),
                    config: enc_v1.encrypt_config(&json!({ "token": "x" })).unwrap(),
                    key_version: 1,
                    enabled: true,
                    created_at: now,
                    updated_at: now,
                })
                .await
                .unwrap();
        }

        let enc_v2 = Arc::new(
            SecretEncryption::from_keys(BTreeMap::from([(1, v1), (2, v2)]), 2).unwrap(),
        );
        let report = rotate_keys(
            &store,
            &enc_v2,
            &RotationRequest {
                providers: vec!["s3".to_string()],
                dry_run: false,
                batch_size: 10,
                ..RotationRequest::default()
            },
            &telemetry,
        )
        .await
        .unwrap();
        assert_eq!(report.rotated, 1);
    }
}
