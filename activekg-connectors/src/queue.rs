//! Per-tenant ingestion queues and dead-letter lists.

use std::sync::Arc;

use activekg_core::kv::KvStore;
use activekg_core::{Result, Telemetry};
use chrono::Utc;
use serde_json::json;
use tracing::{info, warn};

use crate::types::ChangeItem;

/// FIFO queue key for `(provider, tenant)`.
#[must_use]
pub fn queue_key(provider: &str, tenant_id: &str) -> String {
    format!("connector:{provider}:{tenant_id}:queue")
}

/// Dead-letter list key for `(provider, tenant)`.
#[must_use]
pub fn dlq_key(provider: &str, tenant_id: &str) -> String {
    format!("dlq:{provider}:{tenant_id}")
}

/// Enqueue a change item onto the tenant's FIFO queue.
pub async fn enqueue_change(
    kv: &Arc<dyn KvStore>,
    provider: &str,
    item: &ChangeItem,
) -> Result<()> {
    let key = queue_key(provider, &item.tenant_id);
    kv.lpush(&key, &serde_json::to_string(item)?).await?;
    info!(
        uri = %item.uri,
        operation = ?item.operation,
        tenant = %item.tenant_id,
        "change enqueued"
    );
    Ok(())
}

/// Push an exhausted or permanently failed item onto the DLQ with its
/// reason, and update the depth gauge.
pub async fn push_dlq(
    kv: &Arc<dyn KvStore>,
    telemetry: &Telemetry,
    provider: &str,
    item: &ChangeItem,
    reason: &str,
) -> Result<()> {
    let key = dlq_key(provider, &item.tenant_id);
    let entry = json!({
        "item": item,
        "reason": reason,
        "failed_at": Utc::now().to_rfc3339(),
    });
    kv.lpush(&key, &entry.to_string()).await?;
    let depth = kv.llen(&key).await.unwrap_or(-1);
    telemetry
        .counter_with("ingest_dlq_total", &[("provider", provider)])
        .increment();
    if depth >= 0 {
        telemetry
            .gauge_with("dlq_depth", &[("provider", provider)])
            .set(depth);
    }
    warn!(uri = %item.uri, reason, "item dead-lettered");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ChangeOperation;
    use activekg_core::kv::MemoryKv;
    use std::time::Duration;

    fn item(tenant: &str) -> ChangeItem {
        ChangeItem {
            uri: "s3://b/k".to_string(),
            operation: ChangeOperation::Upsert,
            etag: None,
            modified_at: None,
            tenant_id: tenant.to_string(),
        }
    }

    #[tokio::test]
    async fn enqueue_targets_tenant_queue() {
        let kv: Arc<dyn KvStore> = Arc::new(MemoryKv::new());
        enqueue_change(&kv, "s3", &item("tenant1")).await.unwrap();
        assert_eq!(kv.llen("connector:s3:tenant1:queue").await.unwrap(), 1);
        assert_eq!(kv.llen("connector:s3:other:queue").await.unwrap(), 0);

        let (_, raw) = kv
            .brpop(
                &["connector:s3:tenant1:queue".to_string()],
                Duration::from_millis(50),
            )
            .await
            .unwrap()
            .unwrap();
        let back: ChangeItem = serde_json::from_str(&raw).unwrap();
        assert_eq!(back.uri, "s3://b/k");
    }

    #[tokio::test]
    async fn dlq_records_reason_and_depth() {
        let kv: Arc<dyn KvStore> = Arc::new(MemoryKv::new());
        let telemetry = Telemetry::new();
        push_dlq(&kv, &telemetry, "s3", &item("t1"), "exhausted retries")
            .await
            .unwrap();

        assert_eq!(kv.llen("dlq:s3:t1").await.unwrap(), 1);
        let snap = telemetry.snapshot();
        assert_eq!(snap.counters["ingest_dlq_total{provider=\"s3\"}"], 1);
        assert_eq!(snap.gauges["dlq_depth{provider=\"s3\"}"], 1);
    }
}
