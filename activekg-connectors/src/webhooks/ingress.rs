//! Webhook message processing: verification, dedup, and enqueue.
//!
//! The HTTP handlers in the server crate do transport-level work (body
//! limits, deadlines) and delegate everything else here so the pipeline is
//! testable without a listener.

use std::sync::Arc;
use std::time::Duration;

use activekg_core::config::WebhookSettings;
use activekg_core::kv::KvStore;
use activekg_core::{Error, Result, Telemetry};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use chrono::Utc;
use serde_json::{json, Value};
use tracing::{info, warn};

use super::sns::SnsVerifier;
use super::{tenant_from_topic, topic_allowlist, validate_topic_arn};
use crate::queue::enqueue_change;
use crate::types::{ChangeItem, ChangeOperation};

/// Outcome returned to the HTTP layer as the response body.
#[derive(Debug, Clone)]
pub struct WebhookOutcome {
    pub body: Value,
}

/// Decode URL-encoded object keys (`+` as space, `%XX` sequences).
fn unquote_plus(key: &str) -> String {
    let mut out = Vec::with_capacity(key.len());
    let bytes = key.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'+' => {
                out.push(b' ');
                i += 1;
            }
            b'%' if i + 2 < bytes.len() => {
                let hex = &key[i + 1..i + 3];
                if let Ok(byte) = u8::from_str_radix(hex, 16) {
                    out.push(byte);
                    i += 3;
                } else {
                    out.push(b'%');
                    i += 1;
                }
            }
            other => {
                out.push(other);
                i += 1;
            }
        }
    }
    String::from_utf8_lossy(&out).into_owned()
}

/// Headers relevant to SNS verification.
#[derive(Debug, Default, Clone)]
pub struct SnsHeaders {
    pub signature: String,
    pub cert_url: String,
    pub signature_version: String,
}

/// Processes webhook payloads for both providers.
pub struct WebhookProcessor {
    kv: Arc<dyn KvStore>,
    verifier: SnsVerifier,
    settings: WebhookSettings,
    telemetry: Telemetry,
}

impl WebhookProcessor {
    /// Create a processor.
    #[must_use]
    pub fn new(kv: Arc<dyn KvStore>, settings: WebhookSettings, telemetry: Telemetry) -> Self {
        let verifier = SnsVerifier::new(
            Duration::from_secs(settings.cert_cache_ttl_secs),
            Duration::from_secs(settings.cert_http_timeout_secs),
        );
        Self {
            kv,
            verifier,
            settings,
            telemetry,
        }
    }

    /// Replay dedup via `SET NX EX`; returns true when the message is new.
    async fn check_replay(&self, provider: &str, message_id: &str) -> Result<bool> {
        let key = format!("webhook:{provider}:dedup:{message_id}");
        self.kv
            .set_nx_ex(
                &key,
                "1",
                Duration::from_secs(self.settings.dedup_ttl_secs.max(1)),
            )
            .await
    }

    /// Handle an SNS delivery for the S3 connector.
    ///
    /// # Errors
    ///
    /// `Error::Validation` → 400, `Error::Scope` → 403,
    /// `Error::Dependency` → 503. Duplicates return `Ok` with a
    /// `duplicate` status so the provider stops retrying.
    pub async fn handle_sns(&self, headers: &SnsHeaders, body: &[u8]) -> Result<WebhookOutcome> {
        let body: Value = serde_json::from_slice(body)
            .map_err(|e| Error::Validation(format!("invalid JSON: {e}")))?;
        let message_type = body.get("Type").and_then(Value::as_str).unwrap_or("");

        match message_type {
            "SubscriptionConfirmation" => {
                let Some(url) = body.get("SubscribeURL").and_then(Value::as_str) else {
                    return Err(Error::Validation("missing SubscribeURL".to_string()));
                };
                info!(url, "SNS subscription confirmation received");
                Ok(WebhookOutcome {
                    body: json!({ "status": "subscription_pending", "url": url }),
                })
            }
            "Notification" => self.handle_sns_notification(headers, &body).await,
            other => Err(Error::Validation(format!("unknown message type: {other}"))),
        }
    }

    async fn handle_sns_notification(
        &self,
        headers: &SnsHeaders,
        body: &Value,
    ) -> Result<WebhookOutcome> {
        if headers.signature_version != "1" {
            self.telemetry
                .counter_with(
                    "webhook_sig_version_invalid_total",
                    &[("version", headers.signature_version.as_str())],
                )
                .increment();
            return Err(Error::Validation(format!(
                "unsupported signature version: {}",
                headers.signature_version
            )));
        }

        if self.settings.verify_sns {
            match self
                .verifier
                .verify_message(
                    body,
                    &headers.signature,
                    &headers.cert_url,
                    &headers.signature_version,
                )
                .await
            {
                Ok(true) => {
                    self.telemetry
                        .counter_with("webhook_sns_verify_total", &[("result", "success")])
                        .increment();
                }
                Ok(false) => {
                    self.telemetry
                        .counter_with("webhook_sns_verify_total", &[("result", "failed")])
                        .increment();
                    return Err(Error::Scope("invalid signature".to_string()));
                }
                Err(e) => {
                    self.telemetry
                        .counter_with("webhook_sns_verify_total", &[("result", "timeout")])
                        .increment();
                    return Err(Error::Dependency(format!(
                        "signature verification unavailable: {e}"
                    )));
                }
            }
        } else {
            warn!("SNS signature verification disabled - development mode only");
            self.telemetry
                .counter_with("webhook_sns_verify_total", &[("result", "disabled")])
                .increment();
        }

        // Replay protection; duplicates get 200 to stop provider retries
        let message_id = body.get("MessageId").and_then(Value::as_str).unwrap_or("");
        if message_id.is_empty() || !self.check_replay("sns", message_id).await? {
            warn!(message_id, "replay detected");
            self.telemetry.counter("webhook_replay_total").increment();
            return Ok(WebhookOutcome {
                body: json!({ "status": "duplicate" }),
            });
        }

        let topic_arn = body.get("TopicArn").and_then(Value::as_str).unwrap_or("");
        let tenant_id = tenant_from_topic(topic_arn, "s3");

        let patterns = topic_allowlist(&self.settings.topic_allowlist_json, &tenant_id);
        if !validate_topic_arn(topic_arn, &patterns) {
            self.telemetry
                .counter_with("webhook_topic_rejected_total", &[("tenant", tenant_id.as_str())])
                .increment();
            return Err(Error::Scope("TopicArn not allowed for tenant".to_string()));
        }

        let records = body
            .get("Message")
            .and_then(Value::as_str)
            .and_then(|m| serde_json::from_str::<Value>(m).ok())
            .and_then(|m| m.get("Records").cloned())
            .and_then(|r| r.as_array().cloned())
            .ok_or_else(|| Error::Validation("invalid S3 event format".to_string()))?;

        let mut queued = 0u64;
        for record in &records {
            let event_name = record.get("eventName").and_then(Value::as_str).unwrap_or("");
            let s3 = record.get("s3").cloned().unwrap_or_else(|| json!({}));
            let bucket = s3
                .pointer("/bucket/name")
                .and_then(Value::as_str)
                .unwrap_or("");
            let Some(key) = s3.pointer("/object/key").and_then(Value::as_str) else {
                continue;
            };
            if bucket.is_empty() {
                continue;
            }
            let key = unquote_plus(key);

            let operation = if event_name.starts_with("ObjectRemoved") {
                ChangeOperation::Deleted
            } else {
                ChangeOperation::Upsert
            };
            let item = ChangeItem {
                uri: format!("s3://{bucket}/{key}"),
                operation,
                etag: s3
                    .pointer("/object/eTag")
                    .and_then(Value::as_str)
                    .map(String::from),
                modified_at: Some(Utc::now()),
                tenant_id: tenant_id.clone(),
            };
            enqueue_change(&self.kv, "s3", &item).await?;
            queued += 1;
        }

        Ok(WebhookOutcome {
            body: json!({ "status": "queued", "count": queued, "tenant_id": tenant_id }),
        })
    }

    /// Handle a GCS Pub/Sub push delivery.
    pub async fn handle_gcs(
        &self,
        token_header: Option<&str>,
        topic_header: Option<&str>,
        body: &[u8],
    ) -> Result<WebhookOutcome> {
        if let Some(secret) = &self.settings.gcs_shared_secret {
            if !super::verify_shared_secret(secret, token_header) {
                self.telemetry
                    .counter_with("webhook_gcs_verify_total", &[("result", "failed")])
                    .increment();
                return Err(Error::Scope("invalid pub/sub token".to_string()));
            }
            self.telemetry
                .counter_with("webhook_gcs_verify_total", &[("result", "success")])
                .increment();
        } else {
            warn!("GCS shared-secret verification disabled - development mode only");
            self.telemetry
                .counter_with("webhook_gcs_verify_total", &[("result", "disabled")])
                .increment();
        }

        let envelope: Value = serde_json::from_slice(body)
            .map_err(|e| Error::Validation(format!("invalid JSON: {e}")))?;
        let message = envelope
            .get("message")
            .cloned()
            .ok_or_else(|| Error::Validation("missing message".to_string()))?;

        let message_id = message.get("messageId").and_then(Value::as_str).unwrap_or("");
        if message_id.is_empty() || !self.check_replay("gcs", message_id).await? {
            self.telemetry.counter("webhook_replay_total").increment();
            return Ok(WebhookOutcome {
                body: json!({ "status": "duplicate" }),
            });
        }

        let attributes = message
            .get("attributes")
            .cloned()
            .unwrap_or_else(|| json!({}));
        let bucket = attributes
            .get("bucketId")
            .and_then(Value::as_str)
            .map(String::from)
            .or_else(|| {
                // Fall back to the base64 data payload
                message
                    .get("data")
                    .and_then(Value::as_str)
                    .and_then(|d| BASE64.decode(d).ok())
                    .and_then(|d| serde_json::from_slice::<Value>(&d).ok())
                    .and_then(|d| d.get("bucket").and_then(Value::as_str).map(String::from))
            })
            .ok_or_else(|| Error::Validation("missing bucketId".to_string()))?;
        let object = attributes
            .get("objectId")
            .and_then(Value::as_str)
            .ok_or_else(|| Error::Validation("missing objectId".to_string()))?;
        let event_type = attributes
            .get("eventType")
            .and_then(Value::as_str)
            .unwrap_or("OBJECT_FINALIZE");

        let tenant_id = topic_header
            .map(|topic| tenant_from_topic(topic, "gcs"))
            .unwrap_or_else(|| "default".to_string());

        let operation = if event_type == "OBJECT_DELETE" {
            ChangeOperation::Deleted
        } else {
            ChangeOperation::Upsert
        };
        let item = ChangeItem {
            uri: format!("gs://{bucket}/{object}"),
            operation,
            etag: None,
            modified_at: Some(Utc::now()),
            tenant_id: tenant_id.clone(),
        };
        enqueue_change(&self.kv, "gcs", &item).await?;

        Ok(WebhookOutcome {
            body: json!({ "status": "queued", "count": 1, "tenant_id": tenant_id }),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use activekg_core::kv::MemoryKv;

    fn processor(verify_sns: bool, gcs_secret: Option<&str>) -> (WebhookProcessor, Arc<dyn KvStore>) {
        let kv: Arc<dyn KvStore> = Arc::new(MemoryKv::new());
        let settings = WebhookSettings {
            verify_sns,
            topic_allowlist_json:
                r#"{"tenant1": ["arn:aws:sns:*:*:activekg-s3-tenant1"]}"#.to_string(),
            gcs_shared_secret: gcs_secret.map(String::from),
            ..WebhookSettings::default()
        };
        (
            WebhookProcessor::new(Arc::clone(&kv), settings, Telemetry::new()),
            kv,
        )
    }

    fn sns_notification(message_id: &str) -> Vec<u8> {
        let records = json!({
            "Records": [{
                "eventName": "ObjectCreated:Put",
                "s3": {
                    "bucket": { "name": "my-bucket" },
                    "object": { "key": "docs/doc+name%20here.pdf", "eTag": "abc123" }
                }
            }]
        });
        json!({
            "Type": "Notification",
            "MessageId": message_id,
            "TopicArn": "arn:aws:sns:us-east-1:123:activekg-s3-tenant1",
            "Timestamp": "2026-01-01T00:00:00.000Z",
            "Message": records.to_string(),
        })
        .to_string()
        .into_bytes()
    }

    fn headers() -> SnsHeaders {
        SnsHeaders {
            signature: String::new(),
            cert_url: String::new(),
            signature_version: "1".to_string(),
        }
    }

    #[tokio::test]
    async fn sns_notification_queues_and_dedups() {
        let (processor, kv) = processor(false, None);
        let body = sns_notification("mid-1");

        let outcome = processor.handle_sns(&headers(), &body).await.unwrap();
        assert_eq!(outcome.body["status"], "queued");
        assert_eq!(outcome.body["count"], 1);
        assert_eq!(outcome.body["tenant_id"], "tenant1");
        assert_eq!(kv.llen("connector:s3:tenant1:queue").await.unwrap(), 1);

        // Replay with the same MessageId enqueues nothing
        let replay = processor.handle_sns(&headers(), &body).await.unwrap();
        assert_eq!(replay.body["status"], "duplicate");
        assert_eq!(kv.llen("connector:s3:tenant1:queue").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn sns_object_keys_are_url_decoded() {
        let (processor, kv) = processor(false, None);
        processor
            .handle_sns(&headers(), &sns_notification("mid-2"))
            .await
            .unwrap();
        let (_, raw) = kv
            .brpop(
                &["connector:s3:tenant1:queue".to_string()],
                Duration::from_millis(50),
            )
            .await
            .unwrap()
            .unwrap();
        let item: ChangeItem = serde_json::from_str(&raw).unwrap();
        assert_eq!(item.uri, "s3://my-bucket/docs/doc name here.pdf");
        assert_eq!(item.etag.as_deref(), Some("abc123"));
    }

    #[tokio::test]
    async fn sns_disallowed_topic_is_rejected() {
        let kv: Arc<dyn KvStore> = Arc::new(MemoryKv::new());
        let settings = WebhookSettings {
            verify_sns: false,
            // Only us-west-2 topics are allowed for tenant1
            topic_allowlist_json:
                r#"{"tenant1": ["arn:aws:sns:us-west-2:*:activekg-s3-tenant1"]}"#.to_string(),
            ..WebhookSettings::default()
        };
        let processor = WebhookProcessor::new(kv, settings, Telemetry::new());

        let body = json!({
            "Type": "Notification",
            "MessageId": "mid-3",
            "TopicArn": "arn:aws:sns:us-east-1:123:activekg-s3-tenant1",
            "Message": json!({"Records": []}).to_string(),
        })
        .to_string()
        .into_bytes();

        let err = processor.handle_sns(&headers(), &body).await.unwrap_err();
        assert!(matches!(err, Error::Scope(_)));
    }

    #[tokio::test]
    async fn sns_bad_signature_version_is_validation_error() {
        let (processor, _) = processor(false, None);
        let mut h = headers();
        h.signature_version = "2".to_string();
        let err = processor
            .handle_sns(&h, &sns_notification("mid-5"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }

    #[tokio::test]
    async fn subscription_confirmation_is_acknowledged_without_enqueue() {
        let (processor, kv) = processor(false, None);
        let body = json!({
            "Type": "SubscriptionConfirmation",
            "MessageId": "mid-6",
            "SubscribeURL": "https://sns.example/confirm",
        })
        .to_string()
        .into_bytes();
        let outcome = processor.handle_sns(&headers(), &body).await.unwrap();
        assert_eq!(outcome.body["status"], "subscription_pending");
        assert_eq!(kv.llen("connector:s3:tenant1:queue").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn gcs_push_verifies_secret_and_queues() {
        let (processor, kv) = processor(false, Some("test-secret"));
        let payload = json!({ "name": "docs/sample.pdf", "bucket": "test-bucket" });
        let body = json!({
            "message": {
                "messageId": "msg-123",
                "data": BASE64.encode(payload.to_string()),
                "attributes": {
                    "bucketId": "test-bucket",
                    "objectId": "docs/sample.pdf",
                    "eventType": "OBJECT_FINALIZE",
                },
            },
            "subscription": "projects/proj/subscriptions/sub",
        })
        .to_string()
        .into_bytes();

        let err = processor.handle_gcs(Some("wrong"), None, &body).await.unwrap_err();
        assert!(matches!(err, Error::Scope(_)));

        let outcome = processor
            .handle_gcs(
                Some("test-secret"),
                Some("projects/proj/topics/activekg-gcs-default"),
                &body,
            )
            .await
            .unwrap();
        assert_eq!(outcome.body["status"], "queued");
        assert_eq!(outcome.body["tenant_id"], "default");
        assert_eq!(kv.llen("connector:gcs:default:queue").await.unwrap(), 1);
    }
}
