//! Webhook ingress: verification, allowlists, replay dedup, and enqueue.

mod gcs;
pub mod ingress;
mod sns;

pub use gcs::verify_shared_secret;
pub use ingress::{SnsHeaders, WebhookOutcome, WebhookProcessor};
pub use sns::{build_canonical_string, validate_cert_url, SnsVerifier};

use serde_json::Value;
use tracing::error;

/// Topic allowlist for a tenant from the `WEBHOOK_TOPIC_ALLOWLIST` JSON
/// object (`tenant -> [patterns]`, with a `default` fallback entry).
///
/// An empty result means allow-all (permissive dev mode).
#[must_use]
pub fn topic_allowlist(allowlist_json: &str, tenant_id: &str) -> Vec<String> {
    let parsed: Value = match serde_json::from_str(allowlist_json) {
        Ok(v) => v,
        Err(e) => {
            error!(error = %e, "failed to parse WEBHOOK_TOPIC_ALLOWLIST");
            return Vec::new();
        }
    };
    let list = parsed
        .get(tenant_id)
        .or_else(|| parsed.get("default"))
        .and_then(Value::as_array);
    list.map(|patterns| {
        patterns
            .iter()
            .filter_map(Value::as_str)
            .map(String::from)
            .collect()
    })
    .unwrap_or_default()
}

/// Validate a TopicArn against allowlist patterns with `*` segment
/// wildcards (`arn:aws:sns:*:*:activekg-s3-tenant1`).
#[must_use]
pub fn validate_topic_arn(topic_arn: &str, patterns: &[String]) -> bool {
    if patterns.is_empty() {
        return true;
    }
    let arn_parts: Vec<&str> = topic_arn.split(':').collect();
    patterns.iter().any(|pattern| {
        if pattern == topic_arn {
            return true;
        }
        let pattern_parts: Vec<&str> = pattern.split(':').collect();
        pattern_parts.len() == arn_parts.len()
            && pattern_parts
                .iter()
                .zip(&arn_parts)
                .all(|(p, a)| *p == "*" || p == a)
    })
}

/// Extract the tenant from a topic name by the
/// `…activekg-{provider}-{tenant}` convention; `"default"` otherwise.
#[must_use]
pub fn tenant_from_topic(topic: &str, provider: &str) -> String {
    let marker = format!("activekg-{provider}-");
    topic
        .rfind(&marker)
        .map(|idx| topic[idx + marker.len()..].to_string())
        .filter(|t| !t.is_empty())
        .unwrap_or_else(|| "default".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allowlist_falls_back_to_default_entry() {
        let json = r#"{"tenant1": ["arn:aws:sns:*:*:activekg-s3-tenant1"], "default": ["arn:aws:sns:*:*:activekg-*"]}"#;
        assert_eq!(
            topic_allowlist(json, "tenant1"),
            vec!["arn:aws:sns:*:*:activekg-s3-tenant1"]
        );
        assert_eq!(
            topic_allowlist(json, "unknown"),
            vec!["arn:aws:sns:*:*:activekg-*"]
        );
        assert!(topic_allowlist("not json", "tenant1").is_empty());
        assert!(topic_allowlist("{}", "tenant1").is_empty());
    }

    #[test]
    fn wildcard_segments_match() {
        let patterns = vec!["arn:aws:sns:*:*:activekg-s3-tenant1".to_string()];
        assert!(validate_topic_arn(
            "arn:aws:sns:us-east-1:123:activekg-s3-tenant1",
            &patterns
        ));
        assert!(!validate_topic_arn(
            "arn:aws:sns:us-east-1:123:activekg-s3-tenant2",
            &patterns
        ));
        // Different segment counts never match
        assert!(!validate_topic_arn("arn:aws:sns:activekg-s3-tenant1", &patterns));
        // Empty allowlist is permissive
        assert!(validate_topic_arn("arn:anything", &[]));
    }

    #[test]
    fn tenant_extraction_follows_naming_convention() {
        assert_eq!(
            tenant_from_topic("arn:aws:sns:us-east-1:123:activekg-s3-tenant1", "s3"),
            "tenant1"
        );
        assert_eq!(
            tenant_from_topic("projects/proj/topics/activekg-gcs-default", "gcs"),
            "default"
        );
        assert_eq!(tenant_from_topic("arn:aws:sns:us-east-1:123:other", "s3"), "default");
    }
}
