//! SNS message signature verification with certificate validation.
//!
//! Security properties:
//! - Certificate URL validation (HTTPS, `*.amazonaws.com`,
//!   `SimpleNotificationService` in the path)
//! - Certificate caching with TTL
//! - RSA-SHA1 (PKCS#1 v1.5) verification over the canonical string per the
//!   SNS spec
//!
//! Reference:
//! <https://docs.aws.amazon.com/sns/latest/dg/sns-verify-signature-of-message.html>

use std::collections::HashMap;
use std::time::{Duration, Instant};

use activekg_core::{Error, Result};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use parking_lot::Mutex;
use rsa::pkcs1::DecodeRsaPublicKey;
use rsa::pkcs1v15::Pkcs1v15Sign;
use rsa::RsaPublicKey;
use serde_json::Value;
use sha1::{Digest, Sha1};
use tracing::{debug, error, info};
use url::Url;

/// Validate that a certificate URL belongs to AWS SNS.
#[must_use]
pub fn validate_cert_url(cert_url: &str) -> bool {
    let Ok(parsed) = Url::parse(cert_url) else {
        error!(cert_url, "failed to parse certificate URL");
        return false;
    };
    if parsed.scheme() != "https" {
        error!(cert_url, "certificate URL not HTTPS");
        return false;
    }
    let Some(host) = parsed.host_str() else {
        return false;
    };
    if !host.ends_with(".amazonaws.com") {
        error!(cert_url, "certificate URL not from amazonaws.com");
        return false;
    }
    if !parsed.path().contains("SimpleNotificationService") {
        error!(cert_url, "certificate URL path invalid");
        return false;
    }
    true
}

/// Build the canonical string for signature verification.
///
/// Field order follows the SNS spec per message type; absent fields are
/// skipped. Each present field contributes `"Name\nValue\n"`.
#[must_use]
pub fn build_canonical_string(message: &Value, message_type: &str) -> String {
    let fields: &[&str] = match message_type {
        "Notification" => &["Message", "MessageId", "Subject", "Timestamp", "TopicArn", "Type"],
        "SubscriptionConfirmation" | "UnsubscribeConfirmation" => &[
            "Message",
            "MessageId",
            "SubscribeURL",
            "Timestamp",
            "Token",
            "TopicArn",
            "Type",
        ],
        _ => &["Message", "MessageId", "Timestamp", "TopicArn", "Type"],
    };

    let mut canonical = String::new();
    for field in fields {
        if let Some(value) = message.get(field).and_then(Value::as_str) {
            canonical.push_str(field);
            canonical.push('\n');
            canonical.push_str(value);
            canonical.push('\n');
        }
    }
    canonical
}

/// Verifies SNS message signatures, caching fetched certificates.
pub struct SnsVerifier {
    client: reqwest::Client,
    cache: Mutex<HashMap<String, (RsaPublicKey, Instant)>>,
    cache_ttl: Duration,
}

impl SnsVerifier {
    /// Create a verifier with the given certificate cache TTL and fetch
    /// timeout.
    #[must_use]
    pub fn new(cache_ttl: Duration, http_timeout: Duration) -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(http_timeout)
                .build()
                .unwrap_or_else(|_| reqwest::Client::new()),
            cache: Mutex::new(HashMap::new()),
            cache_ttl,
        }
    }

    /// Drop all cached certificates (testing or forced refresh).
    pub fn clear_cache(&self) {
        self.cache.lock().clear();
    }

    async fn fetch_public_key(&self, cert_url: &str) -> Result<RsaPublicKey> {
        if let Some((key, expiry)) = self.cache.lock().get(cert_url) {
            if Instant::now() < *expiry {
                debug!(cert_url, "certificate cache hit");
                return Ok(key.clone());
            }
        }

        info!(cert_url, "fetching SNS certificate");
        let resp = self
            .client
            .get(cert_url)
            .send()
            .await
            .map_err(|e| Error::Dependency(format!("certificate fetch failed: {e}")))?;
        if !resp.status().is_success() {
            return Err(Error::Dependency(format!(
                "certificate fetch returned {}",
                resp.status()
            )));
        }
        let pem_bytes = resp
            .bytes()
            .await
            .map_err(|e| Error::Dependency(format!("certificate body failed: {e}")))?;

        let (_, pem) = x509_parser::pem::parse_x509_pem(&pem_bytes)
            .map_err(|e| Error::Validation(format!("certificate PEM invalid: {e}")))?;
        let cert = pem
            .parse_x509()
            .map_err(|e| Error::Validation(format!("certificate parse failed: {e}")))?;
        let spki = cert.public_key();
        let key = RsaPublicKey::from_pkcs1_der(&spki.subject_public_key.data)
            .map_err(|e| Error::Validation(format!("certificate key invalid: {e}")))?;

        self.cache.lock().insert(
            cert_url.to_string(),
            (key.clone(), Instant::now() + self.cache_ttl),
        );
        Ok(key)
    }

    /// Verify an SNS message signature.
    ///
    /// Returns `Ok(false)` for an invalid signature or disallowed
    /// certificate URL; `Err` only for infrastructure failures (certificate
    /// unreachable), which callers surface as 503 rather than 403.
    pub async fn verify_message(
        &self,
        message: &Value,
        signature_b64: &str,
        cert_url: &str,
        signature_version: &str,
    ) -> Result<bool> {
        if signature_version != "1" {
            error!(signature_version, "unsupported signature version");
            return Ok(false);
        }
        if !validate_cert_url(cert_url) {
            return Ok(false);
        }

        let Ok(signature) = BASE64.decode(signature_b64) else {
            error!("failed to decode signature");
            return Ok(false);
        };

        let key = self.fetch_public_key(cert_url).await?;
        let message_type = message
            .get("Type")
            .and_then(Value::as_str)
            .unwrap_or("Notification");
        let canonical = build_canonical_string(message, message_type);
        let digest = Sha1::digest(canonical.as_bytes());

        match key.verify(Pkcs1v15Sign::new::<Sha1>(), &digest, &signature) {
            Ok(()) => {
                info!("SNS signature verified");
                Ok(true)
            }
            Err(_) => {
                error!("SNS signature verification failed: invalid signature");
                Ok(false)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn cert_url_validation_rules() {
        assert!(validate_cert_url(
            "https://sns.us-east-1.amazonaws.com/SimpleNotificationService-abc.pem"
        ));
        // Not HTTPS
        assert!(!validate_cert_url(
            "http://sns.us-east-1.amazonaws.com/SimpleNotificationService-abc.pem"
        ));
        // Not amazonaws.com
        assert!(!validate_cert_url(
            "https://evil.example.com/SimpleNotificationService-abc.pem"
        ));
        // Suffix spoof
        assert!(!validate_cert_url(
            "https://fakeamazonaws.com/SimpleNotificationService-abc.pem"
        ));
        // Wrong path
        assert!(!validate_cert_url("https://sns.us-east-1.amazonaws.com/other.pem"));
    }

    #[test]
    fn canonical_string_for_notification() {
        let msg = json!({
            "Type": "Notification",
            "MessageId": "mid-1",
            "TopicArn": "arn:aws:sns:us-east-1:123:topic",
            "Message": "hello",
            "Timestamp": "2026-01-01T00:00:00.000Z",
        });
        let canonical = build_canonical_string(&msg, "Notification");
        assert_eq!(
            canonical,
            "Message\nhello\nMessageId\nmid-1\nTimestamp\n2026-01-01T00:00:00.000Z\n\
             TopicArn\narn:aws:sns:us-east-1:123:topic\nType\nNotification\n"
        );
    }

    #[test]
    fn canonical_string_includes_subject_when_present() {
        let base = json!({
            "Type": "Notification",
            "MessageId": "m",
            "TopicArn": "t",
            "Message": "x",
            "Timestamp": "ts",
        });
        let without = build_canonical_string(&base, "Notification");
        let mut with_subject = base.clone();
        with_subject["Subject"] = json!("S");
        let with = build_canonical_string(&with_subject, "Notification");
        assert!(!without.contains("Subject"));
        assert!(with.contains("Subject\nS\n"));
    }

    #[test]
    fn subscription_confirmation_uses_token_fields() {
        let msg = json!({
            "Type": "SubscriptionConfirmation",
            "MessageId": "m",
            "TopicArn": "t",
            "Message": "x",
            "Timestamp": "ts",
            "Token": "tok",
            "SubscribeURL": "https://example",
        });
        let canonical = build_canonical_string(&msg, "SubscriptionConfirmation");
        assert!(canonical.contains("Token\ntok\n"));
        assert!(canonical.contains("SubscribeURL\nhttps://example\n"));
    }

    #[tokio::test]
    async fn unsupported_signature_version_is_rejected() {
        let verifier = SnsVerifier::new(Duration::from_secs(60), Duration::from_secs(1));
        let ok = verifier
            .verify_message(&json!({}), "c2ln", "https://x.amazonaws.com/SimpleNotificationService-a.pem", "2")
            .await
            .unwrap();
        assert!(!ok);
    }
}
