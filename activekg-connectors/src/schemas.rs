//! Strict per-provider configuration schemas.
//!
//! The config store persists raw JSON, but connector construction always
//! goes through these typed schemas so malformed configs fail loudly at the
//! boundary instead of deep inside a fetch.

use activekg_core::{Error, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Configuration for the S3 connector.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct S3ConnectorConfig {
    pub bucket: String,
    #[serde(default)]
    pub prefix: String,
    #[serde(default = "default_region")]
    pub region: String,
    #[serde(default)]
    pub access_key_id: String,
    #[serde(default)]
    pub secret_access_key: String,
    #[serde(default = "default_poll_interval")]
    pub poll_interval_seconds: u64,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

/// Configuration for the GCS connector.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GcsConnectorConfig {
    pub bucket: String,
    #[serde(default)]
    pub prefix: String,
    /// OAuth bearer token or service-account derived credential
    #[serde(default)]
    pub credentials: String,
    #[serde(default = "default_poll_interval")]
    pub poll_interval_seconds: u64,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

/// Configuration for the Google Drive connector.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DriveConnectorConfig {
    /// Drive folder watched for changes
    pub folder_id: String,
    #[serde(default)]
    pub credentials: String,
    #[serde(default = "default_poll_interval")]
    pub poll_interval_seconds: u64,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

fn default_region() -> String {
    "us-east-1".to_string()
}

fn default_poll_interval() -> u64 {
    900
}

fn default_true() -> bool {
    true
}

fn check_poll_interval(seconds: u64) -> Result<()> {
    if !(60..=3600).contains(&seconds) {
        return Err(Error::Validation(format!(
            "poll_interval_seconds must be between 60 and 3600, got {seconds}"
        )));
    }
    Ok(())
}

impl S3ConnectorConfig {
    /// Parse and validate from raw JSON.
    pub fn parse(config: &Value) -> Result<Self> {
        let parsed: Self = serde_json::from_value(config.clone())
            .map_err(|e| Error::Validation(format!("invalid s3 config: {e}")))?;
        if parsed.bucket.trim().is_empty() {
            return Err(Error::Validation("s3 config requires a bucket".to_string()));
        }
        check_poll_interval(parsed.poll_interval_seconds)?;
        Ok(parsed)
    }
}

impl GcsConnectorConfig {
    /// Parse and validate from raw JSON.
    pub fn parse(config: &Value) -> Result<Self> {
        let parsed: Self = serde_json::from_value(config.clone())
            .map_err(|e| Error::Validation(format!("invalid gcs config: {e}")))?;
        if parsed.bucket.trim().is_empty() {
            return Err(Error::Validation("gcs config requires a bucket".to_string()));
        }
        check_poll_interval(parsed.poll_interval_seconds)?;
        Ok(parsed)
    }
}

impl DriveConnectorConfig {
    /// Parse and validate from raw JSON.
    pub fn parse(config: &Value) -> Result<Self> {
        let parsed: Self = serde_json::from_value(config.clone())
            .map_err(|e| Error::Validation(format!("invalid drive config: {e}")))?;
        if parsed.folder_id.trim().is_empty() {
            return Err(Error::Validation(
                "drive config requires a folder_id".to_string(),
            ));
        }
        check_poll_interval(parsed.poll_interval_seconds)?;
        Ok(parsed)
    }
}

/// Validate a raw config for a provider without constructing a connector.
pub fn validate_config(provider: &str, config: &Value) -> Result<()> {
    match provider {
        "s3" => S3ConnectorConfig::parse(config).map(|_| ()),
        "gcs" => GcsConnectorConfig::parse(config).map(|_| ()),
        "drive" => DriveConnectorConfig::parse(config).map(|_| ()),
        other => Err(Error::Validation(format!("unknown provider: {other}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn s3_config_parses_with_defaults() {
        let cfg = S3ConnectorConfig::parse(&json!({ "bucket": "my-bucket" })).unwrap();
        assert_eq!(cfg.region, "us-east-1");
        assert_eq!(cfg.poll_interval_seconds, 900);
        assert!(cfg.enabled);
    }

    #[test]
    fn s3_config_rejects_missing_bucket() {
        assert!(S3ConnectorConfig::parse(&json!({ "bucket": " " })).is_err());
        assert!(S3ConnectorConfig::parse(&json!({})).is_err());
    }

    #[test]
    fn poll_interval_bounds_are_enforced() {
        let err = S3ConnectorConfig::parse(&json!({
            "bucket": "b",
            "poll_interval_seconds": 10
        }))
        .unwrap_err();
        assert!(err.to_string().contains("poll_interval_seconds"));
    }

    #[test]
    fn unknown_provider_is_rejected() {
        assert!(validate_config("ftp", &json!({})).is_err());
        assert!(validate_config("drive", &json!({ "folder_id": "abc" })).is_ok());
    }
}
