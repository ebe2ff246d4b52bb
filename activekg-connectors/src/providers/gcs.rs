//! GCS connector adapter (JSON API).

use activekg_core::constants::DEFAULT_MAX_INPUT_CHARS;
use activekg_core::{Error, Result};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::connector::{classify_http_error, classify_status, Connector};
use crate::extraction::extract_text;
use crate::schemas::GcsConnectorConfig;
use crate::types::{ChangeItem, ChangeOperation, ConnectorStats, FetchResult};

const API_BASE: &str = "https://storage.googleapis.com/storage/v1";

/// GCS connector over the JSON API.
pub struct GcsConnector {
    tenant_id: String,
    config: GcsConnectorConfig,
    client: reqwest::Client,
}

#[derive(Deserialize)]
struct GcsObject {
    name: String,
    #[serde(default)]
    etag: Option<String>,
    #[serde(default)]
    generation: Option<String>,
    #[serde(default)]
    updated: Option<chrono::DateTime<chrono::Utc>>,
    #[serde(default)]
    size: Option<String>,
    #[serde(rename = "contentType", default)]
    content_type: Option<String>,
}

#[derive(Deserialize)]
struct GcsListResponse {
    #[serde(default)]
    items: Vec<GcsObject>,
    #[serde(rename = "nextPageToken", default)]
    next_page_token: Option<String>,
}

fn percent_encode(name: &str) -> String {
    // Object names go into the path as a single URL-encoded segment
    let mut out = String::with_capacity(name.len() * 3 / 2);
    for byte in name.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                out.push(byte as char);
            }
            _ => out.push_str(&format!("%{byte:02X}")),
        }
    }
    out
}

impl GcsConnector {
    /// Build from a decrypted raw config.
    pub fn new(tenant_id: &str, config: &Value) -> Result<Self> {
        Ok(Self {
            tenant_id: tenant_id.to_string(),
            config: GcsConnectorConfig::parse(config)?,
            client: super::http_client(),
        })
    }

    fn authorized(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        if self.config.credentials.is_empty() {
            req
        } else {
            req.bearer_auth(&self.config.credentials)
        }
    }

    fn object_from_uri<'a>(&self, uri: &'a str) -> Result<&'a str> {
        let rest = uri
            .strip_prefix("gs://")
            .ok_or_else(|| Error::PermanentConnector(format!("not a gcs uri: {uri}")))?;
        let (bucket, object) = rest
            .split_once('/')
            .ok_or_else(|| Error::PermanentConnector(format!("gcs uri missing object: {uri}")))?;
        if bucket != self.config.bucket {
            return Err(Error::PermanentConnector(format!(
                "uri bucket {bucket} does not match configured bucket {}",
                self.config.bucket
            )));
        }
        Ok(object)
    }
}

#[async_trait]
impl Connector for GcsConnector {
    async fn stat(&self, uri: &str) -> Result<ConnectorStats> {
        let object = self.object_from_uri(uri)?;
        let url = format!(
            "{API_BASE}/b/{}/o/{}",
            self.config.bucket,
            percent_encode(object)
        );
        let resp = self
            .authorized(self.client.get(&url))
            .send()
            .await
            .map_err(|e| classify_http_error("gcs stat", &e))?;

        if resp.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(ConnectorStats::default());
        }
        if !resp.status().is_success() {
            return Err(classify_status("gcs stat", resp.status()));
        }

        let object: GcsObject = resp
            .json()
            .await
            .map_err(|e| classify_http_error("gcs stat body", &e))?;
        Ok(ConnectorStats {
            exists: true,
            etag: object.etag,
            generation: object.generation,
            modified_at: object.updated,
            size: object.size.and_then(|s| s.parse().ok()),
            content_type: object.content_type,
            owner: None,
        })
    }

    async fn fetch_text(&self, uri: &str) -> Result<FetchResult> {
        let object = self.object_from_uri(uri)?;
        let url = format!(
            "{API_BASE}/b/{}/o/{}?alt=media",
            self.config.bucket,
            percent_encode(object)
        );
        let resp = self
            .authorized(self.client.get(&url))
            .send()
            .await
            .map_err(|e| classify_http_error("gcs fetch", &e))?;
        if !resp.status().is_success() {
            return Err(classify_status("gcs fetch", resp.status()));
        }

        let content_type = resp
            .headers()
            .get("content-type")
            .and_then(|v| v.to_str().ok())
            .map(String::from);
        let bytes = resp
            .bytes()
            .await
            .map_err(|e| classify_http_error("gcs body", &e))?;

        let (text, title) = extract_text(&bytes, content_type.as_deref(), DEFAULT_MAX_INPUT_CHARS)?;
        let title = title.or_else(|| object.rsplit('/').next().map(String::from));
        Ok(FetchResult {
            text,
            title,
            metadata: json!({
                "source_uri": uri,
                "content_type": content_type,
            }),
        })
    }

    async fn list_changes(
        &self,
        cursor: Option<&Value>,
    ) -> Result<(Vec<ChangeItem>, Option<Value>)> {
        let mut url = format!(
            "{API_BASE}/b/{}/o?prefix={}",
            self.config.bucket, self.config.prefix
        );
        if let Some(token) = cursor.and_then(|c| c.get("page_token")).and_then(Value::as_str) {
            url.push_str(&format!("&pageToken={token}"));
        }

        let resp = self
            .authorized(self.client.get(&url))
            .send()
            .await
            .map_err(|e| classify_http_error("gcs list", &e))?;
        if !resp.status().is_success() {
            return Err(classify_status("gcs list", resp.status()));
        }
        let listing: GcsListResponse = resp
            .json()
            .await
            .map_err(|e| classify_http_error("gcs list body", &e))?;

        let changes = listing
            .items
            .into_iter()
            .map(|object| ChangeItem {
                uri: format!("gs://{}/{}", self.config.bucket, object.name),
                operation: ChangeOperation::Upsert,
                etag: object.etag,
                modified_at: object.updated,
                tenant_id: self.tenant_id.clone(),
            })
            .collect();
        let next = listing
            .next_page_token
            .map(|token| json!({ "page_token": token }));
        Ok((changes, next))
    }

    fn provider(&self) -> &str {
        "gcs"
    }

    fn tenant_id(&self) -> &str {
        &self.tenant_id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn object_names_are_percent_encoded() {
        assert_eq!(percent_encode("a/b c.txt"), "a%2Fb%20c.txt");
        assert_eq!(percent_encode("plain-name_1.txt"), "plain-name_1.txt");
    }

    #[test]
    fn uri_parsing_checks_bucket() {
        let c = GcsConnector::new("t1", &json!({ "bucket": "data" })).unwrap();
        assert_eq!(c.object_from_uri("gs://data/dir/file.txt").unwrap(), "dir/file.txt");
        assert!(c.object_from_uri("gs://other/file.txt").is_err());
        assert!(c.object_from_uri("s3://data/file.txt").is_err());
    }
}
