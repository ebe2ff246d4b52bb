//! S3 connector adapter (REST, virtual-hosted style).

use std::sync::OnceLock;

use activekg_core::constants::DEFAULT_MAX_INPUT_CHARS;
use activekg_core::{Error, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use regex::Regex;
use serde_json::{json, Value};

use crate::connector::{classify_http_error, classify_status, Connector};
use crate::extraction::extract_text;
use crate::schemas::S3ConnectorConfig;
use crate::types::{ChangeItem, ChangeOperation, ConnectorStats, FetchResult};

/// S3 connector over the plain REST API.
pub struct S3Connector {
    tenant_id: String,
    config: S3ConnectorConfig,
    client: reqwest::Client,
}

fn xml_field(body: &str, field: &str) -> Vec<String> {
    // ListObjectsV2 responses are flat enough for field extraction
    let re = Regex::new(&format!("<{field}>([^<]*)</{field}>")).expect("static pattern");
    re.captures_iter(body).map(|c| c[1].to_string()).collect()
}

fn contents_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?s)<Contents>(.*?)</Contents>").expect("static pattern"))
}

impl S3Connector {
    /// Build from a decrypted raw config.
    pub fn new(tenant_id: &str, config: &Value) -> Result<Self> {
        Ok(Self {
            tenant_id: tenant_id.to_string(),
            config: S3ConnectorConfig::parse(config)?,
            client: super::http_client(),
        })
    }

    fn object_url(&self, key: &str) -> String {
        format!(
            "https://{}.s3.{}.amazonaws.com/{}",
            self.config.bucket, self.config.region, key
        )
    }

    fn key_from_uri<'a>(&self, uri: &'a str) -> Result<&'a str> {
        let rest = uri
            .strip_prefix("s3://")
            .ok_or_else(|| Error::PermanentConnector(format!("not an s3 uri: {uri}")))?;
        let (bucket, key) = rest
            .split_once('/')
            .ok_or_else(|| Error::PermanentConnector(format!("s3 uri missing key: {uri}")))?;
        if bucket != self.config.bucket {
            return Err(Error::PermanentConnector(format!(
                "uri bucket {bucket} does not match configured bucket {}",
                self.config.bucket
            )));
        }
        Ok(key)
    }
}

#[async_trait]
impl Connector for S3Connector {
    async fn stat(&self, uri: &str) -> Result<ConnectorStats> {
        let key = self.key_from_uri(uri)?;
        let resp = self
            .client
            .head(self.object_url(key))
            .send()
            .await
            .map_err(|e| classify_http_error("s3 stat", &e))?;

        if resp.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(ConnectorStats::default());
        }
        if !resp.status().is_success() {
            return Err(classify_status("s3 stat", resp.status()));
        }

        let headers = resp.headers();
        let header = |name: &str| {
            headers
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(String::from)
        };
        Ok(ConnectorStats {
            exists: true,
            etag: header("etag").map(|e| e.trim_matches('"').to_string()),
            generation: None,
            modified_at: header("last-modified")
                .and_then(|v| DateTime::parse_from_rfc2822(&v).ok())
                .map(|dt| dt.with_timezone(&Utc)),
            size: header("content-length").and_then(|v| v.parse().ok()),
            content_type: header("content-type"),
            owner: None,
        })
    }

    async fn fetch_text(&self, uri: &str) -> Result<FetchResult> {
        let key = self.key_from_uri(uri)?;
        let resp = self
            .client
            .get(self.object_url(key))
            .send()
            .await
            .map_err(|e| classify_http_error("s3 fetch", &e))?;
        if !resp.status().is_success() {
            return Err(classify_status("s3 fetch", resp.status()));
        }

        let content_type = resp
            .headers()
            .get("content-type")
            .and_then(|v| v.to_str().ok())
            .map(String::from);
        let etag = resp
            .headers()
            .get("etag")
            .and_then(|v| v.to_str().ok())
            .map(|e| e.trim_matches('"').to_string());
        let bytes = resp
            .bytes()
            .await
            .map_err(|e| classify_http_error("s3 body", &e))?;

        let (text, title) = extract_text(&bytes, content_type.as_deref(), DEFAULT_MAX_INPUT_CHARS)?;
        let title = title.or_else(|| key.rsplit('/').next().map(String::from));
        Ok(FetchResult {
            text,
            title,
            metadata: json!({
                "source_uri": uri,
                "content_type": content_type,
                "etag": etag,
            }),
        })
    }

    async fn list_changes(
        &self,
        cursor: Option<&Value>,
    ) -> Result<(Vec<ChangeItem>, Option<Value>)> {
        let mut url = format!(
            "https://{}.s3.{}.amazonaws.com/?list-type=2&prefix={}",
            self.config.bucket, self.config.region, self.config.prefix
        );
        if let Some(token) = cursor.and_then(|c| c.get("continuation_token")).and_then(Value::as_str)
        {
            url.push_str(&format!("&continuation-token={token}"));
        }

        let resp = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| classify_http_error("s3 list", &e))?;
        if !resp.status().is_success() {
            return Err(classify_status("s3 list", resp.status()));
        }
        let body = resp
            .text()
            .await
            .map_err(|e| classify_http_error("s3 list body", &e))?;

        let mut changes = Vec::new();
        for entry in contents_regex().captures_iter(&body) {
            let entry = &entry[1];
            let Some(key) = xml_field(entry, "Key").into_iter().next() else {
                continue;
            };
            changes.push(ChangeItem {
                uri: format!("s3://{}/{}", self.config.bucket, key),
                operation: ChangeOperation::Upsert,
                etag: xml_field(entry, "ETag")
                    .into_iter()
                    .next()
                    .map(|e| e.trim_matches('"').to_string()),
                modified_at: xml_field(entry, "LastModified")
                    .into_iter()
                    .next()
                    .and_then(|v| v.parse().ok()),
                tenant_id: self.tenant_id.clone(),
            });
        }

        let next = xml_field(&body, "NextContinuationToken")
            .into_iter()
            .next()
            .map(|token| json!({ "continuation_token": token }));
        Ok((changes, next))
    }

    fn provider(&self) -> &str {
        "s3"
    }

    fn tenant_id(&self) -> &str {
        &self.tenant_id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn connector() -> S3Connector {
        S3Connector::new("tenant1", &json!({ "bucket": "my-bucket" })).unwrap()
    }

    #[test]
    fn external_id_uses_provider_tenant_resource() {
        let c = connector();
        assert_eq!(
            c.to_external_id("s3://my-bucket/docs/a.txt"),
            "s3:tenant1:my-bucket/docs/a.txt"
        );
    }

    #[test]
    fn uri_bucket_mismatch_is_permanent() {
        let c = connector();
        assert!(matches!(
            c.key_from_uri("s3://other-bucket/key"),
            Err(Error::PermanentConnector(_))
        ));
        assert_eq!(c.key_from_uri("s3://my-bucket/a/b.txt").unwrap(), "a/b.txt");
    }

    #[test]
    fn list_response_fields_are_extracted() {
        let body = r#"<ListBucketResult>
            <Contents><Key>docs/a.txt</Key><ETag>"abc"</ETag>
            <LastModified>2026-01-02T03:04:05.000Z</LastModified></Contents>
            <Contents><Key>docs/b.txt</Key><ETag>"def"</ETag></Contents>
            <NextContinuationToken>tok123</NextContinuationToken>
        </ListBucketResult>"#;
        let keys = xml_field(body, "Key");
        assert_eq!(keys, vec!["docs/a.txt", "docs/b.txt"]);
        assert_eq!(xml_field(body, "NextContinuationToken"), vec!["tok123"]);
        assert_eq!(contents_regex().captures_iter(body).count(), 2);
    }
}
