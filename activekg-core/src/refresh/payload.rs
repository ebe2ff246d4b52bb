//! Payload reference resolution for the refresh loop.
//!
//! A node's text comes from `props.text` when present; otherwise the
//! `payload_ref` is resolved. `file://` references are confined to an
//! allowlisted set of base directories and symlinks are refused; remote
//! schemes (`http(s)://`, `s3://`) are delegated to an injected
//! [`RemoteFetcher`] so the engine core stays free of network clients.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use std::sync::Arc;
use tracing::warn;

use crate::config::PayloadSettings;
use crate::types::Node;
use crate::{Error, Result};

/// Fetches remote payload references (`http(s)://`, `s3://`).
///
/// Implementations enforce their own limits: private IP ranges are refused
/// and response sizes are capped for HTTP; object-store fetches go through
/// the tenant's connector.
#[async_trait]
pub trait RemoteFetcher: Send + Sync {
    /// Fetch the text behind a remote payload reference.
    async fn fetch(&self, tenant_id: &str, uri: &str) -> Result<String>;
}

/// Resolves node text from inline props or payload references.
pub struct PayloadLoader {
    settings: PayloadSettings,
    remote: Option<Arc<dyn RemoteFetcher>>,
}

impl PayloadLoader {
    /// Create a loader. `remote` of `None` makes remote refs a dependency
    /// error instead of a crash.
    #[must_use]
    pub fn new(settings: PayloadSettings, remote: Option<Arc<dyn RemoteFetcher>>) -> Self {
        Self { settings, remote }
    }

    /// Resolve the text for a node.
    ///
    /// # Errors
    ///
    /// `Error::Validation` when the node has neither inline text nor a
    /// payload ref, or the ref is confined out; `Error::Dependency` when a
    /// remote ref has no fetcher.
    pub async fn resolve(&self, node: &Node) -> Result<String> {
        if let Some(text) = node.text() {
            return Ok(text.to_string());
        }

        let Some(reference) = node.payload_ref.as_deref() else {
            return Err(Error::Validation(format!(
                "node {} has no text and no payload_ref",
                node.id
            )));
        };

        if let Some(path) = reference.strip_prefix("file://") {
            return self.load_file(path).await;
        }
        if reference.starts_with("http://")
            || reference.starts_with("https://")
            || reference.starts_with("s3://")
        {
            let Some(remote) = &self.remote else {
                return Err(Error::Dependency(
                    "no remote payload fetcher configured".to_string(),
                ));
            };
            return remote.fetch(&node.tenant_id, reference).await;
        }

        // Anything else is inline text stored in the ref itself
        Ok(reference.to_string())
    }

    async fn load_file(&self, raw: &str) -> Result<String> {
        let path = PathBuf::from(raw);

        let meta = tokio::fs::symlink_metadata(&path)
            .await
            .map_err(|e| Error::Validation(format!("payload file unreadable: {e}")))?;
        if meta.file_type().is_symlink() {
            warn!(path = raw, "refusing symlinked payload file");
            return Err(Error::Validation("symlinked payload refused".to_string()));
        }
        if meta.len() as usize > self.settings.http_max_bytes {
            return Err(Error::Validation(format!(
                "payload file exceeds {} bytes",
                self.settings.http_max_bytes
            )));
        }

        let canonical = tokio::fs::canonicalize(&path)
            .await
            .map_err(|e| Error::Validation(format!("payload path invalid: {e}")))?;
        if !self.is_allowed(&canonical).await {
            warn!(path = raw, "payload file outside allowed base directories");
            return Err(Error::Validation(
                "payload path outside allowed directories".to_string(),
            ));
        }

        tokio::fs::read_to_string(&canonical)
            .await
            .map_err(|e| Error::Validation(format!("payload read failed: {e}")))
    }

    async fn is_allowed(&self, canonical: &Path) -> bool {
        for base in &self.settings.allowed_base_dirs {
            if let Ok(base) = tokio::fs::canonicalize(base).await {
                if canonical.starts_with(&base) {
                    return true;
                }
            }
        }
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use serde_json::json;
    use uuid::Uuid;

    fn node_with(payload_ref: Option<&str>, text: Option<&str>) -> Node {
        let props = match text {
            Some(t) => json!({ "text": t }),
            None => json!({}),
        };
        Node {
            id: Uuid::new_v4(),
            tenant_id: "t1".into(),
            classes: vec!["Document".into()],
            props,
            metadata: json!({}),
            payload_ref: payload_ref.map(String::from),
            embedding: None,
            refresh_policy: None,
            triggers: vec![],
            version: 1,
            last_refreshed: None,
            drift_score: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn loader(dirs: Vec<PathBuf>) -> PayloadLoader {
        PayloadLoader::new(
            PayloadSettings {
                allowed_base_dirs: dirs,
                http_max_bytes: 1024,
                http_timeout_secs: 1,
            },
            None,
        )
    }

    #[tokio::test]
    async fn inline_text_wins() {
        let loader = loader(vec![]);
        let node = node_with(Some("file:///etc/passwd"), Some("inline"));
        assert_eq!(loader.resolve(&node).await.unwrap(), "inline");
    }

    #[tokio::test]
    async fn bare_ref_is_treated_as_inline() {
        let loader = loader(vec![]);
        let node = node_with(Some("just some literal payload"), None);
        assert_eq!(
            loader.resolve(&node).await.unwrap(),
            "just some literal payload"
        );
    }

    #[tokio::test]
    async fn file_outside_allowlist_is_refused() {
        let dir = tempfile::tempdir().unwrap();
        let outside = tempfile::tempdir().unwrap();
        let file = outside.path().join("doc.txt");
        tokio::fs::write(&file, "secret").await.unwrap();

        let loader = loader(vec![dir.path().to_path_buf()]);
        let node = node_with(Some(&format!("file://{}", file.display())), None);
        assert!(matches!(
            loader.resolve(&node).await,
            Err(Error::Validation(_))
        ));
    }

    #[tokio::test]
    async fn file_inside_allowlist_is_read() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("doc.txt");
        tokio::fs::write(&file, "contents here").await.unwrap();

        let loader = loader(vec![dir.path().to_path_buf()]);
        let node = node_with(Some(&format!("file://{}", file.display())), None);
        assert_eq!(loader.resolve(&node).await.unwrap(), "contents here");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn symlinked_file_is_refused() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("real.txt");
        tokio::fs::write(&target, "data").await.unwrap();
        let link = dir.path().join("link.txt");
        std::os::unix::fs::symlink(&target, &link).unwrap();

        let loader = loader(vec![dir.path().to_path_buf()]);
        let node = node_with(Some(&format!("file://{}", link.display())), None);
        assert!(matches!(
            loader.resolve(&node).await,
            Err(Error::Validation(_))
        ));
    }

    #[tokio::test]
    async fn remote_ref_without_fetcher_is_dependency_error() {
        let loader = loader(vec![]);
        let node = node_with(Some("s3://bucket/key"), None);
        assert!(matches!(
            loader.resolve(&node).await,
            Err(Error::Dependency(_))
        ));
    }

    #[tokio::test]
    async fn missing_text_and_ref_is_validation_error() {
        let loader = loader(vec![]);
        let node = node_with(None, None);
        assert!(matches!(
            loader.resolve(&node).await,
            Err(Error::Validation(_))
        ));
    }
}
