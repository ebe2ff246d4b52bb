//! Remote payload-ref loader for the refresh scheduler.
//!
//! `http(s)://` refs are fetched directly with SSRF confinement: hostnames
//! resolving to private or loopback ranges are refused and response sizes
//! are capped. `s3://` refs go through the tenant's connector so object
//! fetches reuse the configured credentials and extraction path.

use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use activekg_core::config::PayloadSettings;
use activekg_core::refresh::RemoteFetcher;
use activekg_core::{Error, Result};
use async_trait::async_trait;
use tracing::warn;
use url::Url;

use crate::config_store::ConnectorConfigStore;
use crate::connector::ConnectorRegistry;
use crate::extraction::extract_text;

fn is_private(addr: IpAddr) -> bool {
    match addr {
        IpAddr::V4(v4) => {
            v4.is_private()
                || v4.is_loopback()
                || v4.is_link_local()
                || v4.is_unspecified()
                || v4.is_broadcast()
        }
        IpAddr::V6(v6) => {
            v6.is_loopback()
                || v6.is_unspecified()
                // Unique-local fc00::/7 and link-local fe80::/10
                || (v6.segments()[0] & 0xfe00) == 0xfc00
                || (v6.segments()[0] & 0xffc0) == 0xfe80
        }
    }
}

/// HTTP + object-store payload fetcher.
pub struct HttpRemoteFetcher {
    client: reqwest::Client,
    settings: PayloadSettings,
    config_store: Arc<ConnectorConfigStore>,
    max_input_chars: usize,
}

impl HttpRemoteFetcher {
    /// Create a fetcher.
    #[must_use]
    pub fn new(
        settings: PayloadSettings,
        config_store: Arc<ConnectorConfigStore>,
        max_input_chars: usize,
    ) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(settings.http_timeout_secs.max(1)))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self {
            client,
            settings,
            config_store,
            max_input_chars,
        }
    }

    async fn check_host(&self, url: &Url) -> Result<()> {
        let Some(host) = url.host_str() else {
            return Err(Error::Validation("payload URL has no host".to_string()));
        };
        let port = url.port_or_known_default().unwrap_or(443);
        let addrs = tokio::net::lookup_host((host, port))
            .await
            .map_err(|e| Error::Validation(format!("payload host unresolvable: {e}")))?;
        for addr in addrs {
            if is_private(addr.ip()) {
                warn!(host, ip = %addr.ip(), "refusing payload fetch to private address");
                return Err(Error::Validation(
                    "payload host resolves to a private address".to_string(),
                ));
            }
        }
        Ok(())
    }

    async fn fetch_http(&self, uri: &str) -> Result<String> {
        let url = Url::parse(uri)
            .map_err(|e| Error::Validation(format!("invalid payload URL: {e}")))?;
        self.check_host(&url).await?;

        let resp = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| Error::Dependency(format!("payload fetch failed: {e}")))?;
        if !resp.status().is_success() {
            return Err(Error::Dependency(format!(
                "payload fetch returned {}",
                resp.status()
            )));
        }
        if let Some(length) = resp.content_length() {
            if length as usize > self.settings.http_max_bytes {
                return Err(Error::Validation(format!(
                    "payload of {length} bytes exceeds cap of {}",
                    self.settings.http_max_bytes
                )));
            }
        }

        let content_type = resp
            .headers()
            .get("content-type")
            .and_then(|v| v.to_str().ok())
            .map(String::from);
        let bytes = resp
            .bytes()
            .await
            .map_err(|e| Error::Dependency(format!("payload body failed: {e}")))?;
        if bytes.len() > self.settings.http_max_bytes {
            return Err(Error::Validation(format!(
                "payload of {} bytes exceeds cap of {}",
                bytes.len(),
                self.settings.http_max_bytes
            )));
        }

        let (text, _) = extract_text(&bytes, content_type.as_deref(), self.max_input_chars)?;
        Ok(text)
    }

    async fn fetch_s3(&self, tenant_id: &str, uri: &str) -> Result<String> {
        let Some(resolved) = self.config_store.get(tenant_id, "s3").await? else {
            return Err(Error::Dependency(format!(
                "no s3 connector configured for tenant {tenant_id}"
            )));
        };
        if !resolved.enabled {
            return Err(Error::Dependency(format!(
                "s3 connector disabled for tenant {tenant_id}"
            )));
        }
        let connector = ConnectorRegistry::build("s3", tenant_id, &resolved.config)?;
        Ok(connector.fetch_text(uri).await?.text)
    }
}

#[async_trait]
impl RemoteFetcher for HttpRemoteFetcher {
    async fn fetch(&self, tenant_id: &str, uri: &str) -> Result<String> {
        if uri.starts_with("s3://") {
            return self.fetch_s3(tenant_id, uri).await;
        }
        self.fetch_http(uri).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{Ipv4Addr, Ipv6Addr};

    #[test]
    fn private_ranges_are_detected() {
        for ip in [
            IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1)),
            IpAddr::V4(Ipv4Addr::new(172, 16, 0, 1)),
            IpAddr::V4(Ipv4Addr::new(192, 168, 1, 1)),
            IpAddr::V4(Ipv4Addr::LOCALHOST),
            IpAddr::V4(Ipv4Addr::new(169, 254, 0, 1)),
            IpAddr::V6(Ipv6Addr::LOCALHOST),
        ] {
            assert!(is_private(ip), "{ip} should be private");
        }
        for ip in [
            IpAddr::V4(Ipv4Addr::new(93, 184, 216, 34)),
            IpAddr::V4(Ipv4Addr::new(8, 8, 8, 8)),
        ] {
            assert!(!is_private(ip), "{ip} should be public");
        }
    }
}
