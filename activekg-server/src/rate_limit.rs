//! KV-backed fixed-window rate limiting with concurrency caps.
//!
//! Fixed 1-second window buckets via atomic `INCR` + `EXPIRE`; no process
//! local state, so every replica shares the same budget. Window-boundary
//! bursts can double-spend across consecutive seconds. In-flight
//! concurrency uses a sorted set of request ids scored by timestamp,
//! pruned with a TTL safety net. If the backing store is unreachable the
//! limiter fails open (counted and logged).

use std::sync::Arc;
use std::time::Duration;

use activekg_core::config::RateLimitSettings;
use activekg_core::kv::KvStore;
use activekg_core::{Error, Telemetry};
use axum::http::HeaderMap;
use axum::response::Response;
use tracing::warn;
use uuid::Uuid;

/// TTL safety net for in-flight entries whose release was lost.
const INFLIGHT_TTL_SECS: f64 = 60.0;

/// Rate limit decision with header values.
#[derive(Debug, Clone)]
pub struct RateLimitInfo {
    pub allowed: bool,
    pub limit: u32,
    pub remaining: u32,
    pub reset_at: i64,
    pub retry_after: u64,
}

/// Releases an in-flight concurrency slot when dropped.
pub struct InflightSlot {
    kv: Arc<dyn KvStore>,
    key: String,
    member: String,
}

impl Drop for InflightSlot {
    fn drop(&mut self) {
        let kv = Arc::clone(&self.kv);
        let key = std::mem::take(&mut self.key);
        let member = std::mem::take(&mut self.member);
        tokio::spawn(async move {
            let _ = kv.zrem(&key, &member).await;
        });
    }
}

/// Shared fixed-window rate limiter.
pub struct RateLimiter {
    kv: Arc<dyn KvStore>,
    settings: RateLimitSettings,
    telemetry: Telemetry,
}

impl RateLimiter {
    /// Create a limiter.
    #[must_use]
    pub fn new(kv: Arc<dyn KvStore>, settings: RateLimitSettings, telemetry: Telemetry) -> Self {
        Self {
            kv,
            settings,
            telemetry,
        }
    }

    /// Whether limiting is enabled at all.
    #[must_use]
    pub fn enabled(&self) -> bool {
        self.settings.enabled
    }

    /// Identifier for a request: the tenant when authenticated, else the
    /// client address (honoring the proxy header only when trusted).
    #[must_use]
    pub fn identifier(&self, tenant: Option<&str>, headers: &HeaderMap, peer: &str) -> String {
        if let Some(tenant) = tenant {
            return format!("tenant:{tenant}");
        }
        if self.settings.trust_proxy {
            if let Some(forwarded) = headers
                .get(self.settings.real_ip_header.to_lowercase().as_str())
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.split(',').next())
            {
                return format!("ip:{}", forwarded.trim());
            }
        }
        format!("ip:{peer}")
    }

    /// Check the fixed-window budget for an endpoint.
    pub async fn check(&self, identifier: &str, endpoint: &str) -> RateLimitInfo {
        let now = chrono::Utc::now().timestamp();
        if !self.settings.enabled {
            return RateLimitInfo {
                allowed: true,
                limit: 9999,
                remaining: 9999,
                reset_at: now + 60,
                retry_after: 0,
            };
        }

        let limits = self.settings.limit_for(endpoint);
        let key = format!("ratelimit:{endpoint}:{identifier}:{now}");
        let count = match self.kv.incr_with_expiry(&key, Duration::from_secs(1)).await {
            Ok(count) => count,
            Err(e) => {
                // Fail open: availability beats enforcement here
                warn!(error = %e, "rate limiter store unreachable, allowing request");
                self.telemetry
                    .counter_with("rate_limiter_errors_total", &[("endpoint", endpoint)])
                    .increment();
                return RateLimitInfo {
                    allowed: true,
                    limit: limits.burst,
                    remaining: limits.burst,
                    reset_at: now + 1,
                    retry_after: 0,
                };
            }
        };

        let allowed = count <= i64::from(limits.burst);
        if !allowed {
            self.telemetry
                .counter_with(
                    "api_rate_limited_total",
                    &[("endpoint", endpoint), ("reason", "rate")],
                )
                .increment();
        }
        RateLimitInfo {
            allowed,
            limit: limits.burst,
            remaining: (i64::from(limits.burst) - count).max(0) as u32,
            reset_at: now + 1,
            retry_after: 1,
        }
    }

    /// Acquire a concurrency slot for expensive endpoints, if this endpoint
    /// has a cap.
    ///
    /// # Errors
    ///
    /// `Error::RateLimited` when the cap is reached.
    pub async fn acquire_concurrency(
        &self,
        identifier: &str,
        endpoint: &str,
    ) -> Result<Option<InflightSlot>, Error> {
        if !self.settings.enabled {
            return Ok(None);
        }
        let Some(cap) = self.settings.concurrency_for(endpoint) else {
            return Ok(None);
        };

        let key = format!("inflight:{endpoint}:{identifier}");
        let now = chrono::Utc::now().timestamp() as f64;
        let in_flight = match self.kv.zcard_prune(&key, now - INFLIGHT_TTL_SECS).await {
            Ok(n) => n,
            Err(e) => {
                warn!(error = %e, "concurrency store unreachable, allowing request");
                self.telemetry
                    .counter_with("rate_limiter_errors_total", &[("endpoint", endpoint)])
                    .increment();
                return Ok(None);
            }
        };

        if in_flight >= i64::from(cap) {
            self.telemetry
                .counter_with(
                    "api_rate_limited_total",
                    &[("endpoint", endpoint), ("reason", "concurrency")],
                )
                .increment();
            return Err(Error::RateLimited { retry_after: 5 });
        }

        let member = format!("{identifier}:{}", Uuid::new_v4().simple());
        if let Err(e) = self.kv.zadd(&key, &member, now).await {
            warn!(error = %e, "failed to record in-flight request");
            return Ok(None);
        }
        Ok(Some(InflightSlot {
            kv: Arc::clone(&self.kv),
            key,
            member,
        }))
    }
}

/// Attach `X-RateLimit-*` headers to a response.
pub fn apply_headers(response: &mut Response, info: &RateLimitInfo) {
    let headers = response.headers_mut();
    for (name, value) in [
        ("X-RateLimit-Limit", info.limit.to_string()),
        ("X-RateLimit-Remaining", info.remaining.to_string()),
        ("X-RateLimit-Reset", info.reset_at.to_string()),
    ] {
        if let Ok(value) = value.parse() {
            headers.insert(name, value);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use activekg_core::config::RateLimitSettings;
    use activekg_core::kv::MemoryKv;

    fn limiter(enabled: bool) -> RateLimiter {
        let mut settings = RateLimitSettings::default();
        if enabled {
            // Load the default endpoint table with env overrides untouched
            settings = RateLimitSettings::enabled_with_defaults();
        }
        RateLimiter::new(Arc::new(MemoryKv::new()), settings, Telemetry::new())
    }

    #[tokio::test]
    async fn disabled_limiter_always_allows() {
        let limiter = limiter(false);
        let info = limiter.check("tenant:t1", "ask").await;
        assert!(info.allowed);
    }

    #[tokio::test]
    async fn burst_is_enforced_within_window() {
        let limiter = limiter(true);
        // ask burst default is 5
        for _ in 0..5 {
            assert!(limiter.check("tenant:t1", "ask").await.allowed);
        }
        let info = limiter.check("tenant:t1", "ask").await;
        assert!(!info.allowed);
        assert_eq!(info.remaining, 0);
        // Another identifier has its own budget
        assert!(limiter.check("tenant:other", "ask").await.allowed);
    }

    #[tokio::test]
    async fn concurrency_slots_are_capped_and_released() {
        let limiter = limiter(true);
        // ask_stream cap default is 2
        let a = limiter
            .acquire_concurrency("tenant:t1", "ask_stream")
            .await
            .unwrap();
        let b = limiter
            .acquire_concurrency("tenant:t1", "ask_stream")
            .await
            .unwrap();
        assert!(a.is_some() && b.is_some());

        let over = limiter.acquire_concurrency("tenant:t1", "ask_stream").await;
        assert!(matches!(over, Err(Error::RateLimited { .. })));

        drop(a);
        // Drop releases asynchronously
        tokio::time::sleep(Duration::from_millis(50)).await;
        let again = limiter
            .acquire_concurrency("tenant:t1", "ask_stream")
            .await
            .unwrap();
        assert!(again.is_some());
        drop(b);
        drop(again);
    }

    #[test]
    fn identifier_prefers_tenant_then_proxy_header() {
        let limiter = limiter(true);
        let headers = HeaderMap::new();
        assert_eq!(
            limiter.identifier(Some("t1"), &headers, "1.2.3.4"),
            "tenant:t1"
        );
        assert_eq!(limiter.identifier(None, &headers, "1.2.3.4"), "ip:1.2.3.4");
    }

    #[test]
    fn proxy_header_honored_only_when_trusted() {
        let kv: Arc<dyn KvStore> = Arc::new(MemoryKv::new());
        let mut settings = RateLimitSettings::enabled_with_defaults();
        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-for", "9.9.9.9, 10.0.0.1".parse().unwrap());

        let untrusted = RateLimiter::new(Arc::clone(&kv), settings.clone(), Telemetry::new());
        assert_eq!(untrusted.identifier(None, &headers, "1.2.3.4"), "ip:1.2.3.4");

        settings.trust_proxy = true;
        let trusted = RateLimiter::new(kv, settings, Telemetry::new());
        assert_eq!(trusted.identifier(None, &headers, "1.2.3.4"), "ip:9.9.9.9");
    }
}
