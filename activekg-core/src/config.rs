//! Environment-driven settings.
//!
//! Every recognized variable has a typed field with a safe default, so a bare
//! process starts in dev mode (JWT off, rate limiting off, local database,
//! deterministic embedding backend).

use std::collections::HashMap;
use std::path::PathBuf;

use crate::constants::{
    DEFAULT_CHUNK_OVERLAP, DEFAULT_CHUNK_SIZE, DEFAULT_DELETION_GRACE_SECS,
    DEFAULT_EMBEDDING_DIMENSION, DEFAULT_MAX_INPUT_CHARS, RERANK_TOP_N, RRF_K,
};
use crate::{Error, Result};

fn env_string(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_opt(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.is_empty())
}

fn env_bool(key: &str, default: bool) -> bool {
    std::env::var(key)
        .map(|v| matches!(v.to_lowercase().as_str(), "true" | "1" | "on" | "yes"))
        .unwrap_or(default)
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

/// Tenant-guard enforcement mode, mirroring `RLS_MODE`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GuardMode {
    /// Probe the schema for guard triggers and enable if present
    Auto,
    /// Require guards; refuse to start without them
    On,
    /// Skip the probe. A detected guard still stays installed; the stricter
    /// setting always wins.
    Off,
}

impl std::str::FromStr for GuardMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "auto" => Ok(GuardMode::Auto),
            "on" => Ok(GuardMode::On),
            "off" => Ok(GuardMode::Off),
            other => Err(Error::Config(format!("invalid RLS_MODE: {other}"))),
        }
    }
}

/// Pattern name namespace.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PatternNamespace {
    /// Patterns are scoped per tenant (default)
    PerTenant,
    /// Process-global names, compatible with shared taxonomies
    Global,
}

/// Embedding backend settings.
#[derive(Debug, Clone)]
pub struct EmbeddingSettings {
    /// Backend name: `"hash"` (deterministic, default) or `"remote"`
    pub backend: String,
    pub model: String,
    pub dimension: usize,
    /// Inputs are truncated at this many characters before encoding
    pub max_input_chars: usize,
    /// Maximum texts per `embed_batch` call
    pub batch_size: usize,
}

impl Default for EmbeddingSettings {
    fn default() -> Self {
        Self {
            backend: "hash".to_string(),
            model: "hash-v1".to_string(),
            dimension: DEFAULT_EMBEDDING_DIMENSION,
            max_input_chars: DEFAULT_MAX_INPUT_CHARS,
            batch_size: 64,
        }
    }
}

/// Chunker settings.
#[derive(Debug, Clone)]
pub struct ChunkingSettings {
    pub size: usize,
    pub overlap: usize,
}

impl Default for ChunkingSettings {
    fn default() -> Self {
        Self {
            size: DEFAULT_CHUNK_SIZE,
            overlap: DEFAULT_CHUNK_OVERLAP,
        }
    }
}

/// Gating thresholds per score type; an `/ask` whose top score falls below
/// the threshold for the active mode returns the canned refusal.
#[derive(Debug, Clone)]
pub struct GatingThresholds {
    pub cosine: f32,
    pub weighted: f32,
    pub rrf: f32,
}

impl Default for GatingThresholds {
    fn default() -> Self {
        Self {
            cosine: 0.25,
            weighted: 0.25,
            rrf: 0.004,
        }
    }
}

/// Retrieval and fusion settings.
#[derive(Debug, Clone)]
pub struct RetrievalSettings {
    /// Hybrid fusion mode: RRF when true, weighted otherwise
    pub hybrid_rrf_enabled: bool,
    pub rrf_k: f32,
    pub vector_weight: f32,
    pub lexical_weight: f32,
    /// Recency decay rate (per day) for optional reweighting
    pub decay_lambda: f32,
    /// Drift decay rate for optional reweighting
    pub decay_beta: f32,
    pub rerank_enabled: bool,
    pub rerank_top_n: usize,
    pub gating: GatingThresholds,
    pub default_top_k: usize,
}

impl Default for RetrievalSettings {
    fn default() -> Self {
        Self {
            hybrid_rrf_enabled: true,
            rrf_k: RRF_K,
            vector_weight: 0.7,
            lexical_weight: 0.3,
            decay_lambda: 0.01,
            decay_beta: 0.5,
            rerank_enabled: false,
            rerank_top_n: RERANK_TOP_N,
            gating: GatingThresholds::default(),
            default_top_k: 10,
        }
    }
}

/// Refresh scheduler settings.
#[derive(Debug, Clone)]
pub struct SchedulerSettings {
    pub enabled: bool,
    pub tick_secs: u64,
    /// Bounded batch of due nodes processed per tenant per tick
    pub batch_per_tenant: usize,
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            tick_secs: 5,
            batch_per_tenant: 50,
        }
    }
}

/// JWT auth settings.
#[derive(Debug, Clone)]
pub struct JwtSettings {
    pub enabled: bool,
    /// `"HS256"` or `"RS256"`
    pub algorithm: String,
    pub secret_key: Option<String>,
    pub public_key_pem: Option<String>,
    pub audience: Option<String>,
    pub issuer: Option<String>,
    pub leeway_secs: u64,
    /// Tenant assumed when JWT is disabled (dev mode)
    pub dev_tenant: String,
}

impl Default for JwtSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            algorithm: "HS256".to_string(),
            secret_key: None,
            public_key_pem: None,
            audience: None,
            issuer: None,
            leeway_secs: 30,
            dev_tenant: "default".to_string(),
        }
    }
}

/// Per-endpoint rate and burst.
#[derive(Debug, Clone, Copy)]
pub struct EndpointLimit {
    pub rate: u32,
    pub burst: u32,
}

/// Rate limiting settings with per-endpoint overrides from
/// `RATE_LIMIT_<NAME>_RATE` / `_BURST` and `CONCURRENCY_<NAME>`.
#[derive(Debug, Clone)]
pub struct RateLimitSettings {
    pub enabled: bool,
    pub trust_proxy: bool,
    pub real_ip_header: String,
    limits: HashMap<String, EndpointLimit>,
    concurrency: HashMap<String, u32>,
}

impl RateLimitSettings {
    /// Build the endpoint table from defaults plus env overrides.
    #[must_use]
    pub fn load() -> Self {
        let defaults: [(&str, u32, u32); 7] = [
            ("search", 50, 100),
            ("ask", 3, 5),
            ("ask_stream", 1, 3),
            ("admin_refresh", 1, 2),
            ("webhook_s3", 100, 200),
            ("webhook_gcs", 100, 200),
            ("default", 100, 200),
        ];
        let mut limits = HashMap::new();
        for (name, rate, burst) in defaults {
            let rate = env_parse(&format!("RATE_LIMIT_{}_RATE", name.to_uppercase()), rate);
            let burst = env_parse(&format!("RATE_LIMIT_{}_BURST", name.to_uppercase()), burst);
            limits.insert(name.to_string(), EndpointLimit { rate, burst });
        }
        let mut concurrency = HashMap::new();
        for (name, cap) in [("ask", 3u32), ("ask_stream", 2)] {
            let cap = env_parse(&format!("CONCURRENCY_{}", name.to_uppercase()), cap);
            concurrency.insert(name.to_string(), cap);
        }
        Self {
            enabled: env_bool("RATE_LIMIT_ENABLED", false),
            trust_proxy: env_bool("TRUST_PROXY", false),
            real_ip_header: env_string("REAL_IP_HEADER", "X-Forwarded-For"),
            limits,
            concurrency,
        }
    }

    /// Limit for an endpoint, falling back to `default`.
    #[must_use]
    pub fn limit_for(&self, endpoint: &str) -> EndpointLimit {
        self.limits
            .get(endpoint)
            .or_else(|| self.limits.get("default"))
            .copied()
            .unwrap_or(EndpointLimit {
                rate: 100,
                burst: 200,
            })
    }

    /// Concurrency cap for an endpoint, if one is configured.
    #[must_use]
    pub fn concurrency_for(&self, endpoint: &str) -> Option<u32> {
        self.concurrency.get(endpoint).copied()
    }

    /// Default endpoint table with limiting switched on, regardless of
    /// `RATE_LIMIT_ENABLED` (embedded and test use).
    #[must_use]
    pub fn enabled_with_defaults() -> Self {
        let mut settings = Self::load();
        settings.enabled = true;
        settings
    }
}

impl Default for RateLimitSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            trust_proxy: false,
            real_ip_header: "X-Forwarded-For".to_string(),
            limits: HashMap::new(),
            concurrency: HashMap::new(),
        }
    }
}

/// Webhook ingress settings.
#[derive(Debug, Clone)]
pub struct WebhookSettings {
    pub verify_sns: bool,
    /// JSON object mapping tenant to TopicArn patterns
    pub topic_allowlist_json: String,
    pub max_body_bytes: usize,
    pub dedup_ttl_secs: u64,
    pub cert_cache_ttl_secs: u64,
    pub cert_http_timeout_secs: u64,
    /// Shared secret expected from GCS push subscriptions
    pub gcs_shared_secret: Option<String>,
}

impl Default for WebhookSettings {
    fn default() -> Self {
        Self {
            verify_sns: true,
            topic_allowlist_json: "{}".to_string(),
            max_body_bytes: 1024 * 1024,
            dedup_ttl_secs: 300,
            cert_cache_ttl_secs: 3600,
            cert_http_timeout_secs: 3,
            gcs_shared_secret: None,
        }
    }
}

/// Ingestion worker settings.
#[derive(Debug, Clone)]
pub struct ConnectorSettings {
    /// Workers per provider
    pub workers_per_provider: usize,
    pub max_fetch_attempts: u32,
    pub retry_base_delay_ms: u64,
    /// Per-tenant ingestion throttle
    pub docs_per_hour: u32,
    pub bytes_per_hour: u64,
    /// Config cache TTL
    pub cache_ttl_secs: u64,
}

impl Default for ConnectorSettings {
    fn default() -> Self {
        Self {
            workers_per_provider: 1,
            max_fetch_attempts: 3,
            retry_base_delay_ms: 200,
            docs_per_hour: 1_000,
            bytes_per_hour: 1024 * 1024 * 1024,
            cache_ttl_secs: 300,
        }
    }
}

/// Payload-ref loader confinement settings.
#[derive(Debug, Clone)]
pub struct PayloadSettings {
    /// `file://` refs must resolve inside one of these directories
    pub allowed_base_dirs: Vec<PathBuf>,
    pub http_max_bytes: usize,
    pub http_timeout_secs: u64,
}

impl Default for PayloadSettings {
    fn default() -> Self {
        Self {
            allowed_base_dirs: Vec::new(),
            http_max_bytes: 4 * 1024 * 1024,
            http_timeout_secs: 10,
        }
    }
}

/// LLM backend settings.
#[derive(Debug, Clone)]
pub struct LlmSettings {
    /// `"extractive"` (deterministic, default) or `"remote"`
    pub backend: String,
    pub model: String,
}

impl Default for LlmSettings {
    fn default() -> Self {
        Self {
            backend: "extractive".to_string(),
            model: "extractive-v1".to_string(),
        }
    }
}

/// Top-level process settings.
#[derive(Debug, Clone)]
pub struct Settings {
    pub bind_addr: String,
    pub database_url: String,
    pub database_token: String,
    pub redis_url: String,
    pub rls_mode: GuardMode,
    pub pattern_namespace: PatternNamespace,
    pub deletion_grace_secs: i64,
    pub events_retain_on_hard_delete: bool,
    pub embedding: EmbeddingSettings,
    pub chunking: ChunkingSettings,
    pub retrieval: RetrievalSettings,
    pub scheduler: SchedulerSettings,
    pub jwt: JwtSettings,
    pub rate_limit: RateLimitSettings,
    pub webhook: WebhookSettings,
    pub connectors: ConnectorSettings,
    pub payload: PayloadSettings,
    pub llm: LlmSettings,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:8080".to_string(),
            database_url: "file:activekg.db".to_string(),
            database_token: String::new(),
            redis_url: "redis://localhost:6379/0".to_string(),
            rls_mode: GuardMode::Auto,
            pattern_namespace: PatternNamespace::PerTenant,
            deletion_grace_secs: DEFAULT_DELETION_GRACE_SECS,
            events_retain_on_hard_delete: true,
            embedding: EmbeddingSettings::default(),
            chunking: ChunkingSettings::default(),
            retrieval: RetrievalSettings::default(),
            scheduler: SchedulerSettings::default(),
            jwt: JwtSettings::default(),
            rate_limit: RateLimitSettings::default(),
            webhook: WebhookSettings::default(),
            connectors: ConnectorSettings::default(),
            payload: PayloadSettings::default(),
            llm: LlmSettings::default(),
        }
    }
}

impl Settings {
    /// Load all settings from the environment.
    pub fn from_env() -> Result<Self> {
        let rls_mode: GuardMode = env_string("RLS_MODE", "auto").parse()?;
        let pattern_namespace = match env_string("PATTERN_NAMESPACE", "tenant").as_str() {
            "global" => PatternNamespace::Global,
            _ => PatternNamespace::PerTenant,
        };

        let embedding = EmbeddingSettings {
            backend: env_string("EMBEDDING_BACKEND", "hash"),
            model: env_string("EMBEDDING_MODEL", "hash-v1"),
            dimension: env_parse("EMBEDDING_DIMENSION", DEFAULT_EMBEDDING_DIMENSION),
            max_input_chars: env_parse("EXTRACTION_MAX_INPUT_CHARS", DEFAULT_MAX_INPUT_CHARS),
            batch_size: env_parse("EMBEDDING_BATCH_SIZE", 64),
        };

        let retrieval = RetrievalSettings {
            hybrid_rrf_enabled: env_bool("HYBRID_RRF_ENABLED", true),
            rrf_k: env_parse("HYBRID_RRF_K", RRF_K),
            vector_weight: env_parse("HYBRID_VECTOR_WEIGHT", 0.7),
            lexical_weight: env_parse("HYBRID_LEXICAL_WEIGHT", 0.3),
            decay_lambda: env_parse("DECAY_LAMBDA", 0.01),
            decay_beta: env_parse("DECAY_BETA", 0.5),
            rerank_enabled: env_bool("RERANKER_ENABLED", false),
            rerank_top_n: env_parse("RERANK_TOP_N", RERANK_TOP_N),
            gating: GatingThresholds {
                cosine: env_parse("GATING_EXTREMELY_LOW_COSINE", 0.25),
                weighted: env_parse("GATING_EXTREMELY_LOW_WEIGHTED", 0.25),
                rrf: env_parse("GATING_EXTREMELY_LOW_RRF", 0.004),
            },
            default_top_k: env_parse("SEARCH_DEFAULT_TOP_K", 10),
        };

        let jwt = JwtSettings {
            enabled: env_bool("JWT_ENABLED", false),
            algorithm: env_string("JWT_ALGORITHM", "HS256"),
            secret_key: env_opt("JWT_SECRET_KEY"),
            public_key_pem: env_opt("JWT_PUBLIC_KEY"),
            audience: env_opt("JWT_AUDIENCE"),
            issuer: env_opt("JWT_ISSUER"),
            leeway_secs: env_parse("JWT_LEEWAY_SECS", 30),
            dev_tenant: env_string("ACTIVEKG_DEV_TENANT", "default"),
        };

        let webhook = WebhookSettings {
            verify_sns: env_bool("WEBHOOK_VERIFY_SNS", true),
            topic_allowlist_json: env_string("WEBHOOK_TOPIC_ALLOWLIST", "{}"),
            max_body_bytes: env_parse("WEBHOOK_MAX_BODY_BYTES", 1024 * 1024),
            dedup_ttl_secs: env_parse("WEBHOOK_DEDUP_TTL_SECS", 300),
            cert_cache_ttl_secs: env_parse("WEBHOOK_CERT_CACHE_TTL", 3600),
            cert_http_timeout_secs: env_parse("WEBHOOK_HTTP_TIMEOUT", 3),
            gcs_shared_secret: env_opt("PUBSUB_VERIFY_SECRET"),
        };

        let connectors = ConnectorSettings {
            workers_per_provider: env_parse("CONNECTOR_WORKERS_PER_PROVIDER", 1),
            max_fetch_attempts: env_parse("CONNECTOR_MAX_FETCH_ATTEMPTS", 3),
            retry_base_delay_ms: env_parse("CONNECTOR_RETRY_BASE_DELAY_MS", 200),
            docs_per_hour: env_parse("CONNECTOR_DOCS_PER_HOUR", 1_000),
            bytes_per_hour: env_parse("CONNECTOR_BYTES_PER_HOUR", 1024 * 1024 * 1024),
            cache_ttl_secs: env_parse("CONNECTOR_CACHE_TTL_SECS", 300),
        };

        let payload = PayloadSettings {
            allowed_base_dirs: env_opt("PAYLOAD_ALLOWED_DIRS")
                .map(|v| v.split(':').map(PathBuf::from).collect())
                .unwrap_or_default(),
            http_max_bytes: env_parse("PAYLOAD_HTTP_MAX_BYTES", 4 * 1024 * 1024),
            http_timeout_secs: env_parse("PAYLOAD_HTTP_TIMEOUT_SECS", 10),
        };

        Ok(Self {
            bind_addr: env_string("ACTIVEKG_BIND_ADDR", "0.0.0.0:8080"),
            database_url: env_string("ACTIVEKG_DATABASE_URL", "file:activekg.db"),
            database_token: env_string("ACTIVEKG_DATABASE_TOKEN", ""),
            redis_url: env_string("REDIS_URL", "redis://localhost:6379/0"),
            rls_mode,
            pattern_namespace,
            deletion_grace_secs: env_parse("DELETION_GRACE_SECS", DEFAULT_DELETION_GRACE_SECS),
            events_retain_on_hard_delete: env_bool("EVENTS_RETAIN_ON_HARD_DELETE", true),
            embedding,
            chunking: ChunkingSettings {
                size: env_parse("CHUNK_SIZE_CHARS", DEFAULT_CHUNK_SIZE),
                overlap: env_parse("CHUNK_OVERLAP_CHARS", DEFAULT_CHUNK_OVERLAP),
            },
            retrieval,
            scheduler: SchedulerSettings {
                enabled: env_bool("SCHEDULER_ENABLED", true),
                tick_secs: env_parse("SCHEDULER_TICK_SECS", 5),
                batch_per_tenant: env_parse("SCHEDULER_BATCH_PER_TENANT", 50),
            },
            jwt,
            rate_limit: RateLimitSettings::load(),
            webhook,
            connectors,
            payload,
            llm: LlmSettings {
                backend: env_string("LLM_BACKEND", "extractive"),
                model: env_string("LLM_MODEL", "extractive-v1"),
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn guard_mode_parses() {
        assert_eq!("auto".parse::<GuardMode>().unwrap(), GuardMode::Auto);
        assert_eq!("ON".parse::<GuardMode>().unwrap(), GuardMode::On);
        assert!("sideways".parse::<GuardMode>().is_err());
    }

    #[test]
    fn default_limits_cover_known_endpoints() {
        let settings = RateLimitSettings::load();
        assert_eq!(settings.limit_for("ask").rate, 3);
        assert_eq!(settings.limit_for("nonexistent").rate, 100);
        assert_eq!(settings.concurrency_for("ask_stream"), Some(2));
        assert_eq!(settings.concurrency_for("search"), None);
    }
}
