#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_precision_loss)]
#![allow(clippy::cast_sign_loss)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::module_name_repetitions)]

//! # ActiveKG Storage - Turso
//!
//! Turso/libSQL storage backend for the active knowledge graph.
//!
//! This crate provides:
//! - Schema creation and migration (nodes, edges, events, versions,
//!   embedding history, patterns, connector configs and cursors)
//! - Tenant-guard triggers probed by the `RLS_MODE` contract
//! - FTS5 lexical index and libSQL vector search
//! - Pooled connections with checkout timeouts
//! - Jittered-backoff retry for transient read failures
//!
//! ## Example
//!
//! ```no_run
//! use activekg_storage_turso::{StoreConfig, TursoGraphStore};
//! use activekg_core::Telemetry;
//!
//! # async fn example() -> activekg_core::Result<()> {
//! let store = TursoGraphStore::connect(
//!     "file:activekg.db",
//!     "",
//!     StoreConfig::default(),
//!     Telemetry::new(),
//! )
//! .await?;
//! store.initialize().await?;
//! # Ok(())
//! # }
//! ```

mod fts5_schema;
mod pool;
mod schema;
mod store;

pub use pool::{ConnectionPool, PoolConfig, PoolStatistics, PooledConnection};

use std::sync::Arc;
use std::time::Duration;

use activekg_core::config::{GuardMode, PatternNamespace};
use activekg_core::{Error, Result, Telemetry};
use chrono::{DateTime, Utc};
use libsql::{Builder, Connection, Database};
use tracing::{debug, info, warn};

/// Configuration for the graph store.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Process-constant embedding dimension
    pub dimension: usize,
    /// Tenant-guard enforcement mode (`RLS_MODE`)
    pub guard_mode: GuardMode,
    /// Pattern name namespace
    pub pattern_namespace: PatternNamespace,
    /// Grace period applied on soft delete
    pub deletion_grace_secs: i64,
    /// Keep audit events when hard-deleting a node
    pub events_retain_on_hard_delete: bool,
    /// Maximum retry attempts for transient read failures
    pub max_retries: u32,
    /// Base delay for exponential backoff (milliseconds)
    pub retry_base_delay_ms: u64,
    /// Maximum backoff delay (milliseconds)
    pub retry_max_delay_ms: u64,
    /// Connection pool settings
    pub pool: PoolConfig,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            dimension: activekg_core::constants::DEFAULT_EMBEDDING_DIMENSION,
            guard_mode: GuardMode::Auto,
            pattern_namespace: PatternNamespace::PerTenant,
            deletion_grace_secs: activekg_core::constants::DEFAULT_DELETION_GRACE_SECS,
            events_retain_on_hard_delete: true,
            max_retries: 3,
            retry_base_delay_ms: 100,
            retry_max_delay_ms: 5000,
            pool: PoolConfig::default(),
        }
    }
}

/// Turso/libSQL implementation of the graph store.
pub struct TursoGraphStore {
    pool: ConnectionPool,
    config: StoreConfig,
    telemetry: Telemetry,
}

impl TursoGraphStore {
    /// Open a store by URL.
    ///
    /// # Security
    ///
    /// Remote connections must use `libsql://` with a token; plain
    /// `http(s)://` URLs are rejected. Local `file:` and `:memory:`
    /// databases need no token.
    pub async fn connect(
        url: &str,
        token: &str,
        config: StoreConfig,
        telemetry: Telemetry,
    ) -> Result<Self> {
        let db = if url.starts_with("libsql://") {
            if token.is_empty() {
                return Err(Error::Config(
                    "libsql:// connections require a token".to_string(),
                ));
            }
            Builder::new_remote(url.to_string(), token.to_string())
                .build()
                .await
                .map_err(|e| Error::Storage(format!("failed to open remote database: {e}")))?
        } else if url.starts_with("http://") || url.starts_with("https://") {
            return Err(Error::Config(
                "http(s) database URLs are not allowed; use libsql://".to_string(),
            ));
        } else {
            let path = url.strip_prefix("file:").unwrap_or(url);
            Builder::new_local(path)
                .build()
                .await
                .map_err(|e| Error::Storage(format!("failed to open local database: {e}")))?
        };
        Ok(Self::from_database(db, config, telemetry))
    }

    /// Wrap an existing database handle (used by tests with `:memory:`).
    #[must_use]
    pub fn from_database(db: Database, config: StoreConfig, telemetry: Telemetry) -> Self {
        let pool = ConnectionPool::new(Arc::new(db), config.pool.clone());
        Self {
            pool,
            config,
            telemetry,
        }
    }

    /// Store configuration.
    #[must_use]
    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    /// Pool statistics for the health surface.
    #[must_use]
    pub fn pool_statistics(&self) -> PoolStatistics {
        self.pool.statistics()
    }

    pub(crate) async fn conn(&self) -> Result<PooledConnection> {
        self.pool.acquire().await
    }

    pub(crate) fn telemetry(&self) -> &Telemetry {
        &self.telemetry
    }

    /// Retry a read-only operation on transient storage errors with
    /// jittered exponential backoff. Writes are not retried; the callers
    /// that need idempotent writes key them on stable identifiers instead.
    pub(crate) async fn with_read_retry<T, F, Fut>(&self, mut op: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = Result<T>>,
    {
        let mut attempt = 0u32;
        loop {
            match op().await {
                Ok(v) => return Ok(v),
                Err(e) if e.is_recoverable() && attempt < self.config.max_retries => {
                    let backoff = self
                        .config
                        .retry_base_delay_ms
                        .saturating_mul(1u64 << attempt.min(16))
                        .min(self.config.retry_max_delay_ms);
                    let jitter = rand::random::<u64>() % (backoff / 2 + 1);
                    debug!(attempt, backoff_ms = backoff + jitter, error = %e, "retrying storage read");
                    tokio::time::sleep(Duration::from_millis(backoff + jitter)).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Apply the full idempotent DDL, then enforce the guard-mode contract.
    pub async fn initialize(&self) -> Result<()> {
        self.apply_schema().await?;
        self.verify_guards().await
    }

    pub(crate) async fn apply_schema(&self) -> Result<()> {
        let conn = self.conn().await?;
        let conn = conn.connection();

        let statements = [
            schema::create_nodes_table(self.config.dimension),
            schema::CREATE_EDGES_TABLE.to_string(),
            schema::CREATE_EVENTS_TABLE.to_string(),
            schema::CREATE_NODE_VERSIONS_TABLE.to_string(),
            schema::CREATE_EMBEDDING_HISTORY_TABLE.to_string(),
            schema::create_patterns_table(self.config.dimension),
            schema::CREATE_CONNECTOR_CONFIGS_TABLE.to_string(),
            schema::CREATE_CONNECTOR_CURSORS_TABLE.to_string(),
            schema::CREATE_NODES_TENANT_INDEX.to_string(),
            schema::CREATE_NODES_EXTERNAL_ID_INDEX.to_string(),
            schema::CREATE_NODES_REFRESH_INDEX.to_string(),
            schema::CREATE_NODES_GRACE_INDEX.to_string(),
            schema::CREATE_EDGES_SRC_INDEX.to_string(),
            schema::CREATE_EDGES_DST_INDEX.to_string(),
            schema::CREATE_EVENTS_NODE_INDEX.to_string(),
            schema::CREATE_HISTORY_NODE_INDEX.to_string(),
            fts5_schema::CREATE_NODES_FTS_TABLE.to_string(),
        ];
        for sql in &statements {
            conn.execute(sql, ())
                .await
                .map_err(|e| Error::Storage(format!("migration failed: {e}")))?;
        }

        conn.execute_batch(fts5_schema::CREATE_NODES_FTS_TRIGGERS)
            .await
            .map_err(|e| Error::Storage(format!("fts trigger migration failed: {e}")))?;
        conn.execute_batch(schema::CREATE_GUARD_TRIGGERS)
            .await
            .map_err(|e| Error::Storage(format!("guard trigger migration failed: {e}")))?;

        info!("schema migration applied");
        Ok(())
    }

    /// Probe for the guard triggers.
    pub async fn guards_installed(&self) -> Result<bool> {
        let conn = self.conn().await?;
        let placeholders = vec!["?"; schema::GUARD_TRIGGER_NAMES.len()].join(", ");
        let sql = format!(
            "SELECT COUNT(*) FROM sqlite_master WHERE type = 'trigger' AND name IN ({placeholders})"
        );
        let params: Vec<libsql::Value> = schema::GUARD_TRIGGER_NAMES
            .iter()
            .map(|n| libsql::Value::from((*n).to_string()))
            .collect();
        let mut rows = conn
            .connection()
            .query(&sql, libsql::params_from_iter(params))
            .await
            .map_err(|e| Error::Storage(format!("guard probe failed: {e}")))?;
        let count: i64 = match rows
            .next()
            .await
            .map_err(|e| Error::Storage(e.to_string()))?
        {
            Some(row) => row.get(0).map_err(|e| Error::Storage(e.to_string()))?,
            None => 0,
        };
        Ok(count as usize == schema::GUARD_TRIGGER_NAMES.len())
    }

    /// Enforce the guard-mode contract: `on` refuses to run without guards;
    /// `off` never drops detected guards (the stricter setting wins).
    pub async fn verify_guards(&self) -> Result<()> {
        let installed = self.guards_installed().await?;
        match self.config.guard_mode {
            GuardMode::On if !installed => Err(Error::Config(
                "RLS_MODE=on but tenant guard triggers are not installed".to_string(),
            )),
            GuardMode::On => {
                info!("tenant guards verified (mode=on)");
                Ok(())
            }
            GuardMode::Auto => {
                info!(installed, "tenant guard probe complete (mode=auto)");
                Ok(())
            }
            GuardMode::Off => {
                if installed {
                    warn!("RLS_MODE=off requested but guards are installed; keeping them");
                }
                Ok(())
            }
        }
    }

    pub(crate) async fn build_vector_index(&self) -> Result<()> {
        let started = std::time::Instant::now();
        let conn = self.conn().await?;
        let result = conn
            .connection()
            .execute(schema::CREATE_NODES_VECTOR_INDEX, ())
            .await;

        let label = match &result {
            Ok(_) => "ok",
            Err(_) => "error",
        };
        self.telemetry
            .histogram_with(
                "vector_index_build_seconds",
                &[
                    ("index_type", "diskann"),
                    ("distance_metric", "cosine"),
                    ("result", label),
                ],
            )
            .observe(started.elapsed());

        match result {
            Ok(_) => {
                info!("vector index ensured");
                Ok(())
            }
            Err(e) => {
                // Brute-force distance ordering stays correct without the index
                warn!(error = %e, "vector index unavailable, falling back to sequential scan");
                Ok(())
            }
        }
    }
}

// ---- shared row/time helpers --------------------------------------------

pub(crate) fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

pub(crate) fn ms_to_datetime(ms: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(ms).unwrap_or_default()
}

pub(crate) async fn query_one(
    conn: &Connection,
    sql: &str,
    params: impl libsql::params::IntoParams,
) -> Result<Option<libsql::Row>> {
    let mut rows = conn
        .query(sql, params)
        .await
        .map_err(|e| Error::Storage(format!("query failed: {e}")))?;
    rows.next()
        .await
        .map_err(|e| Error::Storage(format!("row fetch failed: {e}")))
}
