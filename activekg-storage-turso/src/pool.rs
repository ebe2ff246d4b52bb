//! Connection pool for libSQL database connections.
//!
//! libSQL's `Database` is already a connection factory; this pool adds
//! concurrency limits via a semaphore, optional health validation, and
//! checkout statistics. Pool exhaustion surfaces as a timeout to callers
//! rather than unbounded queueing.

use std::sync::Arc;
use std::time::{Duration, Instant};

use activekg_core::{Error, Result};
use libsql::{Connection, Database};
use parking_lot::RwLock;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::{debug, warn};

/// Configuration for the connection pool.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Maximum number of concurrent connections
    pub max_connections: usize,
    /// Maximum time to wait for a permit
    pub connection_timeout: Duration,
    /// Run a probe query on checkout
    pub enable_health_check: bool,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_connections: 10,
            connection_timeout: Duration::from_secs(5),
            enable_health_check: false,
        }
    }
}

/// Pool statistics for monitoring.
#[derive(Debug, Clone, Default)]
pub struct PoolStatistics {
    pub total_checkouts: usize,
    pub total_timeouts: usize,
    pub active_connections: usize,
    pub total_wait_time_ms: u64,
}

/// A checked-out connection; returns its permit on drop.
pub struct PooledConnection {
    connection: Connection,
    _permit: OwnedSemaphorePermit,
    stats: Arc<RwLock<PoolStatistics>>,
}

impl PooledConnection {
    /// Borrow the underlying connection.
    #[must_use]
    pub fn connection(&self) -> &Connection {
        &self.connection
    }
}

impl Drop for PooledConnection {
    fn drop(&mut self) {
        let mut stats = self.stats.write();
        stats.active_connections = stats.active_connections.saturating_sub(1);
    }
}

/// Semaphore-bounded connection pool over a libSQL database.
pub struct ConnectionPool {
    db: Arc<Database>,
    semaphore: Arc<Semaphore>,
    config: PoolConfig,
    stats: Arc<RwLock<PoolStatistics>>,
}

impl ConnectionPool {
    /// Create a pool over an existing database handle.
    #[must_use]
    pub fn new(db: Arc<Database>, config: PoolConfig) -> Self {
        Self {
            semaphore: Arc::new(Semaphore::new(config.max_connections)),
            db,
            config,
            stats: Arc::new(RwLock::new(PoolStatistics::default())),
        }
    }

    /// Check out a connection, waiting up to the configured timeout.
    pub async fn acquire(&self) -> Result<PooledConnection> {
        let started = Instant::now();
        let permit = tokio::time::timeout(
            self.config.connection_timeout,
            Arc::clone(&self.semaphore).acquire_owned(),
        )
        .await
        .map_err(|_| {
            self.stats.write().total_timeouts += 1;
            Error::Storage(format!(
                "connection pool exhausted after {:?}",
                self.config.connection_timeout
            ))
        })?
        .map_err(|e| Error::Storage(format!("pool semaphore closed: {e}")))?;

        let connection = self
            .db
            .connect()
            .map_err(|e| Error::Storage(format!("failed to open connection: {e}")))?;

        if self.config.enable_health_check {
            if let Err(e) = connection.query("SELECT 1", ()).await {
                warn!(error = %e, "connection failed health check");
                return Err(Error::Storage(format!("connection unhealthy: {e}")));
            }
        }

        {
            let mut stats = self.stats.write();
            stats.total_checkouts += 1;
            stats.active_connections += 1;
            stats.total_wait_time_ms += started.elapsed().as_millis() as u64;
        }
        debug!(wait_ms = started.elapsed().as_millis() as u64, "connection checked out");

        Ok(PooledConnection {
            connection,
            _permit: permit,
            stats: Arc::clone(&self.stats),
        })
    }

    /// Snapshot the pool statistics.
    #[must_use]
    pub fn statistics(&self) -> PoolStatistics {
        self.stats.read().clone()
    }
}
