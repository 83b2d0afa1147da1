use super::{Connection, config::StoreConfig};
use crate::core::{Result, StoreError};
use crate::store::StoreBackend;
use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{Level, event};

/// Connection pool
///
/// Hands out exclusive connections to the backing store. A connection is
/// never shared while checked out, because WATCH state lives on it.
pub struct ConnectionPool {
    /// Pool configuration
    config: StoreConfig,
    /// Backend that opens raw connections
    backend: Arc<dyn StoreBackend>,
    /// Available connections
    available: Arc<Mutex<VecDeque<PooledConnection>>>,
    /// Connections alive, checked out or idle
    total_connections: Arc<AtomicUsize>,
    /// Next connection ID
    next_id: AtomicU64,
}

/// An idle connection waiting in the pool
struct PooledConnection {
    connection: Connection,
    created_at: Instant,
    last_used: Instant,
}

impl PooledConnection {
    fn new(connection: Connection, created_at: Instant) -> Self {
        Self {
            connection,
            created_at,
            last_used: Instant::now(),
        }
    }

    fn is_expired(&self, max_lifetime: Option<Duration>) -> bool {
        if let Some(lifetime) = max_lifetime {
            self.created_at.elapsed() > lifetime
        } else {
            false
        }
    }

    fn is_idle_too_long(&self, idle_timeout: Option<Duration>) -> bool {
        if let Some(timeout) = idle_timeout {
            self.last_used.elapsed() > timeout
        } else {
            false
        }
    }
}

impl ConnectionPool {
    /// Create a pool over `backend`, opening `min_connections` eagerly.
    pub async fn new(config: StoreConfig, backend: Arc<dyn StoreBackend>) -> Result<Self> {
        config.validate().map_err(StoreError::InvalidConfig)?;

        let pool = Self {
            config,
            backend,
            available: Arc::new(Mutex::new(VecDeque::new())),
            total_connections: Arc::new(AtomicUsize::new(0)),
            next_id: AtomicU64::new(1),
        };

        pool.ensure_min_connections().await?;

        event!(
            Level::DEBUG,
            target = %pool.backend.describe(),
            min = pool.config.min_connections,
            max = pool.config.max_connections,
            "connection pool ready"
        );
        Ok(pool)
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    /// Get a connection from the pool
    ///
    /// Waits up to `connect_timeout` when every connection is checked out.
    pub async fn get_connection(&self) -> Result<PoolGuard> {
        let start = Instant::now();

        loop {
            if let Some(pooled) = self.try_get_available().await {
                return Ok(self.guard(pooled.connection, pooled.created_at));
            }

            if let Some(connection) = self.try_create_connection().await? {
                return Ok(self.guard(connection, Instant::now()));
            }

            if start.elapsed() > self.config.connect_timeout {
                event!(
                    Level::WARN,
                    max = self.config.max_connections,
                    "connection pool exhausted"
                );
                return Err(StoreError::StoreUnavailable(
                    "Connection pool timeout: no connections available".into(),
                ));
            }

            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    fn guard(&self, connection: Connection, created_at: Instant) -> PoolGuard {
        PoolGuard {
            connection: Some(connection),
            created_at,
            pool: self.available.clone(),
            total_connections: self.total_connections.clone(),
        }
    }

    /// Pop a healthy idle connection, dropping expired ones on the way
    async fn try_get_available(&self) -> Option<PooledConnection> {
        let mut available = self.available.lock().await;

        let mut kept = VecDeque::with_capacity(available.len());
        let mut removed = 0usize;
        while let Some(pooled) = available.pop_front() {
            if pooled.is_expired(self.config.max_lifetime)
                || pooled.is_idle_too_long(self.config.idle_timeout)
                || !pooled.connection.is_reusable()
            {
                removed += 1;
            } else {
                kept.push_back(pooled);
            }
        }
        *available = kept;

        if removed > 0 {
            self.total_connections.fetch_sub(removed, Ordering::SeqCst);
        }

        available.pop_front()
    }

    /// Open a new connection if under the limit
    async fn try_create_connection(&self) -> Result<Option<Connection>> {
        let max = self.config.max_connections;
        let reserved = self
            .total_connections
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |total| {
                (total < max).then_some(total + 1)
            })
            .is_ok();
        if !reserved {
            return Ok(None);
        }

        match self.open().await {
            Ok(connection) => Ok(Some(connection)),
            Err(err) => {
                self.total_connections.fetch_sub(1, Ordering::SeqCst);
                Err(err)
            }
        }
    }

    async fn open(&self) -> Result<Connection> {
        let raw = tokio::time::timeout(self.config.connect_timeout, self.backend.connect())
            .await
            .map_err(|_| {
                StoreError::StoreUnavailable(format!(
                    "connecting to {} timed out",
                    self.backend.describe()
                ))
            })??;
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        event!(Level::TRACE, connection_id = id, "store connection opened");
        Ok(Connection::new(id, raw))
    }

    /// Ensure minimum number of connections
    async fn ensure_min_connections(&self) -> Result<()> {
        while self.total_connections.load(Ordering::SeqCst) < self.config.min_connections {
            let connection = self.open().await?;
            self.total_connections.fetch_add(1, Ordering::SeqCst);
            self.available
                .lock()
                .await
                .push_back(PooledConnection::new(connection, Instant::now()));
        }

        Ok(())
    }

    /// Get pool statistics
    pub async fn stats(&self) -> PoolStats {
        let available = self.available.lock().await;
        let total = self.total_connections.load(Ordering::SeqCst);

        PoolStats {
            total_connections: total,
            available_connections: available.len(),
            active_connections: total.saturating_sub(available.len()),
            max_connections: self.config.max_connections,
        }
    }
}

/// Connection pool statistics
#[derive(Debug, Clone)]
pub struct PoolStats {
    pub total_connections: usize,
    pub available_connections: usize,
    pub active_connections: usize,
    pub max_connections: usize,
}

impl std::fmt::Display for PoolStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Pool Stats: {}/{} active, {} available, max {}",
            self.active_connections,
            self.total_connections,
            self.available_connections,
            self.max_connections
        )
    }
}

/// RAII guard for pooled connections
///
/// Returns the connection to the pool when released or dropped. A
/// connection still holding WATCH state, or one that failed mid-command, is
/// closed instead of being returned.
pub struct PoolGuard {
    connection: Option<Connection>,
    created_at: Instant,
    pool: Arc<Mutex<VecDeque<PooledConnection>>>,
    total_connections: Arc<AtomicUsize>,
}

impl PoolGuard {
    /// Get a reference to the connection
    pub fn connection(&mut self) -> Result<&mut Connection> {
        self.connection.as_mut().ok_or_else(|| {
            StoreError::ExecutionError("Connection already returned to pool".into())
        })
    }

    /// Return the connection to the pool, clearing any WATCH first.
    pub async fn release(mut self) -> Result<()> {
        let Some(mut connection) = self.connection.take() else {
            return Ok(());
        };

        if connection.is_watching() {
            if let Err(err) = connection.unwatch().await {
                self.drop_connection(connection.id(), "unwatch failed");
                return Err(err);
            }
        }

        if !connection.is_reusable() {
            self.drop_connection(connection.id(), "connection broken");
            return Ok(());
        }

        let mut pool = self.pool.lock().await;
        pool.push_back(PooledConnection::new(connection, self.created_at));
        Ok(())
    }

    /// Close the connection without returning it, e.g. after a command was
    /// interrupted and its reply may still be in flight.
    pub fn discard(mut self) {
        if let Some(mut connection) = self.connection.take() {
            connection.mark_broken();
            self.drop_connection(connection.id(), "discarded");
        }
    }

    fn drop_connection(&self, id: u64, reason: &'static str) {
        event!(Level::DEBUG, connection_id = id, reason, "store connection closed");
        self.total_connections.fetch_sub(1, Ordering::SeqCst);
    }
}

impl Drop for PoolGuard {
    fn drop(&mut self) {
        let Some(connection) = self.connection.take() else {
            return;
        };

        // UNWATCH needs an await, which Drop cannot do.
        if !connection.is_reusable() {
            self.drop_connection(connection.id(), "dropped while watching or broken");
            return;
        }

        let id = connection.id();
        if let Ok(mut pool) = self.pool.try_lock() {
            pool.push_back(PooledConnection::new(connection, self.created_at));
        } else {
            event!(
                Level::WARN,
                connection_id = id,
                "pool lock busy on drop, closing connection; use PoolGuard::release"
            );
            drop(connection);
            self.total_connections.fetch_sub(1, Ordering::SeqCst);
        }
    }
}
