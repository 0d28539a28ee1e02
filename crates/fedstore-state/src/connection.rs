//! Lazily created, reused backend connections.
//!
//! # Architecture
//!
//! ```text
//! with_connection(procedure)
//!   → acquire a pool permit (bounded by pool_size, waits up to acquire_timeout)
//!     → idle connection available and healthy → reuse it
//!     → none available → backend.connect() with retries → new connection
//!   → run procedure on the blocking pool (bounded by call_timeout)
//!   → return the connection to the idle set (or discard it on disconnect/timeout)
//!   → procedure lost its connection → run it again on a new one (up to max_retries)
//! ```
//!
//! With the default pool size of one, the store opens exactly one
//! physical connection for its whole lifetime and serializes every
//! procedure through it.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use fedstore_metrics::StoreMetrics;
use tokio::sync::{Mutex, Semaphore};
use tracing::{debug, info, warn};

use crate::backend::{BackendConnection, StoreBackend};
use crate::config::{ConnectionConfig, Credentials};
use crate::error::BackendError;

/// A backend connection with tracking metadata.
///
/// Dropping it closes the underlying connection and updates the live
/// gauge, whichever path discards it.
struct PooledConnection {
    id: u64,
    created_at: Instant,
    last_used: Instant,
    conn: Box<dyn BackendConnection>,
    metrics: Arc<StoreMetrics>,
}

impl Drop for PooledConnection {
    fn drop(&mut self) {
        self.conn.close();
        self.metrics.connection_closed();
        debug!(
            connection = self.id,
            age_ms = self.created_at.elapsed().as_millis() as u64,
            "backend connection closed"
        );
    }
}

/// Settings the manager needs from the store config.
#[derive(Clone, Debug)]
pub struct ConnectionSettings {
    pub pool_size: usize,
    pub max_retries: u32,
    pub retry_interval: Duration,
    pub acquire_timeout: Duration,
    pub call_timeout: Duration,
    pub credentials: Credentials,
}

impl ConnectionSettings {
    pub fn new(config: &ConnectionConfig, credentials: Credentials) -> Self {
        Self {
            pool_size: config.pool_size.max(1),
            max_retries: config.max_retries,
            retry_interval: config.retry_interval(),
            acquire_timeout: config.acquire_timeout(),
            call_timeout: config.call_timeout(),
            credentials,
        }
    }
}

/// Owns the store's backend connections.
pub struct ConnectionManager {
    backend: Arc<dyn StoreBackend>,
    settings: ConnectionSettings,
    /// Connections available for checkout.
    idle: Mutex<Vec<PooledConnection>>,
    /// Bounds open connections to `pool_size`; one permit per checkout.
    permits: Arc<Semaphore>,
    metrics: Arc<StoreMetrics>,
    next_id: AtomicU64,
    /// When true, new checkouts are rejected.
    closed: AtomicBool,
}

impl ConnectionManager {
    pub fn new(
        backend: Arc<dyn StoreBackend>,
        settings: ConnectionSettings,
        metrics: Arc<StoreMetrics>,
    ) -> Self {
        Self {
            permits: Arc::new(Semaphore::new(settings.pool_size)),
            backend,
            settings,
            idle: Mutex::new(Vec::new()),
            metrics,
            next_id: AtomicU64::new(1),
            closed: AtomicBool::new(false),
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Relaxed)
    }

    /// Number of idle connections waiting for reuse.
    pub async fn idle_count(&self) -> usize {
        self.idle.lock().await.len()
    }

    /// Run `procedure` on a live connection with exclusive access.
    ///
    /// A procedure that loses its connection is run again on a fresh one,
    /// up to `max_retries` times; every procedure is an upsert or an
    /// insert-if-absent, so repeating it is safe.
    ///
    /// Connection-class failures come back as [`BackendError::Disconnected`],
    /// [`BackendError::Timeout`] or [`BackendError::Closed`]; everything
    /// else is the procedure's own result.
    pub async fn with_connection<T, F>(&self, procedure: F) -> Result<T, BackendError>
    where
        T: Send + 'static,
        F: Fn(&mut dyn BackendConnection) -> Result<T, BackendError> + Send + Sync + 'static,
    {
        let procedure = Arc::new(procedure);
        let attempts = self.settings.max_retries.saturating_add(1);
        let mut attempt = 1;

        loop {
            match self.run_once(Arc::clone(&procedure)).await? {
                Err(BackendError::Disconnected(cause)) if attempt < attempts && !self.is_closed() => {
                    warn!(
                        attempt,
                        max_attempts = attempts,
                        error = %cause,
                        "procedure lost its connection, retrying"
                    );
                    attempt += 1;
                    tokio::time::sleep(self.settings.retry_interval).await;
                }
                result => return result,
            }
        }
    }

    /// One checkout, run and release cycle.
    ///
    /// The outer error means no connection could be used; the inner result
    /// is whatever the procedure returned.
    async fn run_once<T, F>(&self, procedure: Arc<F>) -> Result<Result<T, BackendError>, BackendError>
    where
        T: Send + 'static,
        F: Fn(&mut dyn BackendConnection) -> Result<T, BackendError> + Send + Sync + 'static,
    {
        if self.is_closed() {
            return Err(BackendError::Closed);
        }

        let permit = match tokio::time::timeout(
            self.settings.acquire_timeout,
            Arc::clone(&self.permits).acquire_owned(),
        )
        .await
        {
            Ok(Ok(permit)) => permit,
            Ok(Err(_)) => return Err(BackendError::Closed),
            Err(_) => {
                return Err(BackendError::Timeout(format!(
                    "no connection available within {:?}",
                    self.settings.acquire_timeout
                )));
            }
        };

        let mut pooled = self.checkout().await?;
        pooled.last_used = Instant::now();
        let id = pooled.id;

        // The permit travels with the connection: if the caller stops
        // waiting, the slot stays taken until the task drops the connection.
        let task = tokio::task::spawn_blocking(move || {
            let permit = permit;
            let mut pooled = pooled;
            let result = (*procedure)(pooled.conn.as_mut());
            (pooled, result, permit)
        });

        match tokio::time::timeout(self.settings.call_timeout, task).await {
            Ok(Ok((pooled, result, permit))) => {
                if matches!(result, Err(BackendError::Disconnected(_))) {
                    warn!(connection = id, "discarding disconnected backend connection");
                    drop(pooled);
                } else {
                    self.release(pooled).await;
                }
                drop(permit);
                Ok(result)
            }
            Ok(Err(join_err)) => {
                // The connection and its permit went down with the panicking task.
                warn!(connection = id, error = %join_err, "procedure panicked");
                Err(BackendError::Storage(format!("procedure failed: {join_err}")))
            }
            Err(_) => {
                // The blocking task still owns the connection and its permit;
                // both are released when the task finishes.
                warn!(
                    connection = id,
                    timeout = ?self.settings.call_timeout,
                    "procedure timed out, abandoning connection"
                );
                Err(BackendError::Timeout(format!(
                    "procedure did not complete within {:?}",
                    self.settings.call_timeout
                )))
            }
        }
    }

    /// Take an idle connection or open a new one. Caller holds a permit.
    async fn checkout(&self) -> Result<PooledConnection, BackendError> {
        loop {
            let candidate = self.idle.lock().await.pop();
            let Some(mut pooled) = candidate else {
                break;
            };
            if pooled.conn.ping() {
                debug!(
                    connection = pooled.id,
                    idle_ms = pooled.last_used.elapsed().as_millis() as u64,
                    "reusing idle backend connection"
                );
                return Ok(pooled);
            }
            warn!(connection = pooled.id, "discarding unhealthy idle connection");
        }
        self.connect_with_retry().await
    }

    /// Open a new physical connection, retrying transient failures.
    async fn connect_with_retry(&self) -> Result<PooledConnection, BackendError> {
        let attempts = self.settings.max_retries.saturating_add(1);
        let mut last_error = None;

        for attempt in 1..=attempts {
            let backend = Arc::clone(&self.backend);
            let credentials = self.settings.credentials.clone();
            let result = tokio::task::spawn_blocking(move || backend.connect(&credentials))
                .await
                .map_err(|e| BackendError::Disconnected(format!("connect task failed: {e}")))?;

            match result {
                Ok(conn) => {
                    let id = self.next_id.fetch_add(1, Ordering::Relaxed);
                    self.metrics.connection_opened();
                    info!(
                        connection = id,
                        backend = self.backend.name(),
                        attempt,
                        "backend connection established"
                    );
                    let now = Instant::now();
                    return Ok(PooledConnection {
                        id,
                        created_at: now,
                        last_used: now,
                        conn,
                        metrics: Arc::clone(&self.metrics),
                    });
                }
                Err(e) if e.is_transient() => {
                    warn!(
                        backend = self.backend.name(),
                        attempt,
                        max_attempts = attempts,
                        error = %e,
                        "backend connection failed"
                    );
                    last_error = Some(e);
                    if attempt < attempts {
                        tokio::time::sleep(self.settings.retry_interval).await;
                    }
                }
                Err(e) => return Err(e),
            }
        }

        let cause = last_error.map(|e| e.to_string()).unwrap_or_default();
        Err(BackendError::Disconnected(format!(
            "gave up after {attempts} attempts: {cause}"
        )))
    }

    /// Return a connection to the idle set, or close it if the manager is closed.
    async fn release(&self, pooled: PooledConnection) {
        if self.is_closed() {
            drop(pooled);
            return;
        }
        let mut idle = self.idle.lock().await;
        idle.push(pooled);
    }

    /// Stop accepting checkouts and close every idle connection.
    ///
    /// Connections checked out at the time are closed when their
    /// procedure returns.
    pub async fn close(&self) {
        self.closed.store(true, Ordering::Relaxed);
        let drained: Vec<PooledConnection> = self.idle.lock().await.drain(..).collect();
        info!(closed = drained.len(), "connection manager closed");
        drop(drained);
    }
}

impl std::fmt::Debug for ConnectionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionManager")
            .field("backend", &self.backend.name())
            .field("settings", &self.settings)
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}
