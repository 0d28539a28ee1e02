//! Per-operation counters and connection gauges.
//!
//! Counters are atomics; the per-operation map sits behind an async
//! `RwLock` and only takes the write lock the first time an operation
//! name is seen.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::RwLock;
use tracing::debug;

/// Counters for a single operation type.
struct OperationCounters {
    successes: AtomicU64,
    failures: AtomicU64,
    /// Cumulative latency across all calls (microseconds).
    latency_micros: AtomicU64,
}

impl OperationCounters {
    fn new() -> Self {
        Self {
            successes: AtomicU64::new(0),
            failures: AtomicU64::new(0),
            latency_micros: AtomicU64::new(0),
        }
    }
}

/// Point-in-time view of one operation's counters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OperationSnapshot {
    pub operation: String,
    pub successes: u64,
    pub failures: u64,
    pub latency_micros_total: u64,
}

/// Point-in-time view of all store metrics.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    /// Per-operation counters, sorted by operation name.
    pub operations: Vec<OperationSnapshot>,
    /// Physical backend connections created over the store's lifetime.
    pub connections_created: u64,
    /// Connections currently open (idle or checked out).
    pub connections_live: u64,
}

/// Collects operation counts and connection gauges for one store instance.
///
/// Owned by the store and shared with its connection manager via `Arc`,
/// so two stores in the same process never share counters.
pub struct StoreMetrics {
    operations: RwLock<HashMap<&'static str, Arc<OperationCounters>>>,
    connections_created: AtomicU64,
    connections_live: AtomicU64,
}

impl StoreMetrics {
    /// Create an empty metrics collector.
    pub fn new() -> Self {
        Self {
            operations: RwLock::new(HashMap::new()),
            connections_created: AtomicU64::new(0),
            connections_live: AtomicU64::new(0),
        }
    }

    async fn counters(&self, operation: &'static str) -> Arc<OperationCounters> {
        if let Some(c) = self.operations.read().await.get(operation) {
            return Arc::clone(c);
        }
        let mut operations = self.operations.write().await;
        Arc::clone(
            operations
                .entry(operation)
                .or_insert_with(|| Arc::new(OperationCounters::new())),
        )
    }

    /// Record the outcome of one logical store operation.
    pub async fn record_operation(&self, operation: &'static str, elapsed: Duration, success: bool) {
        let counters = self.counters(operation).await;
        if success {
            counters.successes.fetch_add(1, Ordering::Relaxed);
        } else {
            counters.failures.fetch_add(1, Ordering::Relaxed);
        }
        let micros = u64::try_from(elapsed.as_micros()).unwrap_or(u64::MAX);
        counters.latency_micros.fetch_add(micros, Ordering::Relaxed);
    }

    /// Record that a new physical backend connection was established.
    pub fn connection_opened(&self) {
        let created = self.connections_created.fetch_add(1, Ordering::Relaxed) + 1;
        self.connections_live.fetch_add(1, Ordering::Relaxed);
        debug!(connections_created = created, "backend connection opened");
    }

    /// Record that a backend connection was closed or discarded.
    pub fn connection_closed(&self) {
        // Saturating: a close without a matching open must not wrap.
        let _ = self
            .connections_live
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |live| {
                Some(live.saturating_sub(1))
            });
    }

    /// Total physical connections created so far.
    pub fn connections_created(&self) -> u64 {
        self.connections_created.load(Ordering::Relaxed)
    }

    /// Connections currently open.
    pub fn connections_live(&self) -> u64 {
        self.connections_live.load(Ordering::Relaxed)
    }

    /// Successful calls recorded for an operation.
    pub async fn successes(&self, operation: &str) -> u64 {
        self.operations
            .read()
            .await
            .get(operation)
            .map(|c| c.successes.load(Ordering::Relaxed))
            .unwrap_or(0)
    }

    /// Failed calls recorded for an operation.
    pub async fn failures(&self, operation: &str) -> u64 {
        self.operations
            .read()
            .await
            .get(operation)
            .map(|c| c.failures.load(Ordering::Relaxed))
            .unwrap_or(0)
    }

    /// Take a consistent-enough snapshot of every counter.
    pub async fn snapshot(&self) -> MetricsSnapshot {
        let operations = self.operations.read().await;
        let mut ops: Vec<OperationSnapshot> = operations
            .iter()
            .map(|(name, c)| OperationSnapshot {
                operation: (*name).to_string(),
                successes: c.successes.load(Ordering::Relaxed),
                failures: c.failures.load(Ordering::Relaxed),
                latency_micros_total: c.latency_micros.load(Ordering::Relaxed),
            })
            .collect();
        ops.sort_by(|a, b| a.operation.cmp(&b.operation));

        MetricsSnapshot {
            operations: ops,
            connections_created: self.connections_created(),
            connections_live: self.connections_live(),
        }
    }
}

impl Default for StoreMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for StoreMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoreMetrics")
            .field("connections_created", &self.connections_created())
            .field("connections_live", &self.connections_live())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn record_success_and_failure() {
        let metrics = StoreMetrics::new();
        metrics
            .record_operation("get_sub_cluster", Duration::from_micros(10), true)
            .await;
        metrics
            .record_operation("get_sub_cluster", Duration::from_micros(5), false)
            .await;

        assert_eq!(metrics.successes("get_sub_cluster").await, 1);
        assert_eq!(metrics.failures("get_sub_cluster").await, 1);
    }

    #[tokio::test]
    async fn unknown_operation_reads_zero() {
        let metrics = StoreMetrics::new();
        assert_eq!(metrics.successes("nope").await, 0);
        assert_eq!(metrics.failures("nope").await, 0);
    }

    #[test]
    fn connection_gauges() {
        let metrics = StoreMetrics::new();
        metrics.connection_opened();
        metrics.connection_opened();
        metrics.connection_closed();

        assert_eq!(metrics.connections_created(), 2);
        assert_eq!(metrics.connections_live(), 1);
    }

    #[test]
    fn closing_without_open_does_not_underflow() {
        let metrics = StoreMetrics::new();
        metrics.connection_closed();
        assert_eq!(metrics.connections_live(), 0);
    }

    #[tokio::test]
    async fn snapshot_sorted_with_latency() {
        let metrics = StoreMetrics::new();
        metrics
            .record_operation("register_sub_cluster", Duration::from_micros(30), true)
            .await;
        metrics
            .record_operation("add_application_home", Duration::from_micros(12), true)
            .await;
        metrics
            .record_operation("add_application_home", Duration::from_micros(8), true)
            .await;
        metrics.connection_opened();

        let snap = metrics.snapshot().await;
        assert_eq!(snap.connections_created, 1);
        assert_eq!(snap.connections_live, 1);
        assert_eq!(snap.operations.len(), 2);
        assert_eq!(snap.operations[0].operation, "add_application_home");
        assert_eq!(snap.operations[0].successes, 2);
        assert_eq!(snap.operations[0].latency_micros_total, 20);
        assert_eq!(snap.operations[1].operation, "register_sub_cluster");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_recording() {
        let metrics = Arc::new(StoreMetrics::new());
        let mut handles = Vec::new();
        for _ in 0..8 {
            let m = Arc::clone(&metrics);
            handles.push(tokio::spawn(async move {
                for _ in 0..50 {
                    m.record_operation("get_application_home", Duration::ZERO, true)
                        .await;
                }
            }));
        }
        for h in handles {
            h.await.unwrap();
        }
        assert_eq!(metrics.successes("get_application_home").await, 400);
    }
}
