//! fedstore-metrics — observability for the federation state store.
//!
//! Counts logical store operations and tracks how many backend
//! connections were created over the store's lifetime. The
//! connections-created gauge is the observable proof that the hot path
//! reuses its connection instead of re-opening one per request.
//!
//! # Architecture
//!
//! ```text
//! StoreMetrics
//!   ├── record_operation() ← called by the store facade per call
//!   ├── connection_opened() / connection_closed() ← connection manager
//!   └── snapshot() → MetricsSnapshot
//!
//! Prometheus exposition
//!   └── render_prometheus() → text/plain for a /metrics endpoint
//! ```

pub mod collector;
pub mod prometheus;

pub use collector::{MetricsSnapshot, OperationSnapshot, StoreMetrics};
pub use prometheus::render_prometheus;
