//! fedstore-state — the federation state store.
//!
//! Tracks which sub-clusters participate in a federation and their
//! health, and which sub-cluster is home to each application and
//! capacity reservation. A stateless router consults it on every
//! request.
//!
//! # Architecture
//!
//! ```text
//! FederationStateStore (store.rs)
//!   ├── Capabilities ← declared by the backend, checked before dispatch
//!   ├── validate     ← ids, endpoints, registration state
//!   └── ConnectionManager (connection.rs)
//!         └── StoreBackend::connect → BackendConnection
//!               ├── RedbBackend   (durable, no reservation homes)
//!               └── MemoryBackend (ephemeral, every operation)
//! ```
//!
//! Both backends share the record-level rules in [`rules`], so
//! registration and state-change semantics do not depend on the backend.

pub mod backend;
pub mod capability;
pub mod config;
pub mod connection;
pub mod error;
pub mod rules;
pub mod store;
pub mod tables;
pub mod types;
pub mod validate;

pub use backend::{MemoryBackend, RedbBackend, StoreBackend};
pub use capability::{Capabilities, Operation};
pub use config::{
    BackendConfig, ConfigError, ConnectionConfig, Credentials, Driver, OwnershipMode,
    PolicyConfig, ReregistrationPolicy, StoreConfig,
};
pub use error::{BackendError, StoreError, StoreResult};
pub use store::FederationStateStore;
pub use types::*;
