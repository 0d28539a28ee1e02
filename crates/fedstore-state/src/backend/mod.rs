//! Backend connections and the atomic procedures they run.
//!
//! A [`StoreBackend`] declares its [`Capabilities`] and opens
//! [`BackendConnection`]s. Each method on a connection is one atomic
//! procedure against a single record (or a read of one table). Backends
//! that track reservation homes expose them through
//! [`BackendConnection::reservations`].
//!
//! ```text
//! StoreBackend::connect(credentials)
//!   → Box<dyn BackendConnection>     (owned by the ConnectionManager)
//!     → register_sub_cluster / insert_application_home_if_absent / ...
//!     → reservations() → Option<&mut dyn ReservationProcedures>
//! ```

pub mod memory;
pub mod redb;

use std::sync::Arc;

use semver::Version;

use crate::capability::Capabilities;
use crate::config::{BackendConfig, Credentials, Driver, ReregistrationPolicy};
use crate::error::BackendError;
use crate::types::*;

pub use self::memory::MemoryBackend;
pub use self::redb::RedbBackend;

/// A storage backend: a capability declaration plus a connection factory.
pub trait StoreBackend: Send + Sync {
    /// Short identifier used in logs and errors.
    fn name(&self) -> &'static str;

    /// Operations this backend implements.
    fn capabilities(&self) -> Capabilities;

    /// Establish a new physical connection. May block.
    fn connect(&self, credentials: &Credentials) -> Result<Box<dyn BackendConnection>, BackendError>;
}

/// One live connection to a backend.
///
/// Connections are used by one caller at a time; the connection manager
/// guarantees exclusive access.
pub trait BackendConnection: Send {
    /// Cheap liveness check for idle connections.
    fn ping(&mut self) -> bool {
        true
    }

    /// Release backend resources. Called once before the connection is dropped.
    fn close(&mut self) {}

    // ── Sub-clusters ───────────────────────────────────────────────

    /// Upsert keyed by sub-cluster id, decided by [`crate::rules::decide_registration`].
    fn register_sub_cluster(
        &mut self,
        info: &SubClusterInfo,
        policy: ReregistrationPolicy,
    ) -> Result<RegisterOutcome, BackendError>;

    /// Atomically apply a conditional state change to one sub-cluster.
    fn apply_state_change(
        &mut self,
        sub_cluster_id: &str,
        change: &StateChange,
    ) -> Result<StateChangeOutcome, BackendError>;

    fn get_sub_cluster(&mut self, sub_cluster_id: &str) -> Result<Option<SubClusterInfo>, BackendError>;

    /// All sub-clusters ordered by id.
    fn list_sub_clusters(&mut self) -> Result<Vec<SubClusterInfo>, BackendError>;

    // ── Application homes ──────────────────────────────────────────

    /// Insert `home` unless a record exists; return the effective record.
    fn insert_application_home_if_absent(
        &mut self,
        home: &ApplicationHomeSubCluster,
    ) -> Result<ApplicationHomeSubCluster, BackendError>;

    fn get_application_home(
        &mut self,
        application_id: &str,
    ) -> Result<Option<ApplicationHomeSubCluster>, BackendError>;

    fn list_application_homes(&mut self) -> Result<Vec<ApplicationHomeSubCluster>, BackendError>;

    /// Move an existing application to a new home, keeping its create time.
    /// Returns `false` if no record exists.
    fn update_application_home(
        &mut self,
        application_id: &str,
        home_sub_cluster: &str,
    ) -> Result<bool, BackendError>;

    // ── Policies ───────────────────────────────────────────────────

    fn put_policy(&mut self, policy: &SubClusterPolicyConfiguration) -> Result<(), BackendError>;

    fn get_policy(&mut self, queue: &str) -> Result<Option<SubClusterPolicyConfiguration>, BackendError>;

    fn list_policies(&mut self) -> Result<Vec<SubClusterPolicyConfiguration>, BackendError>;

    // ── Version ────────────────────────────────────────────────────

    /// Schema version stored by the backend.
    fn load_version(&mut self) -> Result<Version, BackendError>;

    // ── Optional procedure groups ──────────────────────────────────

    /// Reservation-home procedures, if this connection implements them.
    fn reservations(&mut self) -> Option<&mut dyn ReservationProcedures> {
        None
    }
}

/// Reservation-home procedures. Same insert-if-absent pattern as
/// application homes, plus first-class update and delete.
pub trait ReservationProcedures {
    fn insert_reservation_home_if_absent(
        &mut self,
        home: &ReservationHomeSubCluster,
    ) -> Result<ReservationHomeSubCluster, BackendError>;

    fn get_reservation_home(
        &mut self,
        reservation_id: &str,
    ) -> Result<Option<ReservationHomeSubCluster>, BackendError>;

    fn list_reservation_homes(&mut self) -> Result<Vec<ReservationHomeSubCluster>, BackendError>;

    /// Returns `false` if no record exists.
    fn update_reservation_home(
        &mut self,
        reservation_id: &str,
        home_sub_cluster: &str,
    ) -> Result<bool, BackendError>;

    /// Returns `false` if no record exists.
    fn delete_reservation_home(&mut self, reservation_id: &str) -> Result<bool, BackendError>;
}

/// Build the backend named by `config.driver`.
pub fn from_config(config: &BackendConfig) -> Result<Arc<dyn StoreBackend>, BackendError> {
    match config.driver {
        Driver::Redb => Ok(Arc::new(RedbBackend::from_url(&config.url)?)),
        Driver::Memory => Ok(Arc::new(MemoryBackend::new())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capability::Operation;

    #[test]
    fn from_config_picks_driver() {
        let memory = from_config(&BackendConfig {
            driver: Driver::Memory,
            ..BackendConfig::default()
        })
        .unwrap();
        assert_eq!(memory.name(), "memory");
        assert!(memory.capabilities().supports_reservations());

        let redb = from_config(&BackendConfig::default()).unwrap();
        assert_eq!(redb.name(), "redb");
        assert!(!redb.capabilities().supports(Operation::AddReservationHome));
    }
}
