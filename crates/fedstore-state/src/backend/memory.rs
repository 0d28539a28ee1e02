//! In-process backend.
//!
//! All connections opened from one [`MemoryBackend`] share the same
//! tables behind a mutex, so each procedure is atomic with respect to
//! every other connection. Supports every operation, including
//! reservation homes.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};

use semver::Version;

use super::{BackendConnection, ReservationProcedures, StoreBackend};
use crate::capability::Capabilities;
use crate::config::{Credentials, ReregistrationPolicy};
use crate::error::BackendError;
use crate::rules::{self, decide_registration, reconcile_version};
use crate::types::*;

#[derive(Default)]
struct Tables {
    sub_clusters: BTreeMap<SubClusterId, SubClusterInfo>,
    application_homes: BTreeMap<ApplicationId, ApplicationHomeSubCluster>,
    reservation_homes: BTreeMap<ReservationId, ReservationHomeSubCluster>,
    policies: BTreeMap<String, SubClusterPolicyConfiguration>,
    version: Option<Version>,
}

/// Shared-map backend.
#[derive(Clone)]
pub struct MemoryBackend {
    tables: Arc<Mutex<Tables>>,
    capabilities: Capabilities,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self {
            tables: Arc::new(Mutex::new(Tables::default())),
            capabilities: Capabilities::all(),
        }
    }

    /// Declare a narrower capability set than the backend implements.
    pub fn with_capabilities(mut self, capabilities: Capabilities) -> Self {
        self.capabilities = capabilities;
        self
    }
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl StoreBackend for MemoryBackend {
    fn name(&self) -> &'static str {
        "memory"
    }

    fn capabilities(&self) -> Capabilities {
        self.capabilities
    }

    fn connect(&self, _credentials: &Credentials) -> Result<Box<dyn BackendConnection>, BackendError> {
        let conn = MemoryConnection {
            tables: Arc::clone(&self.tables),
        };
        {
            let mut tables = conn.tables()?;
            let version = reconcile_version(tables.version.clone())?;
            tables.version = Some(version);
        }
        Ok(Box::new(conn))
    }
}

/// A handle on the shared tables.
pub struct MemoryConnection {
    tables: Arc<Mutex<Tables>>,
}

impl MemoryConnection {
    fn tables(&self) -> Result<MutexGuard<'_, Tables>, BackendError> {
        self.tables
            .lock()
            .map_err(|_| BackendError::Storage("memory tables poisoned".to_string()))
    }
}

impl BackendConnection for MemoryConnection {
    fn ping(&mut self) -> bool {
        !self.tables.is_poisoned()
    }

    fn register_sub_cluster(
        &mut self,
        info: &SubClusterInfo,
        policy: ReregistrationPolicy,
    ) -> Result<RegisterOutcome, BackendError> {
        let mut tables = self.tables()?;
        let outcome = decide_registration(tables.sub_clusters.get(&info.sub_cluster_id), info, policy);
        if outcome.writes() {
            tables
                .sub_clusters
                .insert(info.sub_cluster_id.clone(), info.clone());
        }
        Ok(outcome)
    }

    fn apply_state_change(
        &mut self,
        sub_cluster_id: &str,
        change: &StateChange,
    ) -> Result<StateChangeOutcome, BackendError> {
        let mut tables = self.tables()?;
        let Some(record) = tables.sub_clusters.get_mut(sub_cluster_id) else {
            return Ok(StateChangeOutcome::NotFound);
        };
        if rules::apply_state_change(record, change) {
            Ok(StateChangeOutcome::Applied(record.clone()))
        } else {
            Ok(StateChangeOutcome::Skipped(record.clone()))
        }
    }

    fn get_sub_cluster(&mut self, sub_cluster_id: &str) -> Result<Option<SubClusterInfo>, BackendError> {
        Ok(self.tables()?.sub_clusters.get(sub_cluster_id).cloned())
    }

    fn list_sub_clusters(&mut self) -> Result<Vec<SubClusterInfo>, BackendError> {
        Ok(self.tables()?.sub_clusters.values().cloned().collect())
    }

    fn insert_application_home_if_absent(
        &mut self,
        home: &ApplicationHomeSubCluster,
    ) -> Result<ApplicationHomeSubCluster, BackendError> {
        let mut tables = self.tables()?;
        Ok(tables
            .application_homes
            .entry(home.application_id.clone())
            .or_insert_with(|| home.clone())
            .clone())
    }

    fn get_application_home(
        &mut self,
        application_id: &str,
    ) -> Result<Option<ApplicationHomeSubCluster>, BackendError> {
        Ok(self.tables()?.application_homes.get(application_id).cloned())
    }

    fn list_application_homes(&mut self) -> Result<Vec<ApplicationHomeSubCluster>, BackendError> {
        Ok(self.tables()?.application_homes.values().cloned().collect())
    }

    fn update_application_home(
        &mut self,
        application_id: &str,
        home_sub_cluster: &str,
    ) -> Result<bool, BackendError> {
        let mut tables = self.tables()?;
        match tables.application_homes.get_mut(application_id) {
            Some(home) => {
                home.home_sub_cluster = home_sub_cluster.to_string();
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn put_policy(&mut self, policy: &SubClusterPolicyConfiguration) -> Result<(), BackendError> {
        self.tables()?
            .policies
            .insert(policy.queue.clone(), policy.clone());
        Ok(())
    }

    fn get_policy(&mut self, queue: &str) -> Result<Option<SubClusterPolicyConfiguration>, BackendError> {
        Ok(self.tables()?.policies.get(queue).cloned())
    }

    fn list_policies(&mut self) -> Result<Vec<SubClusterPolicyConfiguration>, BackendError> {
        Ok(self.tables()?.policies.values().cloned().collect())
    }

    fn load_version(&mut self) -> Result<Version, BackendError> {
        self.tables()?
            .version
            .clone()
            .ok_or_else(|| BackendError::Storage("schema version missing".to_string()))
    }

    fn reservations(&mut self) -> Option<&mut dyn ReservationProcedures> {
        Some(self)
    }
}

impl ReservationProcedures for MemoryConnection {
    fn insert_reservation_home_if_absent(
        &mut self,
        home: &ReservationHomeSubCluster,
    ) -> Result<ReservationHomeSubCluster, BackendError> {
        let mut tables = self.tables()?;
        Ok(tables
            .reservation_homes
            .entry(home.reservation_id.clone())
            .or_insert_with(|| home.clone())
            .clone())
    }

    fn get_reservation_home(
        &mut self,
        reservation_id: &str,
    ) -> Result<Option<ReservationHomeSubCluster>, BackendError> {
        Ok(self.tables()?.reservation_homes.get(reservation_id).cloned())
    }

    fn list_reservation_homes(&mut self) -> Result<Vec<ReservationHomeSubCluster>, BackendError> {
        Ok(self.tables()?.reservation_homes.values().cloned().collect())
    }

    fn update_reservation_home(
        &mut self,
        reservation_id: &str,
        home_sub_cluster: &str,
    ) -> Result<bool, BackendError> {
        let mut tables = self.tables()?;
        match tables.reservation_homes.get_mut(reservation_id) {
            Some(home) => {
                home.home_sub_cluster = home_sub_cluster.to_string();
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn delete_reservation_home(&mut self, reservation_id: &str) -> Result<bool, BackendError> {
        Ok(self
            .tables()?
            .reservation_homes
            .remove(reservation_id)
            .is_some())
    }
}
