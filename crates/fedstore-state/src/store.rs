//! The public contract of the federation state store.
//!
//! Every operation follows the same path:
//!
//! ```text
//! capability check → input validation → ConnectionManager::with_connection
//!   → BackendConnection procedure → outcome/error mapping → metrics
//! ```
//!
//! Unsupported or malformed calls never reach the connection manager, so
//! they never open a backend connection.

use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use fedstore_metrics::StoreMetrics;
use semver::Version;
use tracing::{debug, info};

use crate::backend::{self, BackendConnection, ReservationProcedures, StoreBackend};
use crate::capability::{Capabilities, Operation};
use crate::config::{OwnershipMode, PolicyConfig, StoreConfig};
use crate::connection::{ConnectionManager, ConnectionSettings};
use crate::error::{BackendError, StoreError, StoreResult};
use crate::rules::SCHEMA_VERSION;
use crate::types::*;
use crate::validate;

/// The federation state store.
///
/// Cheap to share behind an `Arc`; all methods take `&self`.
pub struct FederationStateStore {
    backend: Arc<dyn StoreBackend>,
    capabilities: Capabilities,
    connections: ConnectionManager,
    policy: PolicyConfig,
    metrics: Arc<StoreMetrics>,
}

impl FederationStateStore {
    /// Build the backend named in `config` and wrap it in a store.
    ///
    /// No connection is opened until the first operation.
    pub fn open(config: StoreConfig) -> StoreResult<Self> {
        config
            .validate()
            .map_err(|e| StoreError::Validation(e.to_string()))?;
        let backend = backend::from_config(&config.backend).map_err(|e| match e {
            BackendError::Disconnected(msg) | BackendError::Timeout(msg) => {
                StoreError::Connection(msg)
            }
            other => StoreError::Backend(other.to_string()),
        })?;
        Ok(Self::with_backend(backend, config))
    }

    /// Wrap an already constructed backend.
    pub fn with_backend(backend: Arc<dyn StoreBackend>, config: StoreConfig) -> Self {
        let metrics = Arc::new(StoreMetrics::new());
        let settings = ConnectionSettings::new(&config.connection, config.backend.credentials);
        let capabilities = backend.capabilities();
        info!(
            backend = backend.name(),
            capabilities = ?capabilities,
            pool_size = settings.pool_size,
            "federation state store opened"
        );
        Self {
            connections: ConnectionManager::new(Arc::clone(&backend), settings, Arc::clone(&metrics)),
            backend,
            capabilities,
            policy: config.policy,
            metrics,
        }
    }

    // ── Introspection ──────────────────────────────────────────────

    pub fn backend_name(&self) -> &'static str {
        self.backend.name()
    }

    pub fn capabilities(&self) -> Capabilities {
        self.capabilities
    }

    pub fn supports(&self, operation: Operation) -> bool {
        self.capabilities.supports(operation)
    }

    pub fn metrics(&self) -> Arc<StoreMetrics> {
        Arc::clone(&self.metrics)
    }

    /// Schema version this build writes.
    pub fn current_version(&self) -> Version {
        SCHEMA_VERSION
    }

    /// Schema version recorded by the backend.
    pub async fn load_version(&self) -> StoreResult<Version> {
        self.instrumented(Operation::LoadVersion, async {
            self.require(Operation::LoadVersion)?;
            self.call(|c| c.load_version()).await
        })
        .await
    }

    /// Close every backend connection. Later operations fail with a
    /// connection error.
    pub async fn close(&self) {
        self.connections.close().await;
        info!(backend = self.backend.name(), "federation state store closed");
    }

    // ── Sub-clusters ───────────────────────────────────────────────

    /// Register (or re-register) a sub-cluster.
    ///
    /// Identical re-registration is a no-op, and one that differs only in
    /// its heartbeat just refreshes the heartbeat. A lost or decommissioned
    /// sub-cluster is reactivated. Registering an active sub-cluster with
    /// different info overwrites it, or fails with
    /// [`StoreError::RegistrationConflict`] under the `reject` policy.
    pub async fn register_sub_cluster(&self, info: &SubClusterInfo) -> StoreResult<()> {
        self.instrumented(Operation::RegisterSubCluster, async {
            self.require(Operation::RegisterSubCluster)?;
            validate::registration(info)?;

            let policy = self.policy.reregistration;
            let record = info.clone();
            let outcome = self
                .call(move |c| c.register_sub_cluster(&record, policy))
                .await?;

            let id = info.sub_cluster_id.as_str();
            match outcome {
                RegisterOutcome::Conflict => {
                    return Err(StoreError::RegistrationConflict(id.to_string()));
                }
                RegisterOutcome::Unchanged => {
                    debug!(sub_cluster = id, "sub-cluster already registered");
                }
                RegisterOutcome::Refreshed => {
                    debug!(sub_cluster = id, "sub-cluster re-registered, heartbeat refreshed");
                }
                RegisterOutcome::Inserted => info!(sub_cluster = id, "sub-cluster registered"),
                RegisterOutcome::Updated => info!(sub_cluster = id, "sub-cluster registration updated"),
                RegisterOutcome::Reactivated => info!(sub_cluster = id, "sub-cluster reactivated"),
            }
            Ok(())
        })
        .await
    }

    /// Move a sub-cluster out of service.
    ///
    /// `target` must be `Decommissioned` (from active or lost) or `Lost`
    /// (from active). Deregistering into the state the record is already
    /// in succeeds without change.
    pub async fn deregister_sub_cluster(
        &self,
        sub_cluster_id: &str,
        target: SubClusterState,
    ) -> StoreResult<()> {
        self.instrumented(Operation::DeregisterSubCluster, async {
            self.require(Operation::DeregisterSubCluster)?;
            validate::sub_cluster_id(sub_cluster_id)?;
            let allowed_from = match target {
                SubClusterState::Decommissioned => {
                    vec![SubClusterState::Active, SubClusterState::Lost]
                }
                SubClusterState::Lost => vec![SubClusterState::Active],
                other => {
                    return Err(StoreError::Validation(format!(
                        "cannot deregister into state {other}"
                    )));
                }
            };
            let change = StateChange {
                target,
                allowed_from,
                heartbeat_before: None,
                heartbeat: None,
            };
            match self.state_change(sub_cluster_id, change).await? {
                StateChangeOutcome::Applied(_) => {
                    info!(sub_cluster = sub_cluster_id, state = %target, "sub-cluster deregistered");
                    Ok(())
                }
                StateChangeOutcome::Skipped(current) if current.state == target => {
                    debug!(sub_cluster = sub_cluster_id, state = %target, "sub-cluster already deregistered");
                    Ok(())
                }
                StateChangeOutcome::Skipped(current) => Err(StoreError::InvalidStateTransition {
                    id: sub_cluster_id.to_string(),
                    from: current.state,
                    to: target,
                }),
                StateChangeOutcome::NotFound => Err(not_found("sub-cluster", sub_cluster_id)),
            }
        })
        .await
    }

    /// Record a heartbeat from an active sub-cluster.
    ///
    /// Refreshes `last_heartbeat` and `capability` and sets the reported
    /// state. A sub-cluster that is no longer active must re-register.
    pub async fn sub_cluster_heartbeat(
        &self,
        sub_cluster_id: &str,
        state: SubClusterState,
        capability: &str,
    ) -> StoreResult<()> {
        self.instrumented(Operation::SubClusterHeartbeat, async {
            self.require(Operation::SubClusterHeartbeat)?;
            validate::sub_cluster_id(sub_cluster_id)?;
            validate::capability(capability)?;
            if state == SubClusterState::New {
                return Err(StoreError::Validation(
                    "heartbeat cannot report state new".into(),
                ));
            }
            let change = StateChange {
                target: state,
                allowed_from: vec![SubClusterState::Active],
                heartbeat_before: None,
                heartbeat: Some(Heartbeat {
                    at: epoch_millis(),
                    capability: capability.to_string(),
                }),
            };
            match self.state_change(sub_cluster_id, change).await? {
                StateChangeOutcome::Applied(updated) => {
                    if updated.state.is_active() {
                        debug!(sub_cluster = sub_cluster_id, "heartbeat recorded");
                    } else {
                        info!(sub_cluster = sub_cluster_id, state = %updated.state, "sub-cluster reported state change");
                    }
                    Ok(())
                }
                StateChangeOutcome::Skipped(current) => Err(StoreError::InvalidStateTransition {
                    id: sub_cluster_id.to_string(),
                    from: current.state,
                    to: state,
                }),
                StateChangeOutcome::NotFound => Err(not_found("sub-cluster", sub_cluster_id)),
            }
        })
        .await
    }

    pub async fn get_sub_cluster(&self, sub_cluster_id: &str) -> StoreResult<SubClusterInfo> {
        self.instrumented(Operation::GetSubCluster, async {
            self.require(Operation::GetSubCluster)?;
            validate::sub_cluster_id(sub_cluster_id)?;
            let id = sub_cluster_id.to_string();
            self.call(move |c| c.get_sub_cluster(&id))
                .await?
                .ok_or_else(|| not_found("sub-cluster", sub_cluster_id))
        })
        .await
    }

    /// Sub-clusters matching `filter`, ordered by id.
    pub async fn list_sub_clusters(&self, filter: SubClusterFilter) -> StoreResult<Vec<SubClusterInfo>> {
        self.instrumented(Operation::ListSubClusters, async {
            self.require(Operation::ListSubClusters)?;
            let mut all = self.call(|c| c.list_sub_clusters()).await?;
            all.retain(|info| filter.matches(info));
            Ok(all)
        })
        .await
    }

    /// Mark every active sub-cluster whose last heartbeat is older than
    /// `timeout` as lost. Returns the ids that changed.
    ///
    /// Each record is checked and updated atomically, so a heartbeat that
    /// lands between the scan and the update keeps its sub-cluster active.
    pub async fn expire_sub_clusters(&self, timeout: Duration) -> StoreResult<Vec<SubClusterId>> {
        self.instrumented(Operation::ExpireSubClusters, async {
            self.require(Operation::ExpireSubClusters)?;
            let cutoff = epoch_millis().saturating_sub(timeout.as_millis() as u64);
            let expired = self
                .call(move |c| {
                    let stale: Vec<SubClusterId> = c
                        .list_sub_clusters()?
                        .into_iter()
                        .filter(|info| info.state.is_active() && info.last_heartbeat < cutoff)
                        .map(|info| info.sub_cluster_id)
                        .collect();
                    let change = StateChange {
                        target: SubClusterState::Lost,
                        allowed_from: vec![SubClusterState::Active],
                        heartbeat_before: Some(cutoff),
                        heartbeat: None,
                    };
                    let mut expired = Vec::new();
                    for id in stale {
                        if let StateChangeOutcome::Applied(_) = c.apply_state_change(&id, &change)? {
                            expired.push(id);
                        }
                    }
                    Ok(expired)
                })
                .await?;
            for id in &expired {
                info!(sub_cluster = %id, timeout = ?timeout, "sub-cluster lost: heartbeat expired");
            }
            Ok(expired)
        })
        .await
    }

    /// Heartbeat timeout from the store's policy config.
    pub fn heartbeat_timeout(&self) -> Duration {
        self.policy.heartbeat_timeout()
    }

    // ── Application homes ──────────────────────────────────────────

    /// Record `home_sub_cluster` as the owner of `application_id` unless
    /// an owner already exists. Returns the effective owner.
    ///
    /// Under [`OwnershipMode::Strict`] a different existing owner fails
    /// with [`StoreError::OwnerConflict`] instead.
    pub async fn add_application_home_sub_cluster(
        &self,
        application_id: &str,
        home_sub_cluster: &str,
    ) -> StoreResult<SubClusterId> {
        self.instrumented(Operation::AddApplicationHome, async {
            self.require(Operation::AddApplicationHome)?;
            validate::application_id(application_id)?;
            validate::sub_cluster_id(home_sub_cluster)?;

            let home = ApplicationHomeSubCluster {
                application_id: application_id.to_string(),
                home_sub_cluster: home_sub_cluster.to_string(),
                create_time: epoch_millis(),
            };
            let effective = self
                .call(move |c| c.insert_application_home_if_absent(&home))
                .await?;
            self.resolve_owner(application_id, home_sub_cluster, effective.home_sub_cluster)
        })
        .await
    }

    pub async fn get_application_home_sub_cluster(&self, application_id: &str) -> StoreResult<SubClusterId> {
        self.instrumented(Operation::GetApplicationHome, async {
            self.require(Operation::GetApplicationHome)?;
            validate::application_id(application_id)?;
            let id = application_id.to_string();
            self.call(move |c| c.get_application_home(&id))
                .await?
                .map(|home| home.home_sub_cluster)
                .ok_or_else(|| not_found("application home", application_id))
        })
        .await
    }

    pub async fn list_application_homes(&self) -> StoreResult<Vec<ApplicationHomeSubCluster>> {
        self.instrumented(Operation::ListApplicationHomes, async {
            self.require(Operation::ListApplicationHomes)?;
            self.call(|c| c.list_application_homes()).await
        })
        .await
    }

    /// Administratively move an application to a new home.
    pub async fn override_application_home(
        &self,
        application_id: &str,
        home_sub_cluster: &str,
    ) -> StoreResult<()> {
        self.instrumented(Operation::OverrideApplicationHome, async {
            self.require(Operation::OverrideApplicationHome)?;
            validate::application_id(application_id)?;
            validate::sub_cluster_id(home_sub_cluster)?;
            let (id, home) = (application_id.to_string(), home_sub_cluster.to_string());
            if !self
                .call(move |c| c.update_application_home(&id, &home))
                .await?
            {
                return Err(not_found("application home", application_id));
            }
            info!(
                application = application_id,
                home = home_sub_cluster,
                "application home overridden"
            );
            Ok(())
        })
        .await
    }

    // ── Reservation homes ──────────────────────────────────────────

    /// Reservation counterpart of [`Self::add_application_home_sub_cluster`].
    pub async fn add_reservation_home_sub_cluster(
        &self,
        reservation_id: &str,
        home_sub_cluster: &str,
    ) -> StoreResult<SubClusterId> {
        const OP: Operation = Operation::AddReservationHome;
        self.instrumented(OP, async {
            self.require(OP)?;
            validate::reservation_id(reservation_id)?;
            validate::sub_cluster_id(home_sub_cluster)?;

            let home = ReservationHomeSubCluster {
                reservation_id: reservation_id.to_string(),
                home_sub_cluster: home_sub_cluster.to_string(),
            };
            let effective = self
                .call(move |c| reservation_procedures(c, OP)?.insert_reservation_home_if_absent(&home))
                .await?;
            self.resolve_owner(reservation_id, home_sub_cluster, effective.home_sub_cluster)
        })
        .await
    }

    pub async fn get_reservation_home_sub_cluster(&self, reservation_id: &str) -> StoreResult<SubClusterId> {
        const OP: Operation = Operation::GetReservationHome;
        self.instrumented(OP, async {
            self.require(OP)?;
            validate::reservation_id(reservation_id)?;
            let id = reservation_id.to_string();
            self.call(move |c| reservation_procedures(c, OP)?.get_reservation_home(&id))
                .await?
                .map(|home| home.home_sub_cluster)
                .ok_or_else(|| not_found("reservation home", reservation_id))
        })
        .await
    }

    pub async fn list_reservation_homes(&self) -> StoreResult<Vec<ReservationHomeSubCluster>> {
        const OP: Operation = Operation::ListReservationHomes;
        self.instrumented(OP, async {
            self.require(OP)?;
            self.call(|c| reservation_procedures(c, OP)?.list_reservation_homes())
                .await
        })
        .await
    }

    /// Move an existing reservation to a new home.
    pub async fn update_reservation_home_sub_cluster(
        &self,
        reservation_id: &str,
        home_sub_cluster: &str,
    ) -> StoreResult<()> {
        const OP: Operation = Operation::UpdateReservationHome;
        self.instrumented(OP, async {
            self.require(OP)?;
            validate::reservation_id(reservation_id)?;
            validate::sub_cluster_id(home_sub_cluster)?;
            let (id, home) = (reservation_id.to_string(), home_sub_cluster.to_string());
            if !self
                .call(move |c| reservation_procedures(c, OP)?.update_reservation_home(&id, &home))
                .await?
            {
                return Err(not_found("reservation home", reservation_id));
            }
            info!(
                reservation = reservation_id,
                home = home_sub_cluster,
                "reservation home updated"
            );
            Ok(())
        })
        .await
    }

    pub async fn delete_reservation_home_sub_cluster(&self, reservation_id: &str) -> StoreResult<()> {
        const OP: Operation = Operation::DeleteReservationHome;
        self.instrumented(OP, async {
            self.require(OP)?;
            validate::reservation_id(reservation_id)?;
            let id = reservation_id.to_string();
            if !self
                .call(move |c| reservation_procedures(c, OP)?.delete_reservation_home(&id))
                .await?
            {
                return Err(not_found("reservation home", reservation_id));
            }
            info!(reservation = reservation_id, "reservation home deleted");
            Ok(())
        })
        .await
    }

    // ── Policies ───────────────────────────────────────────────────

    /// Insert or replace the routing policy for a queue.
    pub async fn set_policy_configuration(&self, policy: &SubClusterPolicyConfiguration) -> StoreResult<()> {
        self.instrumented(Operation::SetPolicyConfiguration, async {
            self.require(Operation::SetPolicyConfiguration)?;
            validate::policy(policy)?;
            let record = policy.clone();
            self.call(move |c| c.put_policy(&record)).await?;
            debug!(queue = %policy.queue, policy_type = %policy.policy_type, "policy configuration stored");
            Ok(())
        })
        .await
    }

    pub async fn get_policy_configuration(&self, queue: &str) -> StoreResult<SubClusterPolicyConfiguration> {
        self.instrumented(Operation::GetPolicyConfiguration, async {
            self.require(Operation::GetPolicyConfiguration)?;
            validate::queue(queue)?;
            let name = queue.to_string();
            self.call(move |c| c.get_policy(&name))
                .await?
                .ok_or_else(|| not_found("policy configuration", queue))
        })
        .await
    }

    pub async fn list_policy_configurations(&self) -> StoreResult<Vec<SubClusterPolicyConfiguration>> {
        self.instrumented(Operation::ListPolicyConfigurations, async {
            self.require(Operation::ListPolicyConfigurations)?;
            self.call(|c| c.list_policies()).await
        })
        .await
    }

    // ── Internals ──────────────────────────────────────────────────

    /// Run an operation body and record its latency and outcome.
    async fn instrumented<T>(
        &self,
        operation: Operation,
        body: impl Future<Output = StoreResult<T>>,
    ) -> StoreResult<T> {
        let start = Instant::now();
        let result = body.await;
        let elapsed = start.elapsed();
        self.metrics
            .record_operation(operation.name(), elapsed, result.is_ok())
            .await;
        if let Err(e) = &result {
            debug!(operation = operation.name(), error = %e, "store operation failed");
        }
        result
    }

    fn require(&self, operation: Operation) -> StoreResult<()> {
        if self.capabilities.supports(operation) {
            Ok(())
        } else {
            Err(StoreError::Unsupported {
                operation: operation.name(),
                backend: self.backend.name(),
            })
        }
    }

    async fn call<T, F>(&self, procedure: F) -> StoreResult<T>
    where
        T: Send + 'static,
        F: Fn(&mut dyn BackendConnection) -> Result<T, BackendError> + Send + Sync + 'static,
    {
        self.connections
            .with_connection(procedure)
            .await
            .map_err(|e| self.translate(e))
    }

    async fn state_change(&self, sub_cluster_id: &str, change: StateChange) -> StoreResult<StateChangeOutcome> {
        let id = sub_cluster_id.to_string();
        self.call(move |c| c.apply_state_change(&id, &change)).await
    }

    /// Apply the ownership mode to the record an insert-if-absent returned.
    fn resolve_owner(&self, key: &str, requested: &str, existing: SubClusterId) -> StoreResult<SubClusterId> {
        if existing == requested {
            return Ok(existing);
        }
        match self.policy.ownership {
            OwnershipMode::Lenient => {
                debug!(key, existing = %existing, requested, "keeping existing home");
                Ok(existing)
            }
            OwnershipMode::Strict => Err(StoreError::OwnerConflict {
                key: key.to_string(),
                existing,
                requested: requested.to_string(),
            }),
        }
    }

    fn translate(&self, err: BackendError) -> StoreError {
        match err {
            BackendError::Disconnected(_) | BackendError::Timeout(_) | BackendError::Closed => {
                StoreError::Connection(err.to_string())
            }
            BackendError::Unsupported(operation) => StoreError::Unsupported {
                operation,
                backend: self.backend.name(),
            },
            BackendError::IncompatibleVersion { stored, expected } => {
                StoreError::IncompatibleVersion { stored, expected }
            }
            BackendError::Constraint(_)
            | BackendError::Storage(_)
            | BackendError::Serialize(_)
            | BackendError::Deserialize(_) => StoreError::Backend(err.to_string()),
        }
    }
}

impl std::fmt::Debug for FederationStateStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FederationStateStore")
            .field("backend", &self.backend.name())
            .field("capabilities", &self.capabilities)
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}

fn not_found(kind: &'static str, key: &str) -> StoreError {
    StoreError::NotFound {
        kind,
        key: key.to_string(),
    }
}

/// The connection's reservation procedures, or `Unsupported` when a
/// backend declared the capability but did not wire them up.
fn reservation_procedures(
    conn: &mut dyn BackendConnection,
    operation: Operation,
) -> Result<&mut dyn ReservationProcedures, BackendError> {
    conn.reservations()
        .ok_or_else(|| BackendError::Unsupported(operation.name()))
}
