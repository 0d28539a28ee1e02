//! Domain types for the federation state store.
//!
//! These types represent the persisted state of sub-clusters, application
//! and reservation homes, and queue policy configurations. All types are
//! serializable to/from JSON for storage in backend tables.

use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

/// Unique identifier for a sub-cluster in the federation.
pub type SubClusterId = String;

/// Unique identifier for an application.
pub type ApplicationId = String;

/// Unique identifier for a capacity reservation.
pub type ReservationId = String;

// ── Sub-cluster ───────────────────────────────────────────────────

/// Lifecycle state of a sub-cluster.
///
/// ```text
/// New ──register──▶ Active ──heartbeat timeout──▶ Lost
///                     │                           │
///                     └──deregister──▶ Decommissioned
/// Lost | Decommissioned ──register──▶ Active
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubClusterState {
    /// Known but never registered. Records are never stored in this state.
    New,
    Active,
    Lost,
    Decommissioned,
}

impl SubClusterState {
    pub fn is_active(self) -> bool {
        self == SubClusterState::Active
    }

    /// Whether the state can only be left through re-registration.
    pub fn is_inactive(self) -> bool {
        matches!(self, SubClusterState::Lost | SubClusterState::Decommissioned)
    }
}

impl fmt::Display for SubClusterState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SubClusterState::New => write!(f, "new"),
            SubClusterState::Active => write!(f, "active"),
            SubClusterState::Lost => write!(f, "lost"),
            SubClusterState::Decommissioned => write!(f, "decommissioned"),
        }
    }
}

/// Service endpoints a sub-cluster's resource manager exposes (`host:port`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubClusterEndpoints {
    /// Scheduler endpoint application masters talk to.
    pub amrm_service_address: String,
    /// Client-facing submission endpoint.
    pub client_rm_service_address: String,
    pub rm_admin_service_address: String,
    pub rm_web_service_address: String,
}

impl SubClusterEndpoints {
    /// Iterate `(name, address)` pairs, used for validation and display.
    pub fn iter(&self) -> impl Iterator<Item = (&'static str, &str)> {
        [
            ("amrm_service_address", self.amrm_service_address.as_str()),
            ("client_rm_service_address", self.client_rm_service_address.as_str()),
            ("rm_admin_service_address", self.rm_admin_service_address.as_str()),
            ("rm_web_service_address", self.rm_web_service_address.as_str()),
        ]
        .into_iter()
    }
}

/// Registration record for a sub-cluster.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubClusterInfo {
    pub sub_cluster_id: SubClusterId,
    pub endpoints: SubClusterEndpoints,
    pub state: SubClusterState,
    /// Epoch millis of the last heartbeat.
    pub last_heartbeat: u64,
    /// Epoch millis when the sub-cluster's resource manager started.
    pub last_start_time: u64,
    /// Opaque capability descriptor reported by the sub-cluster.
    pub capability: String,
}

/// Filter for listing sub-clusters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SubClusterFilter {
    /// Only return sub-clusters in the `Active` state.
    pub active_only: bool,
}

impl SubClusterFilter {
    pub fn all() -> Self {
        Self { active_only: false }
    }

    pub fn active() -> Self {
        Self { active_only: true }
    }

    pub fn matches(&self, info: &SubClusterInfo) -> bool {
        !self.active_only || info.state.is_active()
    }
}

// ── Homes ─────────────────────────────────────────────────────────

/// Which sub-cluster owns an application.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApplicationHomeSubCluster {
    pub application_id: ApplicationId,
    pub home_sub_cluster: SubClusterId,
    /// Epoch millis when the mapping was first created.
    pub create_time: u64,
}

/// Which sub-cluster owns a capacity reservation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReservationHomeSubCluster {
    pub reservation_id: ReservationId,
    pub home_sub_cluster: SubClusterId,
}

// ── Policies ──────────────────────────────────────────────────────

/// Federation routing policy for a queue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubClusterPolicyConfiguration {
    pub queue: String,
    /// Policy implementation identifier, interpreted by the router.
    pub policy_type: String,
    /// Opaque serialized policy parameters.
    pub params: Vec<u8>,
}

// ── Procedure outcomes ────────────────────────────────────────────

/// What a registration did to the stored record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegisterOutcome {
    Inserted,
    /// Identical info was already stored.
    Unchanged,
    /// The same registration with a different heartbeat; only the
    /// heartbeat was rewritten.
    Refreshed,
    /// An active record was overwritten with different info.
    Updated,
    /// A lost or decommissioned record was brought back to active.
    Reactivated,
    /// Different info for an active record under the `reject` policy.
    Conflict,
}

/// A conditional state change applied atomically to one sub-cluster.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateChange {
    pub target: SubClusterState,
    /// Apply only when the current state is one of these.
    pub allowed_from: Vec<SubClusterState>,
    /// Apply only when the last heartbeat is strictly older than this (epoch millis).
    pub heartbeat_before: Option<u64>,
    /// Refresh heartbeat time and capability as part of the change.
    pub heartbeat: Option<Heartbeat>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Heartbeat {
    pub at: u64,
    pub capability: String,
}

/// Result of applying a [`StateChange`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StateChangeOutcome {
    Applied(SubClusterInfo),
    /// Preconditions did not hold; the record is untouched.
    Skipped(SubClusterInfo),
    NotFound,
}

/// Current time as epoch millis.
pub fn epoch_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
