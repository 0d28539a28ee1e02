//! Record-level rules shared by every backend.
//!
//! Backends provide atomicity (a write transaction, a lock); these pure
//! functions decide what the atomic step does, so registration,
//! state-change and schema-version semantics are identical no matter
//! which backend executes them.

use semver::Version;

use crate::config::ReregistrationPolicy;
use crate::error::BackendError;
use crate::types::{RegisterOutcome, StateChange, SubClusterInfo};

/// Schema version written by this build.
pub const SCHEMA_VERSION: Version = Version::new(1, 0, 0);

/// Decide what registering `incoming` does given the stored record.
///
/// The caller writes `incoming` whenever [`RegisterOutcome::writes`] is
/// true, and writes nothing otherwise. A retried registration differs from
/// the stored one only in its heartbeat, so it is never a conflict.
pub fn decide_registration(
    existing: Option<&SubClusterInfo>,
    incoming: &SubClusterInfo,
    policy: ReregistrationPolicy,
) -> RegisterOutcome {
    match existing {
        None => RegisterOutcome::Inserted,
        Some(current) if current == incoming => RegisterOutcome::Unchanged,
        Some(current) if same_registration(current, incoming) => RegisterOutcome::Refreshed,
        Some(current) if current.state.is_inactive() => RegisterOutcome::Reactivated,
        Some(_) => match policy {
            ReregistrationPolicy::Overwrite => RegisterOutcome::Updated,
            ReregistrationPolicy::Reject => RegisterOutcome::Conflict,
        },
    }
}

/// Whether two records describe the same registration, ignoring
/// `last_heartbeat`.
pub fn same_registration(a: &SubClusterInfo, b: &SubClusterInfo) -> bool {
    a.sub_cluster_id == b.sub_cluster_id
        && a.state == b.state
        && a.endpoints == b.endpoints
        && a.capability == b.capability
        && a.last_start_time == b.last_start_time
}

impl RegisterOutcome {
    /// Whether the incoming record must be written.
    pub fn writes(self) -> bool {
        matches!(
            self,
            RegisterOutcome::Inserted
                | RegisterOutcome::Refreshed
                | RegisterOutcome::Updated
                | RegisterOutcome::Reactivated
        )
    }
}

/// Apply `change` to `info` in place if its preconditions hold.
///
/// Returns `true` when the record was modified and must be written back.
pub fn apply_state_change(info: &mut SubClusterInfo, change: &StateChange) -> bool {
    if !change.allowed_from.contains(&info.state) {
        return false;
    }
    if let Some(cutoff) = change.heartbeat_before {
        if info.last_heartbeat >= cutoff {
            return false;
        }
    }
    info.state = change.target;
    if let Some(hb) = &change.heartbeat {
        info.last_heartbeat = hb.at;
        info.capability = hb.capability.clone();
    }
    true
}

/// Check a stored schema version against [`SCHEMA_VERSION`].
///
/// Returns the version to keep (the stored one, or the current one for a
/// fresh store). Major versions must match.
pub fn reconcile_version(stored: Option<Version>) -> Result<Version, BackendError> {
    match stored {
        None => Ok(SCHEMA_VERSION),
        Some(v) if v.major == SCHEMA_VERSION.major => Ok(v),
        Some(v) => Err(BackendError::IncompatibleVersion {
            stored: v,
            expected: SCHEMA_VERSION,
        }),
    }
}
