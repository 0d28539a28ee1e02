//! Capability registry: which store operations a backend implements.
//!
//! Every backend declares a [`Capabilities`] set up front. The store
//! facade checks it before dispatch, so an unsupported operation is a
//! queryable fact about the backend rather than a failure discovered
//! halfway through a call.

use std::fmt;

/// A logical store operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(u8)]
pub enum Operation {
    RegisterSubCluster,
    DeregisterSubCluster,
    SubClusterHeartbeat,
    GetSubCluster,
    ListSubClusters,
    ExpireSubClusters,
    AddApplicationHome,
    GetApplicationHome,
    ListApplicationHomes,
    OverrideApplicationHome,
    AddReservationHome,
    GetReservationHome,
    ListReservationHomes,
    UpdateReservationHome,
    DeleteReservationHome,
    SetPolicyConfiguration,
    GetPolicyConfiguration,
    ListPolicyConfigurations,
    LoadVersion,
}

impl Operation {
    pub const ALL: [Operation; 19] = [
        Operation::RegisterSubCluster,
        Operation::DeregisterSubCluster,
        Operation::SubClusterHeartbeat,
        Operation::GetSubCluster,
        Operation::ListSubClusters,
        Operation::ExpireSubClusters,
        Operation::AddApplicationHome,
        Operation::GetApplicationHome,
        Operation::ListApplicationHomes,
        Operation::OverrideApplicationHome,
        Operation::AddReservationHome,
        Operation::GetReservationHome,
        Operation::ListReservationHomes,
        Operation::UpdateReservationHome,
        Operation::DeleteReservationHome,
        Operation::SetPolicyConfiguration,
        Operation::GetPolicyConfiguration,
        Operation::ListPolicyConfigurations,
        Operation::LoadVersion,
    ];

    pub const RESERVATIONS: [Operation; 5] = [
        Operation::AddReservationHome,
        Operation::GetReservationHome,
        Operation::ListReservationHomes,
        Operation::UpdateReservationHome,
        Operation::DeleteReservationHome,
    ];

    /// Stable snake_case name, used as the metrics label.
    pub fn name(self) -> &'static str {
        match self {
            Operation::RegisterSubCluster => "register_sub_cluster",
            Operation::DeregisterSubCluster => "deregister_sub_cluster",
            Operation::SubClusterHeartbeat => "sub_cluster_heartbeat",
            Operation::GetSubCluster => "get_sub_cluster",
            Operation::ListSubClusters => "list_sub_clusters",
            Operation::ExpireSubClusters => "expire_sub_clusters",
            Operation::AddApplicationHome => "add_application_home",
            Operation::GetApplicationHome => "get_application_home",
            Operation::ListApplicationHomes => "list_application_homes",
            Operation::OverrideApplicationHome => "override_application_home",
            Operation::AddReservationHome => "add_reservation_home",
            Operation::GetReservationHome => "get_reservation_home",
            Operation::ListReservationHomes => "list_reservation_homes",
            Operation::UpdateReservationHome => "update_reservation_home",
            Operation::DeleteReservationHome => "delete_reservation_home",
            Operation::SetPolicyConfiguration => "set_policy_configuration",
            Operation::GetPolicyConfiguration => "get_policy_configuration",
            Operation::ListPolicyConfigurations => "list_policy_configurations",
            Operation::LoadVersion => "load_version",
        }
    }

    const fn bit(self) -> u32 {
        1 << (self as u8)
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Set of operations a backend supports.
#[derive(Clone, Copy, PartialEq, Eq, Default)]
pub struct Capabilities(u32);

impl Capabilities {
    pub const fn none() -> Self {
        Self(0)
    }

    pub fn all() -> Self {
        Operation::ALL.into_iter().fold(Self::none(), Self::with)
    }

    /// Everything except reservation-home tracking.
    pub fn without_reservations() -> Self {
        Operation::RESERVATIONS
            .into_iter()
            .fold(Self::all(), Self::without)
    }

    pub const fn with(self, op: Operation) -> Self {
        Self(self.0 | op.bit())
    }

    pub const fn without(self, op: Operation) -> Self {
        Self(self.0 & !op.bit())
    }

    pub const fn supports(self, op: Operation) -> bool {
        self.0 & op.bit() != 0
    }

    pub fn supports_reservations(self) -> bool {
        Operation::RESERVATIONS.iter().all(|op| self.supports(*op))
    }

    /// Supported operations in declaration order.
    pub fn iter(self) -> impl Iterator<Item = Operation> {
        Operation::ALL.into_iter().filter(move |op| self.supports(*op))
    }
}

impl fmt::Debug for Capabilities {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.iter().map(Operation::name)).finish()
    }
}
