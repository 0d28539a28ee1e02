use std::time::Duration;

use fedstore_state::{
    FederationStateStore, SubClusterEndpoints, SubClusterFilter, SubClusterInfo, SubClusterState,
    epoch_millis,
};
use serde_json::json;

use super::print_json;

pub async fn register(
    store: &FederationStateStore,
    id: String,
    endpoints: SubClusterEndpoints,
    capability: String,
    start_time: Option<u64>,
) -> anyhow::Result<()> {
    let now = epoch_millis();
    let info = SubClusterInfo {
        sub_cluster_id: id,
        endpoints,
        state: SubClusterState::Active,
        last_heartbeat: now,
        last_start_time: start_time.unwrap_or(now),
        capability,
    };
    store.register_sub_cluster(&info).await?;
    print_json(&info)
}

pub async fn deregister(
    store: &FederationStateStore,
    id: &str,
    state: SubClusterState,
) -> anyhow::Result<()> {
    store.deregister_sub_cluster(id, state).await?;
    print_json(&json!({ "sub_cluster_id": id, "state": state }))
}

pub async fn heartbeat(
    store: &FederationStateStore,
    id: &str,
    state: SubClusterState,
    capability: &str,
) -> anyhow::Result<()> {
    store.sub_cluster_heartbeat(id, state, capability).await?;
    print_json(&store.get_sub_cluster(id).await?)
}

pub async fn get(store: &FederationStateStore, id: &str) -> anyhow::Result<()> {
    print_json(&store.get_sub_cluster(id).await?)
}

pub async fn list(store: &FederationStateStore, active_only: bool) -> anyhow::Result<()> {
    let filter = if active_only {
        SubClusterFilter::active()
    } else {
        SubClusterFilter::all()
    };
    print_json(&store.list_sub_clusters(filter).await?)
}

pub async fn expire(store: &FederationStateStore, timeout_secs: Option<u64>) -> anyhow::Result<()> {
    let timeout = timeout_secs
        .map(Duration::from_secs)
        .unwrap_or_else(|| store.heartbeat_timeout());
    let expired = store.expire_sub_clusters(timeout).await?;
    print_json(&json!({ "timeout_secs": timeout.as_secs(), "expired": expired }))
}
