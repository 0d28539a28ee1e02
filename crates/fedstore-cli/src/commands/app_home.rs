use fedstore_state::FederationStateStore;
use serde_json::json;

use super::print_json;

pub async fn add(
    store: &FederationStateStore,
    application_id: &str,
    sub_cluster_id: &str,
) -> anyhow::Result<()> {
    let home = store
        .add_application_home_sub_cluster(application_id, sub_cluster_id)
        .await?;
    if home != sub_cluster_id {
        eprintln!("{application_id} is already homed in {home}");
    }
    print_json(&json!({ "application_id": application_id, "home_sub_cluster": home }))
}

pub async fn get(store: &FederationStateStore, application_id: &str) -> anyhow::Result<()> {
    let home = store.get_application_home_sub_cluster(application_id).await?;
    print_json(&json!({ "application_id": application_id, "home_sub_cluster": home }))
}

pub async fn list(store: &FederationStateStore) -> anyhow::Result<()> {
    print_json(&store.list_application_homes().await?)
}
