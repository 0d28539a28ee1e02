use fedstore_metrics::render_prometheus;
use fedstore_state::FederationStateStore;
use serde_json::json;

use super::print_json;

pub async fn version(store: &FederationStateStore) -> anyhow::Result<()> {
    let stored = store.load_version().await?;
    print_json(&json!({
        "backend": store.backend_name(),
        "stored": stored.to_string(),
        "current": store.current_version().to_string(),
    }))
}

/// Counters only cover this process, so query the backend first to
/// exercise the connection path.
pub async fn metrics(store: &FederationStateStore) -> anyhow::Result<()> {
    store.load_version().await?;
    let snapshot = store.metrics().snapshot().await;
    print!("{}", render_prometheus(&snapshot));
    Ok(())
}
