//! End-to-end federation scenarios.
//!
//! Drives the public store API the way a router and a cluster manager
//! would: register sub-clusters, home applications, check connection
//! reuse, and confirm capability gating on the durable backend.

use std::sync::Arc;
use std::time::Duration;

use fedstore_metrics::render_prometheus;
use fedstore_state::*;

fn endpoints(host: &str) -> SubClusterEndpoints {
    SubClusterEndpoints {
        amrm_service_address: format!("{host}:8030"),
        client_rm_service_address: format!("{host}:8032"),
        rm_admin_service_address: format!("{host}:8033"),
        rm_web_service_address: format!("{host}:8088"),
    }
}

fn sub_cluster(id: &str, host: &str) -> SubClusterInfo {
    SubClusterInfo {
        sub_cluster_id: id.to_string(),
        endpoints: endpoints(host),
        state: SubClusterState::Active,
        last_heartbeat: epoch_millis(),
        last_start_time: epoch_millis(),
        capability: r#"{"memory_mb":65536,"vcores":32}"#.to_string(),
    }
}

fn redb_store() -> FederationStateStore {
    FederationStateStore::open(StoreConfig::in_memory(Driver::Redb)).unwrap()
}

fn memory_store() -> FederationStateStore {
    FederationStateStore::open(StoreConfig::in_memory(Driver::Memory)).unwrap()
}

#[tokio::test]
async fn router_scenario_on_durable_backend() {
    let store = redb_store();
    let sc1 = sub_cluster("SC1", "e1.example.com");

    store.register_sub_cluster(&sc1).await.unwrap();
    store.register_sub_cluster(&sc1).await.unwrap();
    let all = store.list_sub_clusters(SubClusterFilter::all()).await.unwrap();
    assert_eq!(all, vec![sc1.clone()]);

    let home = store
        .add_application_home_sub_cluster("app_1_1", "SC1")
        .await
        .unwrap();
    assert_eq!(home, "SC1");
    assert_eq!(
        store.get_application_home_sub_cluster("app_1_1").await.unwrap(),
        "SC1"
    );

    assert_eq!(store.metrics().connections_created(), 1);

    let unsupported = [
        store
            .add_reservation_home_sub_cluster("reservation_1", "SC1")
            .await
            .unwrap_err(),
        store
            .get_reservation_home_sub_cluster("reservation_1")
            .await
            .unwrap_err(),
        store
            .update_reservation_home_sub_cluster("reservation_1", "SC1")
            .await
            .unwrap_err(),
        store
            .delete_reservation_home_sub_cluster("reservation_1")
            .await
            .unwrap_err(),
        store.list_reservation_homes().await.unwrap_err(),
    ];
    for err in unsupported {
        assert!(err.is_unsupported(), "expected unsupported, got {err:?}");
        assert!(!err.is_retryable());
    }
    assert_eq!(store.metrics().connections_created(), 1);
}

#[tokio::test]
async fn reservation_homes_on_memory_backend() {
    let store = memory_store();

    assert_eq!(
        store
            .add_reservation_home_sub_cluster("reservation_1", "SC1")
            .await
            .unwrap(),
        "SC1"
    );
    // A competing add keeps the first owner.
    assert_eq!(
        store
            .add_reservation_home_sub_cluster("reservation_1", "SC2")
            .await
            .unwrap(),
        "SC1"
    );

    store
        .update_reservation_home_sub_cluster("reservation_1", "SC2")
        .await
        .unwrap();
    assert_eq!(
        store
            .get_reservation_home_sub_cluster("reservation_1")
            .await
            .unwrap(),
        "SC2"
    );

    store
        .delete_reservation_home_sub_cluster("reservation_1")
        .await
        .unwrap();
    let err = store
        .get_reservation_home_sub_cluster("reservation_1")
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::NotFound { kind: "reservation home", .. }));
    assert!(store.list_reservation_homes().await.unwrap().is_empty());
}

#[tokio::test]
async fn unknown_application_is_not_found() {
    for store in [redb_store(), memory_store()] {
        let err = store
            .get_application_home_sub_cluster("app_missing")
            .await
            .unwrap_err();
        assert!(err.is_not_found(), "{}: {err:?}", store.backend_name());
    }
}

#[tokio::test]
async fn connection_reused_across_many_operations() {
    let store = redb_store();
    for i in 0..25 {
        let id = format!("SC{i}");
        store
            .register_sub_cluster(&sub_cluster(&id, "rm.example.com"))
            .await
            .unwrap();
        store
            .add_application_home_sub_cluster(&format!("app_{i}"), &id)
            .await
            .unwrap();
    }
    assert_eq!(store.list_application_homes().await.unwrap().len(), 25);
    assert_eq!(store.metrics().connections_created(), 1);
    assert_eq!(store.metrics().connections_live(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_adds_agree_on_one_owner() {
    let store = Arc::new(redb_store());

    let mut handles = Vec::new();
    for i in 0..8 {
        let store = Arc::clone(&store);
        handles.push(tokio::spawn(async move {
            store
                .add_application_home_sub_cluster("app_contended", &format!("SC{i}"))
                .await
                .unwrap()
        }));
    }

    let mut owners = Vec::new();
    for h in handles {
        owners.push(h.await.unwrap());
    }
    let stored = store
        .get_application_home_sub_cluster("app_contended")
        .await
        .unwrap();
    assert!(owners.iter().all(|owner| *owner == stored));
    assert_eq!(store.metrics().connections_created(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_identical_registrations_leave_one_record() {
    let store = Arc::new(memory_store());
    let info = sub_cluster("SC1", "rm.example.com");

    let mut handles = Vec::new();
    for _ in 0..8 {
        let store = Arc::clone(&store);
        let info = info.clone();
        handles.push(tokio::spawn(async move {
            store.register_sub_cluster(&info).await
        }));
    }
    for h in handles {
        h.await.unwrap().unwrap();
    }

    let all = store.list_sub_clusters(SubClusterFilter::all()).await.unwrap();
    assert_eq!(all, vec![info]);
}

#[tokio::test]
async fn sub_cluster_lifecycle() {
    let store = redb_store();
    let mut info = sub_cluster("SC1", "rm.example.com");
    info.last_heartbeat = epoch_millis() - 120_000;
    store.register_sub_cluster(&info).await.unwrap();

    // Silent for two minutes against a one minute timeout.
    let expired = store
        .expire_sub_clusters(Duration::from_secs(60))
        .await
        .unwrap();
    assert_eq!(expired, vec!["SC1".to_string()]);
    assert!(
        store
            .list_sub_clusters(SubClusterFilter::active())
            .await
            .unwrap()
            .is_empty()
    );

    // Coming back requires a fresh registration.
    let err = store
        .sub_cluster_heartbeat("SC1", SubClusterState::Active, "{}")
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::InvalidStateTransition { .. }));

    let fresh = sub_cluster("SC1", "rm.example.com");
    store.register_sub_cluster(&fresh).await.unwrap();
    store
        .sub_cluster_heartbeat("SC1", SubClusterState::Active, "{}")
        .await
        .unwrap();

    store
        .deregister_sub_cluster("SC1", SubClusterState::Decommissioned)
        .await
        .unwrap();
    let stored = store.get_sub_cluster("SC1").await.unwrap();
    assert_eq!(stored.state, SubClusterState::Decommissioned);
    assert_eq!(stored.capability, "{}");
}

#[tokio::test]
async fn durable_state_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("federation.redb");
    let config = StoreConfig {
        backend: BackendConfig {
            driver: Driver::Redb,
            url: format!("redb://{}", path.display()),
            credentials: Credentials::new("SA", ""),
        },
        ..StoreConfig::default()
    };

    {
        let store = FederationStateStore::open(config.clone()).unwrap();
        store
            .register_sub_cluster(&sub_cluster("SC1", "rm.example.com"))
            .await
            .unwrap();
        store
            .add_application_home_sub_cluster("app_1", "SC1")
            .await
            .unwrap();
        store.close().await;
    }

    let store = FederationStateStore::open(config).unwrap();
    assert_eq!(
        store.get_application_home_sub_cluster("app_1").await.unwrap(),
        "SC1"
    );
    assert_eq!(store.load_version().await.unwrap(), store.current_version());
}

#[tokio::test]
async fn metrics_render_as_prometheus_text() {
    let store = memory_store();
    store
        .register_sub_cluster(&sub_cluster("SC1", "rm.example.com"))
        .await
        .unwrap();
    let _ = store.get_application_home_sub_cluster("app_missing").await;

    let text = render_prometheus(&store.metrics().snapshot().await);
    assert!(text.contains(
        r#"fedstore_operations_total{operation="register_sub_cluster",outcome="success"} 1"#
    ));
    assert!(text.contains(
        r#"fedstore_operations_total{operation="get_application_home",outcome="failure"} 1"#
    ));
    assert!(text.contains("fedstore_connections_created 1"));
}
