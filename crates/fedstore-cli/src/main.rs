//! fedstore — admin CLI for the federation state store.
//!
//! Opens the store described by a TOML config, runs one operation and
//! prints the result as JSON on stdout. Logs go to stderr.
//!
//! # Usage
//!
//! ```text
//! fedstore --config /etc/fedstore.toml register --id SC1 \
//!     --amrm rm1:8030 --client-rm rm1:8032 --rm-admin rm1:8033 --rm-web rm1:8088
//! fedstore --config /etc/fedstore.toml get-app-home app_1_1
//! ```

use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::{Parser, Subcommand, ValueEnum};
use fedstore_state::{FederationStateStore, StoreConfig, SubClusterState};
use tracing::debug;

mod commands;

#[derive(Parser, Debug)]
#[command(
    name = "fedstore",
    about = "Federation state store administration",
    version,
    propagate_version = true
)]
struct Cli {
    /// Store config file (TOML). Defaults to an ephemeral in-memory store.
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Register or re-register a sub-cluster as active.
    Register {
        #[arg(long)]
        id: String,
        /// Scheduler endpoint (host:port).
        #[arg(long)]
        amrm: String,
        /// Client submission endpoint (host:port).
        #[arg(long)]
        client_rm: String,
        #[arg(long)]
        rm_admin: String,
        #[arg(long)]
        rm_web: String,
        /// Capability descriptor reported by the sub-cluster.
        #[arg(long, default_value = "{}")]
        capability: String,
        /// Resource manager start time (epoch millis). Defaults to now.
        #[arg(long)]
        start_time: Option<u64>,
    },
    /// Take a sub-cluster out of service.
    Deregister {
        id: String,
        #[arg(long, value_enum, default_value = "decommissioned")]
        state: DeregisterState,
    },
    /// Record a heartbeat for an active sub-cluster.
    Heartbeat {
        id: String,
        #[arg(long, value_enum, default_value = "active")]
        state: HeartbeatState,
        #[arg(long, default_value = "{}")]
        capability: String,
    },
    GetSubCluster {
        id: String,
    },
    ListSubClusters {
        /// Only list active sub-clusters.
        #[arg(long)]
        active: bool,
    },
    /// Mark sub-clusters with stale heartbeats as lost.
    Expire {
        /// Heartbeat timeout in seconds. Defaults to the configured timeout.
        #[arg(long)]
        timeout_secs: Option<u64>,
    },
    /// Home an application in a sub-cluster unless it already has a home.
    AddAppHome {
        application_id: String,
        sub_cluster_id: String,
    },
    GetAppHome {
        application_id: String,
    },
    ListAppHomes,
    /// Print the stored and current schema versions.
    Version,
    /// Query the backend, then print store metrics in Prometheus format.
    Metrics,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum DeregisterState {
    Decommissioned,
    Lost,
}

impl From<DeregisterState> for SubClusterState {
    fn from(state: DeregisterState) -> Self {
        match state {
            DeregisterState::Decommissioned => SubClusterState::Decommissioned,
            DeregisterState::Lost => SubClusterState::Lost,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum HeartbeatState {
    Active,
    Lost,
    Decommissioned,
}

impl From<HeartbeatState> for SubClusterState {
    fn from(state: HeartbeatState) -> Self {
        match state {
            HeartbeatState::Active => SubClusterState::Active,
            HeartbeatState::Lost => SubClusterState::Lost,
            HeartbeatState::Decommissioned => SubClusterState::Decommissioned,
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info,fedstore=debug")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let config = load_config(cli.config.as_deref())?;
    let store = FederationStateStore::open(config)?;
    let result = run(&store, cli.command).await;
    store.close().await;
    result
}

/// Read the store config from `path`, or fall back to an in-memory store.
fn load_config(path: Option<&Path>) -> anyhow::Result<StoreConfig> {
    let config = match path {
        Some(path) => StoreConfig::from_file(path)
            .with_context(|| format!("loading config from {}", path.display()))?,
        None => StoreConfig::default(),
    };
    debug!(driver = %config.backend.driver, url = %config.backend.url, "store config loaded");
    Ok(config)
}

async fn run(store: &FederationStateStore, command: Command) -> anyhow::Result<()> {
    match command {
        Command::Register {
            id,
            amrm,
            client_rm,
            rm_admin,
            rm_web,
            capability,
            start_time,
        } => {
            let endpoints = fedstore_state::SubClusterEndpoints {
                amrm_service_address: amrm,
                client_rm_service_address: client_rm,
                rm_admin_service_address: rm_admin,
                rm_web_service_address: rm_web,
            };
            commands::sub_cluster::register(store, id, endpoints, capability, start_time).await
        }
        Command::Deregister { id, state } => {
            commands::sub_cluster::deregister(store, &id, state.into()).await
        }
        Command::Heartbeat {
            id,
            state,
            capability,
        } => commands::sub_cluster::heartbeat(store, &id, state.into(), &capability).await,
        Command::GetSubCluster { id } => commands::sub_cluster::get(store, &id).await,
        Command::ListSubClusters { active } => commands::sub_cluster::list(store, active).await,
        Command::Expire { timeout_secs } => commands::sub_cluster::expire(store, timeout_secs).await,
        Command::AddAppHome {
            application_id,
            sub_cluster_id,
        } => commands::app_home::add(store, &application_id, &sub_cluster_id).await,
        Command::GetAppHome { application_id } => {
            commands::app_home::get(store, &application_id).await
        }
        Command::ListAppHomes => commands::app_home::list(store).await,
        Command::Version => commands::admin::version(store).await,
        Command::Metrics => commands::admin::metrics(store).await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn parses_register() {
        let cli = Cli::try_parse_from([
            "fedstore",
            "--config",
            "/etc/fedstore.toml",
            "register",
            "--id",
            "SC1",
            "--amrm",
            "rm1:8030",
            "--client-rm",
            "rm1:8032",
            "--rm-admin",
            "rm1:8033",
            "--rm-web",
            "rm1:8088",
        ])
        .unwrap();

        assert_eq!(cli.config, Some(PathBuf::from("/etc/fedstore.toml")));
        match cli.command {
            Command::Register { id, capability, start_time, .. } => {
                assert_eq!(id, "SC1");
                assert_eq!(capability, "{}");
                assert_eq!(start_time, None);
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn deregister_defaults_to_decommissioned() {
        let cli = Cli::try_parse_from(["fedstore", "deregister", "SC1"]).unwrap();
        match cli.command {
            Command::Deregister { id, state } => {
                assert_eq!(id, "SC1");
                assert_eq!(SubClusterState::from(state), SubClusterState::Decommissioned);
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn deregister_rejects_active() {
        assert!(Cli::try_parse_from(["fedstore", "deregister", "SC1", "--state", "active"]).is_err());
    }

    #[test]
    fn global_config_after_subcommand() {
        let cli = Cli::try_parse_from(["fedstore", "list-app-homes", "-c", "fed.toml"]).unwrap();
        assert_eq!(cli.config, Some(PathBuf::from("fed.toml")));
        assert!(matches!(cli.command, Command::ListAppHomes));
    }

    #[tokio::test]
    async fn run_against_memory_store() {
        let store = FederationStateStore::open(StoreConfig::in_memory(
            fedstore_state::Driver::Memory,
        ))
        .unwrap();

        let register = Cli::try_parse_from([
            "fedstore",
            "register",
            "--id",
            "SC1",
            "--amrm",
            "rm1:8030",
            "--client-rm",
            "rm1:8032",
            "--rm-admin",
            "rm1:8033",
            "--rm-web",
            "rm1:8088",
        ])
        .unwrap();
        run(&store, register.command).await.unwrap();

        let add = Cli::try_parse_from(["fedstore", "add-app-home", "app_1_1", "SC1"]).unwrap();
        run(&store, add.command).await.unwrap();

        assert_eq!(
            store.get_application_home_sub_cluster("app_1_1").await.unwrap(),
            "SC1"
        );

        let missing = Cli::try_parse_from(["fedstore", "get-app-home", "app_9"]).unwrap();
        assert!(run(&store, missing.command).await.is_err());
    }

    fn register_args(config: &Path) -> Vec<String> {
        let config = config.display().to_string();
        [
            "fedstore",
            "--config",
            config.as_str(),
            "register",
            "--id",
            "SC1",
            "--amrm",
            "rm1:8030",
            "--client-rm",
            "rm1:8032",
            "--rm-admin",
            "rm1:8033",
            "--rm-web",
            "rm1:8088",
            "--start-time",
            "1700000000000",
        ]
        .iter()
        .map(|arg| arg.to_string())
        .collect()
    }

    #[tokio::test]
    async fn run_against_config_file_store() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("state.redb");
        let config_path = dir.path().join("fedstore.toml");
        std::fs::write(
            &config_path,
            format!(
                "[backend]\ndriver = \"redb\"\nurl = \"{}\"\n\n[policy]\nreregistration = \"reject\"\n",
                db_path.display()
            ),
        )
        .unwrap();

        let cli = Cli::try_parse_from(register_args(&config_path)).unwrap();
        let config = load_config(cli.config.as_deref()).unwrap();
        assert_eq!(config.backend.driver, fedstore_state::Driver::Redb);
        assert_eq!(
            config.policy.reregistration,
            fedstore_state::ReregistrationPolicy::Reject
        );

        let store = FederationStateStore::open(config.clone()).unwrap();
        run(&store, cli.command).await.unwrap();
        // Running the same command again is a retry, not a conflict.
        let retry = Cli::try_parse_from(register_args(&config_path)).unwrap();
        run(&store, retry.command).await.unwrap();
        store.close().await;

        let reopened = FederationStateStore::open(config).unwrap();
        let stored = reopened.get_sub_cluster("SC1").await.unwrap();
        assert_eq!(stored.last_start_time, 1_700_000_000_000);
        assert_eq!(stored.state, SubClusterState::Active);
        reopened.close().await;
    }

    #[test]
    fn missing_config_file_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let err = load_config(Some(dir.path().join("absent.toml").as_path())).unwrap_err();
        assert!(err.to_string().contains("absent.toml"));
    }

    #[test]
    fn no_config_means_in_memory_store() {
        let config = load_config(None).unwrap();
        assert_eq!(config, StoreConfig::default());
    }
}
