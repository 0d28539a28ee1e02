//! Durable backend backed by redb.
//!
//! Tracks sub-clusters, application homes, policies and the schema
//! version. Reservation homes are not part of this schema and the backend
//! does not declare them.
//!
//! A connection wraps an open [`Database`]. File-backed stores open the
//! database file on connect; in-memory stores share one database created
//! with the backend, so reconnecting does not lose data.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, Weak};

use ::redb::{Database, DatabaseError, ReadableDatabase, ReadableTable, StorageError, TableDefinition};
use semver::Version;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::debug;

use super::{BackendConnection, StoreBackend};
use crate::capability::Capabilities;
use crate::config::{Credentials, ReregistrationPolicy};
use crate::error::BackendError;
use crate::rules::{self, decide_registration, reconcile_version};
use crate::tables::*;
use crate::types::*;

/// Convert any `Display` error into a `BackendError` variant via a closure factory.
macro_rules! map_err {
    ($variant:ident) => {
        |e| BackendError::$variant(e.to_string())
    };
}

/// Only I/O failures reaching the file are transient. A file another
/// handle holds open, or one redb cannot read, is a storage error.
fn open_error(err: DatabaseError) -> BackendError {
    match err {
        DatabaseError::Storage(StorageError::Io(e)) => BackendError::Disconnected(e.to_string()),
        other => BackendError::Storage(other.to_string()),
    }
}

type Table = TableDefinition<'static, &'static str, &'static [u8]>;

enum Location {
    Memory(Arc<Database>),
    /// The file stays open while any connection holds it.
    File {
        path: PathBuf,
        open: Mutex<Weak<Database>>,
    },
}

/// redb-backed store backend.
pub struct RedbBackend {
    location: Location,
}

impl RedbBackend {
    /// Backend over a database file, opened lazily on first connect.
    pub fn open(path: &Path) -> Self {
        Self {
            location: Location::File {
                path: path.to_path_buf(),
                open: Mutex::new(Weak::new()),
            },
        }
    }

    /// Create an ephemeral in-memory backend (for testing).
    pub fn open_in_memory() -> Result<Self, BackendError> {
        let backend = ::redb::backends::InMemoryBackend::new();
        let db = Database::builder()
            .create_with_backend(backend)
            .map_err(map_err!(Storage))?;
        Ok(Self {
            location: Location::Memory(Arc::new(db)),
        })
    }

    /// Parse a backend URL: `memory:`, `redb:memory`, `redb://<path>` or a bare path.
    pub fn from_url(url: &str) -> Result<Self, BackendError> {
        match url.trim() {
            "memory:" | "redb:memory" => Self::open_in_memory(),
            other => {
                let path = other.strip_prefix("redb://").unwrap_or(other);
                Ok(Self::open(Path::new(path)))
            }
        }
    }
}

impl StoreBackend for RedbBackend {
    fn name(&self) -> &'static str {
        "redb"
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities::without_reservations()
    }

    fn connect(&self, credentials: &Credentials) -> Result<Box<dyn BackendConnection>, BackendError> {
        let db = match &self.location {
            Location::Memory(db) => Arc::clone(db),
            Location::File { path, open } => {
                let mut open = open
                    .lock()
                    .map_err(|_| BackendError::Storage("database handle poisoned".to_string()))?;
                match open.upgrade() {
                    Some(db) => db,
                    None => {
                        let db = Arc::new(Database::create(path).map_err(open_error)?);
                        debug!(?path, "redb database opened");
                        *open = Arc::downgrade(&db);
                        db
                    }
                }
            }
        };
        if !credentials.username.is_empty() {
            debug!(username = %credentials.username, "redb backend does not authenticate; credentials ignored");
        }
        let conn = RedbConnection { db };
        conn.ensure_schema()?;
        Ok(Box::new(conn))
    }
}

/// A live session on a redb database.
pub struct RedbConnection {
    db: Arc<Database>,
}

fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>, BackendError> {
    serde_json::to_vec(value).map_err(map_err!(Serialize))
}

fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, BackendError> {
    serde_json::from_slice(bytes).map_err(map_err!(Deserialize))
}

fn parse_version(bytes: &[u8]) -> Result<Version, BackendError> {
    let text = std::str::from_utf8(bytes).map_err(map_err!(Deserialize))?;
    Version::parse(text).map_err(map_err!(Deserialize))
}

impl RedbConnection {
    /// Create all tables if they don't exist yet and check the schema version.
    fn ensure_schema(&self) -> Result<(), BackendError> {
        let txn = self.db.begin_write().map_err(map_err!(Storage))?;
        {
            // Opening a table in a write transaction creates it if absent.
            txn.open_table(SUB_CLUSTERS).map_err(map_err!(Storage))?;
            txn.open_table(APPLICATION_HOMES).map_err(map_err!(Storage))?;
            txn.open_table(POLICIES).map_err(map_err!(Storage))?;

            let mut meta = txn.open_table(META).map_err(map_err!(Storage))?;
            let stored = match meta.get(VERSION_KEY).map_err(map_err!(Storage))? {
                Some(guard) => Some(parse_version(guard.value())?),
                None => None,
            };
            let fresh = stored.is_none();
            let version = reconcile_version(stored)?;
            if fresh {
                meta.insert(VERSION_KEY, version.to_string().as_bytes())
                    .map_err(map_err!(Storage))?;
                debug!(%version, "schema version initialized");
            }
        }
        txn.commit().map_err(map_err!(Storage))?;
        Ok(())
    }

    fn read<T: DeserializeOwned>(&self, table: Table, key: &str) -> Result<Option<T>, BackendError> {
        let txn = self.db.begin_read().map_err(map_err!(Storage))?;
        let table = txn.open_table(table).map_err(map_err!(Storage))?;
        match table.get(key).map_err(map_err!(Storage))? {
            Some(guard) => Ok(Some(decode(guard.value())?)),
            None => Ok(None),
        }
    }

    fn scan<T: DeserializeOwned>(&self, table: Table) -> Result<Vec<T>, BackendError> {
        let txn = self.db.begin_read().map_err(map_err!(Storage))?;
        let table = txn.open_table(table).map_err(map_err!(Storage))?;
        let mut results = Vec::new();
        for entry in table.iter().map_err(map_err!(Storage))? {
            let (_, value) = entry.map_err(map_err!(Storage))?;
            results.push(decode(value.value())?);
        }
        Ok(results)
    }

    fn write<T: Serialize>(&self, table: Table, key: &str, value: &T) -> Result<(), BackendError> {
        let bytes = encode(value)?;
        let txn = self.db.begin_write().map_err(map_err!(Storage))?;
        {
            let mut table = txn.open_table(table).map_err(map_err!(Storage))?;
            table
                .insert(key, bytes.as_slice())
                .map_err(map_err!(Storage))?;
        }
        txn.commit().map_err(map_err!(Storage))?;
        Ok(())
    }

    /// Read-modify-write one record inside a single write transaction.
    ///
    /// `f` sees the current value and returns the value to store (if any)
    /// plus the procedure result. Nothing is committed when `f` returns
    /// `None`.
    fn modify<T, R>(
        &self,
        table: Table,
        key: &str,
        f: impl FnOnce(Option<T>) -> (Option<T>, R),
    ) -> Result<R, BackendError>
    where
        T: Serialize + DeserializeOwned,
    {
        let txn = self.db.begin_write().map_err(map_err!(Storage))?;
        let (changed, result) = {
            let mut table = txn.open_table(table).map_err(map_err!(Storage))?;
            let current: Option<T> = match table.get(key).map_err(map_err!(Storage))? {
                Some(guard) => Some(decode(guard.value())?),
                None => None,
            };
            let (next, result) = f(current);
            let changed = match next {
                Some(value) => {
                    let bytes = encode(&value)?;
                    table
                        .insert(key, bytes.as_slice())
                        .map_err(map_err!(Storage))?;
                    true
                }
                None => false,
            };
            (changed, result)
        };
        if changed {
            txn.commit().map_err(map_err!(Storage))?;
        } else {
            txn.abort().map_err(map_err!(Storage))?;
        }
        Ok(result)
    }
}

impl BackendConnection for RedbConnection {
    fn ping(&mut self) -> bool {
        self.db.begin_read().is_ok()
    }

    // ── Sub-clusters ───────────────────────────────────────────────

    fn register_sub_cluster(
        &mut self,
        info: &SubClusterInfo,
        policy: ReregistrationPolicy,
    ) -> Result<RegisterOutcome, BackendError> {
        let outcome = self.modify(SUB_CLUSTERS, &info.sub_cluster_id, |current: Option<SubClusterInfo>| {
            let outcome = decide_registration(current.as_ref(), info, policy);
            (outcome.writes().then(|| info.clone()), outcome)
        })?;
        debug!(sub_cluster_id = %info.sub_cluster_id, ?outcome, "sub-cluster register procedure");
        Ok(outcome)
    }

    fn apply_state_change(
        &mut self,
        sub_cluster_id: &str,
        change: &StateChange,
    ) -> Result<StateChangeOutcome, BackendError> {
        self.modify(SUB_CLUSTERS, sub_cluster_id, |current: Option<SubClusterInfo>| match current {
            None => (None, StateChangeOutcome::NotFound),
            Some(mut record) => {
                if rules::apply_state_change(&mut record, change) {
                    (Some(record.clone()), StateChangeOutcome::Applied(record))
                } else {
                    (None, StateChangeOutcome::Skipped(record))
                }
            }
        })
    }

    fn get_sub_cluster(&mut self, sub_cluster_id: &str) -> Result<Option<SubClusterInfo>, BackendError> {
        self.read(SUB_CLUSTERS, sub_cluster_id)
    }

    fn list_sub_clusters(&mut self) -> Result<Vec<SubClusterInfo>, BackendError> {
        self.scan(SUB_CLUSTERS)
    }

    // ── Application homes ──────────────────────────────────────────

    fn insert_application_home_if_absent(
        &mut self,
        home: &ApplicationHomeSubCluster,
    ) -> Result<ApplicationHomeSubCluster, BackendError> {
        self.modify(
            APPLICATION_HOMES,
            &home.application_id,
            |current: Option<ApplicationHomeSubCluster>| match current {
                Some(existing) => (None, existing),
                None => (Some(home.clone()), home.clone()),
            },
        )
    }

    fn get_application_home(
        &mut self,
        application_id: &str,
    ) -> Result<Option<ApplicationHomeSubCluster>, BackendError> {
        self.read(APPLICATION_HOMES, application_id)
    }

    fn list_application_homes(&mut self) -> Result<Vec<ApplicationHomeSubCluster>, BackendError> {
        self.scan(APPLICATION_HOMES)
    }

    fn update_application_home(
        &mut self,
        application_id: &str,
        home_sub_cluster: &str,
    ) -> Result<bool, BackendError> {
        self.modify(
            APPLICATION_HOMES,
            application_id,
            |current: Option<ApplicationHomeSubCluster>| match current {
                Some(mut home) => {
                    home.home_sub_cluster = home_sub_cluster.to_string();
                    (Some(home), true)
                }
                None => (None, false),
            },
        )
    }

    // ── Policies ───────────────────────────────────────────────────

    fn put_policy(&mut self, policy: &SubClusterPolicyConfiguration) -> Result<(), BackendError> {
        self.write(POLICIES, &policy.queue, policy)
    }

    fn get_policy(&mut self, queue: &str) -> Result<Option<SubClusterPolicyConfiguration>, BackendError> {
        self.read(POLICIES, queue)
    }

    fn list_policies(&mut self) -> Result<Vec<SubClusterPolicyConfiguration>, BackendError> {
        self.scan(POLICIES)
    }

    // ── Version ────────────────────────────────────────────────────

    fn load_version(&mut self) -> Result<Version, BackendError> {
        let txn = self.db.begin_read().map_err(map_err!(Storage))?;
        let meta = txn.open_table(META).map_err(map_err!(Storage))?;
        match meta.get(VERSION_KEY).map_err(map_err!(Storage))? {
            Some(guard) => parse_version(guard.value()),
            None => Err(BackendError::Storage("schema version missing".to_string())),
        }
    }
}
