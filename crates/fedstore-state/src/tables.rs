//! redb table definitions for the durable backend.
//!
//! Each table uses `&str` keys and `&[u8]` values (JSON-serialized domain types).
//! The durable schema has no reservation table; that backend does not
//! track reservation homes.

use redb::TableDefinition;

/// Sub-cluster registrations keyed by `{sub_cluster_id}`.
pub const SUB_CLUSTERS: TableDefinition<&str, &[u8]> = TableDefinition::new("sub_clusters");

/// Application homes keyed by `{application_id}`.
pub const APPLICATION_HOMES: TableDefinition<&str, &[u8]> =
    TableDefinition::new("applications_home_sub_cluster");

/// Queue policy configurations keyed by `{queue}`.
pub const POLICIES: TableDefinition<&str, &[u8]> = TableDefinition::new("policies");

/// Store metadata. Holds the schema version under [`VERSION_KEY`].
pub const META: TableDefinition<&str, &[u8]> = TableDefinition::new("meta");

pub const VERSION_KEY: &str = "schema_version";
