//! redb table definitions for the Enrober resource store.
//!
//! Each table uses `&str` keys and `&[u8]` values (JSON-serialized objects).
//! Namespaces are keyed by name; namespaced objects by `{namespace}/{name}`.

use redb::TableDefinition;

/// Namespaces (environments) keyed by `{name}`.
pub const NAMESPACES: TableDefinition<&str, &[u8]> = TableDefinition::new("namespaces");

/// Secrets keyed by `{namespace}/{name}`.
pub const SECRETS: TableDefinition<&str, &[u8]> = TableDefinition::new("secrets");

/// Deployments keyed by `{namespace}/{name}`.
pub const DEPLOYMENTS: TableDefinition<&str, &[u8]> = TableDefinition::new("deployments");

/// Replica sets keyed by `{namespace}/{name}`.
pub const REPLICA_SETS: TableDefinition<&str, &[u8]> = TableDefinition::new("replica_sets");

/// Pods keyed by `{namespace}/{name}`.
pub const PODS: TableDefinition<&str, &[u8]> = TableDefinition::new("pods");

/// Every namespaced table, in the order a namespace cascade clears them.
pub const NAMESPACED: [TableDefinition<&str, &[u8]>; 4] = [PODS, REPLICA_SETS, DEPLOYMENTS, SECRETS];

/// Build the `{namespace}/{name}` key used by namespaced tables.
pub fn object_key(namespace: &str, name: &str) -> String {
    format!("{namespace}/{name}")
}
