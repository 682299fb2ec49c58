//! Backend keyspace mapping
//!
//! For a component `T` in namespace `N` with cluster id `K`:
//! - row key: `N:T:{CLU K}:id:<id>`
//! - per-index key for column `c`: `N:T:{CLU K}:index:<c>`
//! - schema descriptor key: `N:T:{CLU K}:schema`
//!
//! The `{CLU K}` tag is a hash-slot hint: every key of a co-located System
//! cluster carries the same tag, so a slot-sharded backend places the whole
//! cluster on one shard and atomic commits stay single-shard.
//!
//! ## Contract
//!
//! This layout and the string index member encoding `"<value>:<id>"` are
//! part of the persisted compatibility contract. Cross-version changes
//! require migration.

use crate::types::{ClusterId, Namespace, RowId};

/// Hash-slot tag shared by all keys of one cluster
pub fn cluster_tag(cluster: ClusterId) -> String {
    format!("{{CLU {}}}", cluster)
}

/// Common prefix of every key belonging to one table
pub fn table_prefix(ns: &Namespace, table: &str, cluster: ClusterId) -> String {
    format!("{}:{}:{}", ns, table, cluster_tag(cluster))
}

/// Key of a single row
pub fn row_key(ns: &Namespace, table: &str, cluster: ClusterId, id: RowId) -> String {
    format!("{}:id:{}", table_prefix(ns, table, cluster), id)
}

/// Key of the ordered index set for one column
pub fn index_key(ns: &Namespace, table: &str, cluster: ClusterId, column: &str) -> String {
    format!("{}:index:{}", table_prefix(ns, table, cluster), column)
}

/// Key of the persisted schema descriptor
pub fn schema_key(ns: &Namespace, table: &str, cluster: ClusterId) -> String {
    format!("{}:schema", table_prefix(ns, table, cluster))
}

/// Notification topic carrying committed row changes of one table
pub fn change_topic(ns: &Namespace, table: &str) -> String {
    format!("{}:{}:changes", ns, table)
}

/// Member encoding for string-column index entries
///
/// Lexicographic traversal of members yields value-major ordering with the
/// row id as a stable tiebreak.
pub fn index_member(text: &str, id: RowId) -> String {
    format!("{}:{}", text, id)
}

/// Split a string index member back into `(value, id)`
pub fn split_index_member(member: &str) -> Option<(&str, RowId)> {
    let (text, id) = member.rsplit_once(':')?;
    id.parse().ok().map(|id| (text, id))
}
