//! Table bindings: component → concrete keyspace
//!
//! A `TableBinding` resolves a component definition plus its cluster id to
//! the concrete backend key layout: the row-key prefix, one index key per
//! indexed column (plus the implicit `id` index), the schema descriptor key,
//! and the change-notification topic. Bindings are built once at startup and
//! shared read-only.

use rustc_hash::FxHashMap;
use std::collections::BTreeMap;
use std::sync::Arc;
use tessera_core::bundle::IndexEntry;
use tessera_core::error::{Result, TesseraError};
use tessera_core::key;
use tessera_core::schema::{ComponentDef, ID_COLUMN};
use tessera_core::types::{ClusterId, Namespace, RowId};
use tessera_core::value::Value;

/// Concrete key layout of one component table
#[derive(Debug)]
pub struct TableBinding {
    def: Arc<ComponentDef>,
    cluster: ClusterId,
    row_prefix: String,
    index_keys: FxHashMap<String, String>,
    schema_key: String,
    topic: String,
}

impl TableBinding {
    /// Resolve the layout for a component in its cluster
    pub fn new(def: Arc<ComponentDef>, cluster: ClusterId) -> Self {
        let ns = def.namespace().clone();
        let mut index_keys = FxHashMap::default();
        index_keys.insert(
            ID_COLUMN.to_string(),
            key::index_key(&ns, def.name(), cluster, ID_COLUMN),
        );
        for col in def.indexed_columns() {
            index_keys.insert(
                col.name.clone(),
                key::index_key(&ns, def.name(), cluster, &col.name),
            );
        }
        let row_prefix = format!("{}:id:", key::table_prefix(&ns, def.name(), cluster));
        TableBinding {
            row_prefix,
            schema_key: key::schema_key(&ns, def.name(), cluster),
            topic: key::change_topic(&ns, def.name()),
            index_keys,
            def,
            cluster,
        }
    }

    /// Component definition
    pub fn def(&self) -> &Arc<ComponentDef> {
        &self.def
    }

    /// Cluster the component is co-located in
    pub fn cluster(&self) -> ClusterId {
        self.cluster
    }

    /// Key of one row
    pub fn row_key(&self, id: RowId) -> String {
        format!("{}{}", self.row_prefix, id)
    }

    /// Prefix of every row key of this table
    pub fn row_prefix(&self) -> &str {
        &self.row_prefix
    }

    /// Index key of a column, when it carries an index
    pub fn index_key(&self, column: &str) -> Option<&str> {
        self.index_keys.get(column).map(String::as_str)
    }

    /// All index keys of the table (the implicit `id` index included)
    pub fn index_keys(&self) -> Vec<String> {
        self.index_keys.values().cloned().collect()
    }

    /// Schema descriptor key
    pub fn schema_key(&self) -> &str {
        &self.schema_key
    }

    /// Change-notification topic
    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Index entry for a column value on a given row
    ///
    /// The value must already be normalized to the column type.
    pub fn index_entry(&self, column: &str, value: &Value, id: RowId) -> Result<IndexEntry> {
        if column == ID_COLUMN {
            return Ok(IndexEntry::new(id, "", id));
        }
        let col = self.def.column(column).ok_or_else(|| {
            TesseraError::query(format!(
                "component {} has no column {:?}",
                self.def.name(),
                column
            ))
        })?;
        Ok(IndexEntry::new(
            col.dtype.score_bits(value),
            col.dtype.index_text(value),
            id,
        ))
    }

    /// Index entry of the implicit `id` index
    pub fn id_entry(&self, id: RowId) -> IndexEntry {
        IndexEntry::new(id, "", id)
    }
}

/// Read-only directory of table bindings on one worker
#[derive(Debug, Default)]
pub struct TableManager {
    tables: BTreeMap<(Namespace, String), Arc<TableBinding>>,
}

impl TableManager {
    /// Build bindings for a set of components with their planned clusters
    pub fn new(components: impl IntoIterator<Item = (Arc<ComponentDef>, ClusterId)>) -> Self {
        let mut tables = BTreeMap::new();
        for (def, cluster) in components {
            let ns = def.namespace().clone();
            let name = def.name().to_string();
            tables.insert((ns, name), Arc::new(TableBinding::new(def, cluster)));
        }
        TableManager { tables }
    }

    /// Look up the binding of a component
    pub fn binding(&self, ns: &Namespace, table: &str) -> Result<&Arc<TableBinding>> {
        self.tables
            .get(&(ns.clone(), table.to_string()))
            .ok_or_else(|| {
                TesseraError::query(format!("unknown component {}:{}", ns, table))
            })
    }

    /// Iterate every binding
    pub fn bindings(&self) -> impl Iterator<Item = &Arc<TableBinding>> {
        self.tables.values()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tessera_core::schema::ColumnDef;
    use tessera_core::types::{Permission, Persistence};
    use tessera_core::value::ColumnType;

    fn position() -> Arc<ComponentDef> {
        Arc::new(
            ComponentDef::new(
                Namespace::new("game").unwrap(),
                "Position",
                vec![
                    ColumnDef::new("owner", ColumnType::I64),
                    ColumnDef::new("x", ColumnType::F32).indexed(),
                    ColumnDef::new("y", ColumnType::F32),
                ],
                Permission::Everybody,
                Persistence::Persistent,
                "main",
            )
            .unwrap(),
        )
    }

    #[test]
    fn test_binding_key_layout() {
        let b = TableBinding::new(position(), 2);
        assert_eq!(b.row_key(9), "game:Position:{CLU 2}:id:9");
        assert_eq!(
            b.index_key("x"),
            Some("game:Position:{CLU 2}:index:x")
        );
        assert_eq!(b.index_key("y"), None);
        assert_eq!(
            b.index_key("id"),
            Some("game:Position:{CLU 2}:index:id")
        );
        assert_eq!(b.schema_key(), "game:Position:{CLU 2}:schema");
        assert_eq!(b.topic(), "game:Position:changes");
    }

    #[test]
    fn test_index_entry_uses_column_encoding() {
        let b = TableBinding::new(position(), 0);
        let neg = b.index_entry("x", &Value::Float(-1.0), 1).unwrap();
        let pos = b.index_entry("x", &Value::Float(1.0), 2).unwrap();
        assert!(neg < pos);
        assert_eq!(b.id_entry(5), IndexEntry::new(5, "", 5));
    }

    #[test]
    fn test_manager_lookup() {
        let mgr = TableManager::new([(position(), 2)]);
        let ns = Namespace::new("game").unwrap();
        assert!(mgr.binding(&ns, "Position").is_ok());
        let err = mgr.binding(&ns, "Missing").unwrap_err();
        assert_eq!(err.code(), "QueryError");
        assert_eq!(mgr.bindings().count(), 1);
    }
}
