//! Row values and the projection interface used by commit planning
//!
//! A `Row` pairs a component definition with one value per user column plus
//! the implicit `id` and `_version` fields. The Session layer stays
//! component-agnostic by iterating rows column-by-column when it assembles a
//! commit bundle.

use crate::error::{Result, TesseraError};
use crate::schema::{ComponentDef, ID_COLUMN, VERSION_COLUMN};
use crate::types::{RowId, Version};
use crate::value::Value;
use std::sync::Arc;

/// One live (or pending) row of a component table
#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    def: Arc<ComponentDef>,
    id: RowId,
    version: Version,
    values: Vec<Value>,
}

impl Row {
    /// Build a fresh row with every column at its declared default
    ///
    /// The version starts at 0; the commit path writes 1 for inserts.
    pub fn with_defaults(def: Arc<ComponentDef>, id: RowId) -> Self {
        let values = def.columns().iter().map(|c| c.default.clone()).collect();
        Row {
            def,
            id,
            version: 0,
            values,
        }
    }

    /// Rehydrate a row from backend storage
    ///
    /// # Errors
    ///
    /// `Internal` if the value count does not match the schema; the Table
    /// Manager's startup verification makes this unreachable in a healthy
    /// deployment.
    pub fn from_parts(
        def: Arc<ComponentDef>,
        id: RowId,
        version: Version,
        values: Vec<Value>,
    ) -> Result<Self> {
        if values.len() != def.columns().len() {
            return Err(TesseraError::internal(format!(
                "row {} of {} carries {} values for {} columns",
                id,
                def.name(),
                values.len(),
                def.columns().len()
            )));
        }
        Ok(Row {
            def,
            id,
            version,
            values,
        })
    }

    /// Component definition this row belongs to
    pub fn def(&self) -> &Arc<ComponentDef> {
        &self.def
    }

    /// Surrogate primary key
    pub fn id(&self) -> RowId {
        self.id
    }

    /// Version observed when the row was read (0 for fresh inserts)
    pub fn version(&self) -> Version {
        self.version
    }

    /// Bump the stored version; used by the backend when applying a commit
    pub fn set_version(&mut self, version: Version) {
        self.version = version;
    }

    /// All user-column values in declaration order
    pub fn values(&self) -> &[Value] {
        &self.values
    }

    /// Value of a user column
    pub fn get(&self, column: &str) -> Option<&Value> {
        self.def
            .column_position(column)
            .map(|i| &self.values[i])
    }

    /// Signed-integer view of a column, for game logic convenience
    pub fn get_int(&self, column: &str) -> Option<i64> {
        match self.get(column)? {
            Value::Int(x) => Some(*x),
            Value::UInt(x) if *x <= i64::MAX as u64 => Some(*x as i64),
            _ => None,
        }
    }

    /// Float view of a column
    pub fn get_float(&self, column: &str) -> Option<f64> {
        match self.get(column)? {
            Value::Float(x) => Some(*x),
            Value::Int(x) => Some(*x as f64),
            Value::UInt(x) => Some(*x as f64),
            _ => None,
        }
    }

    /// Write a user column, normalizing to the declared type
    ///
    /// # Errors
    ///
    /// `QueryError` for unknown columns or values that do not fit.
    pub fn set(&mut self, column: &str, value: Value) -> Result<()> {
        let pos = self.def.column_position(column).ok_or_else(|| {
            TesseraError::query(format!(
                "component {} has no column {:?}",
                self.def.name(),
                column
            ))
        })?;
        let normalized = self.def.columns()[pos].dtype.normalize(&value)?;
        self.values[pos] = normalized;
        Ok(())
    }

    /// Owner identity of the row, when the component declares one
    pub fn owner(&self) -> Option<u64> {
        let pos = self.def.owner_position()?;
        self.values[pos].as_caller_id()
    }

    /// Whether two rows carry the same observable content
    ///
    /// Version bumps without value changes are not observable through the
    /// subscription plane.
    pub fn same_content(&self, other: &Row) -> bool {
        self.id == other.id && self.values == other.values
    }

    /// JSON object image for the wire surface (`id` plus every user column)
    pub fn to_json(&self) -> serde_json::Value {
        let mut map = serde_json::Map::with_capacity(self.values.len() + 2);
        map.insert(ID_COLUMN.to_string(), serde_json::Value::from(self.id));
        map.insert(
            VERSION_COLUMN.to_string(),
            serde_json::Value::from(self.version),
        );
        for (col, v) in self.def.columns().iter().zip(&self.values) {
            map.insert(col.name.clone(), v.to_json());
        }
        serde_json::Value::Object(map)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::ColumnDef;
    use crate::types::{Namespace, Permission, Persistence};
    use crate::value::ColumnType;

    fn hp() -> Arc<ComponentDef> {
        Arc::new(
            ComponentDef::new(
                Namespace::new("game").unwrap(),
                "HP",
                vec![
                    ColumnDef::new("owner", ColumnType::I64).unique(),
                    ColumnDef::new("value", ColumnType::I32).default_value(Value::Int(100)),
                ],
                Permission::Owner,
                Persistence::Persistent,
                "main",
            )
            .unwrap(),
        )
    }

    #[test]
    fn test_with_defaults_fills_declared_defaults() {
        let row = Row::with_defaults(hp(), 7);
        assert_eq!(row.id(), 7);
        assert_eq!(row.version(), 0);
        assert_eq!(row.get("owner"), Some(&Value::Int(0)));
        assert_eq!(row.get("value"), Some(&Value::Int(100)));
    }

    #[test]
    fn test_set_normalizes_width() {
        let mut row = Row::with_defaults(hp(), 1);
        row.set("value", Value::UInt(12)).unwrap();
        assert_eq!(row.get("value"), Some(&Value::Int(12)));
        assert!(row.set("value", Value::Int(i64::MAX)).is_err());
        assert!(row.set("missing", Value::Int(1)).is_err());
    }

    #[test]
    fn test_owner_view() {
        let mut row = Row::with_defaults(hp(), 1);
        row.set("owner", Value::Int(42)).unwrap();
        assert_eq!(row.owner(), Some(42));
    }

    #[test]
    fn test_same_content_ignores_version() {
        let mut a = Row::with_defaults(hp(), 1);
        let mut b = a.clone();
        b.set_version(9);
        assert!(a.same_content(&b));
        a.set("value", Value::Int(5)).unwrap();
        assert!(!a.same_content(&b));
    }

    #[test]
    fn test_from_parts_checks_arity() {
        assert!(Row::from_parts(hp(), 1, 1, vec![Value::Int(1)]).is_err());
        let row = Row::from_parts(hp(), 1, 3, vec![Value::Int(1), Value::Int(50)]).unwrap();
        assert_eq!(row.version(), 3);
    }

    #[test]
    fn test_to_json_shape() {
        let mut row = Row::with_defaults(hp(), 9);
        row.set("owner", Value::Int(1)).unwrap();
        let json = row.to_json();
        assert_eq!(json["id"], serde_json::json!(9));
        assert_eq!(json["owner"], serde_json::json!(1));
        assert_eq!(json["value"], serde_json::json!(100));
    }
}
