//! Component definitions
//!
//! A component is a typed table schema: an ordered list of columns with
//! per-column uniqueness/index flags, a permission class, a persistence
//! policy, and a backend binding. Definitions are registered once at startup
//! and are immutable for the lifetime of the process.
//!
//! ## Contract
//!
//! A component's permission and backend binding are part of its identity:
//! changing either constitutes a new component and requires migration.
//! The implicit system columns `id` (u64 surrogate key, always unique and
//! indexed) and `_version` (optimistic-concurrency counter) never appear in
//! the user column list.

use crate::error::{Result, TesseraError};
use crate::types::{validate_name, Namespace, Permission, Persistence};
use crate::value::{ColumnType, Value};
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Name of the implicit surrogate-key column
pub const ID_COLUMN: &str = "id";

/// Name of the implicit optimistic-concurrency counter
pub const VERSION_COLUMN: &str = "_version";

/// Column OWNER-permission components must declare
pub const OWNER_COLUMN: &str = "owner";

/// Column names reserved for the system
static RESERVED_COLUMNS: Lazy<HashSet<&'static str>> =
    Lazy::new(|| [ID_COLUMN, VERSION_COLUMN].into_iter().collect());

/// One column of a component
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnDef {
    /// Column name, unique within the component
    pub name: String,
    /// Scalar type
    pub dtype: ColumnType,
    /// Value applied on insert when the caller supplies none
    pub default: Value,
    /// At most one live row may hold any given value
    pub unique: bool,
    /// Maintain an ordered index over this column
    pub index: bool,
}

impl ColumnDef {
    /// Create a plain column with the type's zero default
    pub fn new(name: impl Into<String>, dtype: ColumnType) -> Self {
        ColumnDef {
            name: name.into(),
            dtype,
            default: dtype.zero(),
            unique: false,
            index: false,
        }
    }

    /// Set the insert default
    pub fn default_value(mut self, v: Value) -> Self {
        self.default = v;
        self
    }

    /// Mark the column unique (implies indexed)
    pub fn unique(mut self) -> Self {
        self.unique = true;
        self.index = true;
        self
    }

    /// Maintain an index over the column
    pub fn indexed(mut self) -> Self {
        self.index = true;
        self
    }
}

/// Immutable definition of a component table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComponentDef {
    name: String,
    namespace: Namespace,
    columns: Vec<ColumnDef>,
    permission: Permission,
    persistence: Persistence,
    backend: String,
}

impl ComponentDef {
    /// Validate and build a component definition
    ///
    /// Normalizations applied:
    /// - `unique` columns are implicitly `index`ed;
    /// - declared defaults are normalized to the column type.
    ///
    /// # Errors
    ///
    /// `QueryError` for invalid names, duplicate or reserved column names,
    /// defaults that do not fit their column, or an OWNER component without
    /// an integer `owner` column.
    pub fn new(
        namespace: Namespace,
        name: impl Into<String>,
        columns: Vec<ColumnDef>,
        permission: Permission,
        persistence: Persistence,
        backend: impl Into<String>,
    ) -> Result<Self> {
        let name = name.into();
        validate_name("component", &name)?;

        let mut seen = HashSet::new();
        let mut normalized = Vec::with_capacity(columns.len());
        for mut col in columns {
            validate_name("column", &col.name)?;
            if RESERVED_COLUMNS.contains(col.name.as_str()) {
                return Err(TesseraError::query(format!(
                    "column name {:?} is reserved",
                    col.name
                )));
            }
            if !seen.insert(col.name.clone()) {
                return Err(TesseraError::query(format!(
                    "duplicate column {:?} on component {:?}",
                    col.name, name
                )));
            }
            if col.unique {
                col.index = true;
            }
            col.default = col.dtype.normalize(&col.default)?;
            normalized.push(col);
        }

        let def = ComponentDef {
            name,
            namespace,
            columns: normalized,
            permission,
            persistence,
            backend: backend.into(),
        };

        if permission == Permission::Owner {
            match def.column(OWNER_COLUMN) {
                Some(c) if !matches!(c.dtype, ColumnType::Str { .. } | ColumnType::Bytes { .. } | ColumnType::F32 | ColumnType::F64) => {}
                Some(_) => {
                    return Err(TesseraError::query(format!(
                        "component {:?} has OWNER permission but a non-integer owner column",
                        def.name
                    )))
                }
                None => {
                    return Err(TesseraError::query(format!(
                        "component {:?} has OWNER permission but no owner column",
                        def.name
                    )))
                }
            }
        }

        Ok(def)
    }

    /// Component name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Logical database the component belongs to
    pub fn namespace(&self) -> &Namespace {
        &self.namespace
    }

    /// User columns in declaration order (excludes `id` and `_version`)
    pub fn columns(&self) -> &[ColumnDef] {
        &self.columns
    }

    /// Access class
    pub fn permission(&self) -> Permission {
        self.permission
    }

    /// Persistence policy
    pub fn persistence(&self) -> Persistence {
        self.persistence
    }

    /// Name of the backend binding this component lives on
    pub fn backend(&self) -> &str {
        &self.backend
    }

    /// Look up a user column by name
    pub fn column(&self, name: &str) -> Option<&ColumnDef> {
        self.columns.iter().find(|c| c.name == name)
    }

    /// Positional index of a user column
    pub fn column_position(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.name == name)
    }

    /// Indexed user columns
    pub fn indexed_columns(&self) -> impl Iterator<Item = &ColumnDef> {
        self.columns.iter().filter(|c| c.index)
    }

    /// Unique user columns
    pub fn unique_columns(&self) -> impl Iterator<Item = &ColumnDef> {
        self.columns.iter().filter(|c| c.unique)
    }

    /// Whether a column (including the implicit `id`) carries an index
    pub fn has_index(&self, column: &str) -> bool {
        column == ID_COLUMN || self.column(column).map(|c| c.index).unwrap_or(false)
    }

    /// Position of the `owner` column, when declared
    pub fn owner_position(&self) -> Option<usize> {
        self.column_position(OWNER_COLUMN)
    }
}
