//! Schema installation and migration
//!
//! At startup, before any traffic is served, the Table Manager drives each
//! binding through `install`:
//!
//! 1. no descriptor on the backend → first use: write the descriptor;
//! 2. identical descriptor → nothing to do (ephemeral tables are wiped);
//! 3. additive delta (new columns, new indices on existing columns) →
//!    rewrite rows with defaults and backfill the new index sets;
//! 4. anything else → `SchemaMismatch`, fatal before serving.
//!
//! The descriptor is a bincode-encoded copy of the component definition plus
//! a format version; permission and backend binding are part of it, so
//! changing either reads as an incompatible definition.

use crate::table::{TableBinding, TableManager};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tessera_core::bundle::{CommitBundle, CommitOutcome, Mutation};
use tessera_core::error::{Result, TesseraError};
use tessera_core::row::Row;
use tessera_core::schema::ComponentDef;
use tessera_core::traits::Backend;
use tessera_core::types::Persistence;
use tracing::{debug, info};

/// On-backend descriptor format version
const DESCRIPTOR_FORMAT: u32 = 1;

#[derive(Debug, Serialize, Deserialize)]
struct SchemaDescriptor {
    format: u32,
    def: ComponentDef,
}

/// Outcome of comparing a registered definition against the persisted one
#[derive(Debug, PartialEq, Eq)]
pub enum SchemaDelta {
    /// Definitions match field by field
    Identical,
    /// Only additions: new columns and/or new indices on existing columns
    Additive {
        /// Names of columns absent from the persisted definition
        new_columns: Vec<String>,
        /// Existing columns that newly carry an index
        new_indices: Vec<String>,
    },
}

/// Classify the delta between the persisted and the registered definition
///
/// # Errors
///
/// `SchemaMismatch` for any non-additive difference: removed or retyped
/// columns, changed unique flags, dropped indices, or a changed permission,
/// persistence, or backend binding.
pub fn classify(old: &ComponentDef, new: &ComponentDef) -> Result<SchemaDelta> {
    let table = new.name();
    if old.name() != new.name() || old.namespace() != new.namespace() {
        return Err(TesseraError::schema_mismatch(table, "component identity changed"));
    }
    if old.permission() != new.permission() {
        return Err(TesseraError::schema_mismatch(
            table,
            "permission class is part of component identity",
        ));
    }
    if old.backend() != new.backend() {
        return Err(TesseraError::schema_mismatch(
            table,
            "backend binding is part of component identity",
        ));
    }
    if old.persistence() != new.persistence() {
        return Err(TesseraError::schema_mismatch(table, "persistence policy changed"));
    }

    let mut new_indices = Vec::new();
    for old_col in old.columns() {
        let Some(new_col) = new.column(&old_col.name) else {
            return Err(TesseraError::schema_mismatch(
                table,
                format!("column {:?} was removed", old_col.name),
            ));
        };
        if new_col.dtype != old_col.dtype {
            return Err(TesseraError::schema_mismatch(
                table,
                format!("column {:?} changed type", old_col.name),
            ));
        }
        if new_col.unique != old_col.unique {
            return Err(TesseraError::schema_mismatch(
                table,
                format!("column {:?} changed uniqueness", old_col.name),
            ));
        }
        match (old_col.index, new_col.index) {
            (true, false) => {
                return Err(TesseraError::schema_mismatch(
                    table,
                    format!("index on {:?} was dropped", old_col.name),
                ))
            }
            (false, true) => new_indices.push(new_col.name.clone()),
            _ => {}
        }
    }

    let new_columns: Vec<String> = new
        .columns()
        .iter()
        .filter(|c| old.column(&c.name).is_none())
        .map(|c| c.name.clone())
        .collect();

    if new_columns.is_empty() && new_indices.is_empty() {
        Ok(SchemaDelta::Identical)
    } else {
        Ok(SchemaDelta::Additive {
            new_columns,
            new_indices,
        })
    }
}

/// Install or verify every binding of a manager against a backend
///
/// Fatal on any incompatibility; the worker must not serve afterwards.
pub fn install(manager: &TableManager, backend: &Arc<dyn Backend>) -> Result<()> {
    for binding in manager.bindings() {
        install_one(binding, backend)?;
    }
    Ok(())
}

fn install_one(binding: &Arc<TableBinding>, backend: &Arc<dyn Backend>) -> Result<()> {
    let def = binding.def();
    let table = def.name();

    let persisted = match backend.read_blob(binding.schema_key())? {
        None => {
            write_descriptor(binding, backend)?;
            if def.persistence() == Persistence::Ephemeral {
                backend.clear_table(binding.row_prefix(), &binding.index_keys())?;
            }
            info!(table, "installed schema");
            return Ok(());
        }
        Some(bytes) => bytes,
    };

    let descriptor: SchemaDescriptor = bincode::deserialize(&persisted)
        .map_err(|e| TesseraError::schema_mismatch(table, format!("unreadable descriptor: {}", e)))?;
    if descriptor.format != DESCRIPTOR_FORMAT {
        return Err(TesseraError::schema_mismatch(
            table,
            format!("descriptor format {} unsupported", descriptor.format),
        ));
    }

    if def.persistence() == Persistence::Ephemeral {
        // Restart-wiped tables never migrate; verify and clear.
        classify(&descriptor.def, def)?;
        backend.clear_table(binding.row_prefix(), &binding.index_keys())?;
        write_descriptor(binding, backend)?;
        debug!(table, "wiped ephemeral table");
        return Ok(());
    }

    match classify(&descriptor.def, def)? {
        SchemaDelta::Identical => Ok(()),
        SchemaDelta::Additive {
            new_columns,
            new_indices,
        } => {
            migrate(binding, backend, &new_columns, &new_indices)?;
            write_descriptor(binding, backend)?;
            info!(
                table,
                added_columns = new_columns.len(),
                added_indices = new_indices.len(),
                "migrated schema"
            );
            Ok(())
        }
    }
}

fn write_descriptor(binding: &Arc<TableBinding>, backend: &Arc<dyn Backend>) -> Result<()> {
    let descriptor = SchemaDescriptor {
        format: DESCRIPTOR_FORMAT,
        def: binding.def().as_ref().clone(),
    };
    let bytes = bincode::serialize(&descriptor)
        .map_err(|e| TesseraError::serialization(e.to_string()))?;
    backend.write_blob(binding.schema_key(), bytes)
}

/// Rewrite every row with the new column set and backfill new index sets
fn migrate(
    binding: &Arc<TableBinding>,
    backend: &Arc<dyn Backend>,
    new_columns: &[String],
    new_indices: &[String],
) -> Result<()> {
    let def = binding.def();
    let rows = backend.scan_rows(binding.row_prefix())?;

    // A new unique column would hand every existing row the same default.
    for name in new_columns {
        let col = def.column(name).expect("classified column exists");
        if col.unique && rows.len() > 1 {
            return Err(TesseraError::schema_mismatch(
                def.name(),
                format!("cannot add unique column {:?} to a populated table", name),
            ));
        }
    }

    let mut bundle = CommitBundle::default();
    for old_row in rows {
        let mut values = Vec::with_capacity(def.columns().len());
        for col in def.columns() {
            match old_row.get(&col.name) {
                Some(v) => values.push(v.clone()),
                None => values.push(col.default.clone()),
            }
        }
        let row = Row::from_parts(def.clone(), old_row.id(), old_row.version(), values)?;

        for name in new_columns.iter().chain(new_indices) {
            let col = def.column(name).expect("classified column exists");
            if col.index {
                let value = row.get(name).expect("column just written");
                let entry = binding.index_entry(name, value, row.id())?;
                let index_key = binding
                    .index_key(name)
                    .expect("indexed column has a key")
                    .to_string();
                bundle.mutations.push(Mutation::IndexAdd { index_key, entry });
            }
        }
        bundle.mutations.push(Mutation::PutRow {
            key: binding.row_key(row.id()),
            row,
        });
    }

    if bundle.is_empty() {
        return Ok(());
    }
    match backend.commit(bundle)? {
        CommitOutcome::Committed { .. } => Ok(()),
        other => Err(TesseraError::internal(format!(
            "unconditional migration bundle rejected: {:?}",
            other
        ))),
    }
}
