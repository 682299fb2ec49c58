//! Commit planning: identity-map entries → commit bundle
//!
//! The planner pattern-matches every entry and emits:
//!
//! 1. **Preconditions**: `RowAbsent` for inserts, a version check for
//!    updates and deletes (pinning the pre-image), and a `UniqueFree` probe
//!    for every newly used value on a `unique` column. The probe tolerates
//!    holders whose entries this same bundle removes, which is what lets a
//!    transaction swap unique values between two rows.
//! 2. **Mutations**: row writes with `_version` bumped by one, row deletes,
//!    and index add/remove pairs for every changed indexed column.
//! 3. **Notifications**: one change batch per touched table, published by
//!    the backend only if the commit applies.
//!
//! A row appears at most once in the bundle: the identity map is keyed by
//! `(table, id)`, so the invariant holds by construction.

use crate::entry::EntryState;
use rustc_hash::FxHashMap;
use smallvec::SmallVec;
use std::collections::BTreeMap;
use std::sync::Arc;
use tessera_backend::{TableBinding, TableManager};
use tessera_core::bundle::{
    ChangeBatch, ChangeKind, CommitBundle, Mutation, Precondition, RowChange,
};
use tessera_core::error::Result;
use tessera_core::row::Row;
use tessera_core::types::{Namespace, RowId};

pub(crate) fn plan(
    namespace: &Namespace,
    tables: &Arc<TableManager>,
    entries: &FxHashMap<(String, RowId), EntryState>,
) -> Result<CommitBundle> {
    let mut bundle = CommitBundle::default();
    let mut batches: BTreeMap<String, ChangeBatch> = BTreeMap::new();

    // Deterministic bundle order keeps races reproducible under test.
    let mut ordered: Vec<(&(String, RowId), &EntryState)> = entries.iter().collect();
    ordered.sort_by(|a, b| a.0.cmp(b.0));

    for ((table, id), entry) in ordered {
        let binding = tables.binding(namespace, table)?.clone();
        match entry {
            EntryState::Clean { .. } => {}
            EntryState::InsertPending { row } => {
                plan_insert(&mut bundle, &mut batches, &binding, *id, row)?;
            }
            EntryState::UpdatePending { pre, row } => {
                plan_update(&mut bundle, &mut batches, &binding, *id, pre, row)?;
            }
            EntryState::DeletePending { pre } => {
                plan_delete(&mut bundle, &mut batches, &binding, *id, pre)?;
            }
        }
    }

    bundle.notifications = batches.into_values().collect();
    Ok(bundle)
}

fn batch_entry<'a>(
    batches: &'a mut BTreeMap<String, ChangeBatch>,
    binding: &TableBinding,
) -> &'a mut ChangeBatch {
    batches
        .entry(binding.topic().to_string())
        .or_insert_with(|| ChangeBatch {
            seq: 0,
            topic: binding.topic().to_string(),
            changes: Vec::new(),
        })
}

fn plan_insert(
    bundle: &mut CommitBundle,
    batches: &mut BTreeMap<String, ChangeBatch>,
    binding: &Arc<TableBinding>,
    id: RowId,
    row: &Row,
) -> Result<()> {
    let key = binding.row_key(id);
    bundle
        .preconditions
        .push(Precondition::RowAbsent { key: key.clone() });

    for col in binding.def().unique_columns() {
        let value = row.get(&col.name).expect("schema column present");
        unique_probe(bundle, binding, &col.name, value, id)?;
    }

    bundle.mutations.push(Mutation::IndexAdd {
        index_key: index_key_of(binding, tessera_core::schema::ID_COLUMN)?,
        entry: binding.id_entry(id),
    });
    for col in binding.def().indexed_columns() {
        let value = row.get(&col.name).expect("schema column present");
        bundle.mutations.push(Mutation::IndexAdd {
            index_key: index_key_of(binding, &col.name)?,
            entry: binding.index_entry(&col.name, value, id)?,
        });
    }

    let mut stored = row.clone();
    stored.set_version(1);
    bundle.mutations.push(Mutation::PutRow { key, row: stored });

    batch_entry(batches, binding).changes.push(RowChange {
        id,
        kind: ChangeKind::Insert,
        changed_columns: SmallVec::new(),
    });
    Ok(())
}

fn plan_update(
    bundle: &mut CommitBundle,
    batches: &mut BTreeMap<String, ChangeBatch>,
    binding: &Arc<TableBinding>,
    id: RowId,
    pre: &Row,
    row: &Row,
) -> Result<()> {
    let changed: SmallVec<[String; 4]> = binding
        .def()
        .columns()
        .iter()
        .zip(pre.values().iter().zip(row.values()))
        .filter(|(_, (old, new))| old != new)
        .map(|(col, _)| col.name.clone())
        .collect();
    if changed.is_empty() {
        // No observable change; nothing to write, version untouched.
        return Ok(());
    }

    let key = binding.row_key(id);
    bundle.preconditions.push(Precondition::RowVersion {
        key: key.clone(),
        version: pre.version(),
    });

    for name in &changed {
        let col = binding.def().column(name).expect("column from schema zip");
        if !col.index {
            continue;
        }
        let old = pre.get(name).expect("schema column present");
        let new = row.get(name).expect("schema column present");
        bundle.mutations.push(Mutation::IndexRemove {
            index_key: index_key_of(binding, name)?,
            entry: binding.index_entry(name, old, id)?,
        });
        bundle.mutations.push(Mutation::IndexAdd {
            index_key: index_key_of(binding, name)?,
            entry: binding.index_entry(name, new, id)?,
        });
        if col.unique {
            unique_probe(bundle, binding, name, new, id)?;
        }
    }

    let mut stored = row.clone();
    stored.set_version(pre.version() + 1);
    bundle.mutations.push(Mutation::PutRow { key, row: stored });

    batch_entry(batches, binding).changes.push(RowChange {
        id,
        kind: ChangeKind::Update,
        changed_columns: changed,
    });
    Ok(())
}

fn plan_delete(
    bundle: &mut CommitBundle,
    batches: &mut BTreeMap<String, ChangeBatch>,
    binding: &Arc<TableBinding>,
    id: RowId,
    pre: &Row,
) -> Result<()> {
    let key = binding.row_key(id);
    bundle.preconditions.push(Precondition::RowVersion {
        key: key.clone(),
        version: pre.version(),
    });

    bundle.mutations.push(Mutation::IndexRemove {
        index_key: index_key_of(binding, tessera_core::schema::ID_COLUMN)?,
        entry: binding.id_entry(id),
    });
    for col in binding.def().indexed_columns() {
        let value = pre.get(&col.name).expect("schema column present");
        bundle.mutations.push(Mutation::IndexRemove {
            index_key: index_key_of(binding, &col.name)?,
            entry: binding.index_entry(&col.name, value, id)?,
        });
    }
    bundle.mutations.push(Mutation::DelRow { key });

    batch_entry(batches, binding).changes.push(RowChange {
        id,
        kind: ChangeKind::Delete,
        changed_columns: SmallVec::new(),
    });
    Ok(())
}

fn unique_probe(
    bundle: &mut CommitBundle,
    binding: &Arc<TableBinding>,
    column: &str,
    value: &tessera_core::value::Value,
    candidate: RowId,
) -> Result<()> {
    let col = binding
        .def()
        .column(column)
        .expect("unique column from schema");
    bundle.preconditions.push(Precondition::UniqueFree {
        index_key: index_key_of(binding, column)?,
        score: col.dtype.score_bits(value),
        text: col.dtype.index_text(value),
        candidate,
        table: binding.def().name().to_string(),
        column: column.to_string(),
    });
    Ok(())
}

fn index_key_of(binding: &TableBinding, column: &str) -> Result<String> {
    binding
        .index_key(column)
        .map(str::to_string)
        .ok_or_else(|| {
            tessera_core::error::TesseraError::internal(format!(
                "column {:?} lost its index key",
                column
            ))
        })
}
