//! Transactional Session with an identity map
//!
//! A Session is the per-RPC scratchpad: it caches every row it reads,
//! buffers pending inserts/updates/deletes with their pre-image versions,
//! and assembles the atomic commit bundle at the end. User logic sees a
//! consistent snapshot made of its own reads plus its own pending writes.
//!
//! # Read-Your-Writes
//!
//! Reading a row checks, in order:
//! 1. the identity map: pending content from this Session wins, a pending
//!    delete reads as missing;
//! 2. the backend: the fetched row is cached as a `Clean` entry so a second
//!    read observes the same version.
//!
//! # Lifecycle
//!
//! Sessions are single-owner values. `commit` consumes the Session, so rows
//! obtained from it cannot leak into a later transaction; dropping a Session
//! without committing leaves no server-side state.

use crate::commit::plan;
use crate::entry::EntryState;
use rustc_hash::FxHashMap;
use std::sync::Arc;
use tessera_backend::{TableBinding, TableManager};
use tessera_core::bundle::CommitOutcome;
use tessera_core::error::{Result, TesseraError};
use tessera_core::row::Row;
use tessera_core::schema::ID_COLUMN;
use tessera_core::traits::{Backend, IdAllocator, RangeBound, RangeQuery};
use tessera_core::types::{Namespace, RowId};
use tessera_core::value::{ColumnType, Value};
use tracing::trace;

/// Proof of a successful commit
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommitReceipt {
    /// Backend commit sequence; 0 for read-only Sessions
    pub seq: u64,
}

/// Per-RPC transactional scratchpad
pub struct Session {
    backend: Arc<dyn Backend>,
    tables: Arc<TableManager>,
    ids: Arc<dyn IdAllocator>,
    namespace: Namespace,
    entries: FxHashMap<(String, RowId), EntryState>,
    read_only: bool,
}

impl Session {
    /// Open a writable Session for one System invocation
    pub fn new(
        backend: Arc<dyn Backend>,
        tables: Arc<TableManager>,
        ids: Arc<dyn IdAllocator>,
        namespace: Namespace,
    ) -> Self {
        Session {
            backend,
            tables,
            ids,
            namespace,
            entries: FxHashMap::default(),
            read_only: false,
        }
    }

    /// Open a read-only Session (subscription snapshots)
    pub fn read_only(
        backend: Arc<dyn Backend>,
        tables: Arc<TableManager>,
        namespace: Namespace,
    ) -> Self {
        // Read-only Sessions never allocate ids; a zero-based source keeps
        // the constructor signature honest without threading an Option.
        Session {
            backend,
            tables,
            ids: Arc::new(tessera_core::traits::AtomicIds::default()),
            namespace,
            entries: FxHashMap::default(),
            read_only: true,
        }
    }

    /// Namespace this Session operates in
    pub fn namespace(&self) -> &Namespace {
        &self.namespace
    }

    fn binding(&self, table: &str) -> Result<Arc<TableBinding>> {
        Ok(self.tables.binding(&self.namespace, table)?.clone())
    }

    fn ensure_writable(&self) -> Result<()> {
        if self.read_only {
            return Err(TesseraError::logic("session is read-only"));
        }
        Ok(())
    }

    /// Dtype governing a lookup column, with the implicit `id` handled
    fn lookup_dtype(binding: &TableBinding, column: &str) -> Result<ColumnType> {
        if column == ID_COLUMN {
            return Ok(ColumnType::U64);
        }
        let col = binding.def().column(column).ok_or_else(|| {
            TesseraError::query(format!(
                "component {} has no column {:?}",
                binding.def().name(),
                column
            ))
        })?;
        if !col.index {
            return Err(TesseraError::query(format!(
                "column {}.{} carries no index",
                binding.def().name(),
                column
            )));
        }
        Ok(col.dtype)
    }

    // =========================================================================
    // Reads
    // =========================================================================

    /// Fetch the single row whose `where_col` equals `value`
    ///
    /// `where_col` defaults to `id` at the call sites that follow the wire
    /// surface; any other column must be indexed.
    pub fn get(&mut self, table: &str, value: &Value, where_col: &str) -> Result<Option<Row>> {
        let binding = self.binding(table)?;
        let dtype = Self::lookup_dtype(&binding, where_col)?;
        let value = dtype.normalize(value)?;

        if where_col == ID_COLUMN {
            let id = value
                .as_caller_id()
                .ok_or_else(|| TesseraError::query("id lookup requires an unsigned value"))?;
            return self.get_by_id(&binding, id);
        }

        // Pending rows from this Session shadow the backend index.
        let shadowed = self.entries.iter().find_map(|((t, _), entry)| {
            if t.as_str() != table {
                return None;
            }
            entry
                .visible()
                .filter(|row| row.get(where_col) == Some(&value))
                .cloned()
        });
        if let Some(row) = shadowed {
            return Ok(Some(row));
        }

        let index_key = binding
            .index_key(where_col)
            .ok_or_else(|| TesseraError::internal("indexed column lost its key"))?;
        let score = dtype.score_bits(&value);
        let text = dtype.index_text(&value);
        let matches = self
            .backend
            .range(index_key, &RangeQuery::exact(score, text, 16))?;

        for entry in matches {
            match self.get_by_id(&binding, entry.id)? {
                // A pending update may have moved the row off this value.
                Some(row) if row.get(where_col) == Some(&value) => return Ok(Some(row)),
                _ => continue,
            }
        }
        Ok(None)
    }

    fn get_by_id(&mut self, binding: &Arc<TableBinding>, id: RowId) -> Result<Option<Row>> {
        let table = binding.def().name().to_string();
        if let Some(entry) = self.entries.get(&(table.clone(), id)) {
            return Ok(entry.visible().cloned());
        }
        let fetched = self.backend.get_row(binding.def(), &binding.row_key(id))?;
        if let Some(row) = fetched {
            self.entries
                .insert((table, id), EntryState::Clean { row: row.clone() });
            return Ok(Some(row));
        }
        Ok(None)
    }

    /// Rows whose indexed column lies in `[left, right]`, capped at `limit`
    ///
    /// The result reflects committed index state overlaid with this
    /// Session's pending writes: pending rows inside the bounds appear,
    /// pending deletes and rows moved out of the bounds do not.
    pub fn range(
        &mut self,
        table: &str,
        index_col: &str,
        left: &Value,
        right: &Value,
        limit: usize,
        desc: bool,
    ) -> Result<Vec<Row>> {
        let binding = self.binding(table)?;
        let dtype = Self::lookup_dtype(&binding, index_col)?;
        let left = dtype.normalize(left)?;
        let right = dtype.normalize(right)?;

        let query = RangeQuery {
            lower: RangeBound::inclusive(dtype.score_bits(&left), dtype.index_text(&left)),
            upper: RangeBound::inclusive(dtype.score_bits(&right), dtype.index_text(&right)),
            // Oversample: pending deletes and moved rows may vacate slots.
            limit: limit.saturating_mul(2).max(limit.saturating_add(8)),
            desc,
        };

        let index_key = binding
            .index_key(index_col)
            .ok_or_else(|| TesseraError::internal("indexed column lost its key"))?
            .to_string();
        let committed = self.backend.range(&index_key, &query)?;

        let entry_for = |row: &Row| -> Result<tessera_core::bundle::IndexEntry> {
            if index_col == ID_COLUMN {
                Ok(binding.id_entry(row.id()))
            } else {
                let v = row.get(index_col).ok_or_else(|| {
                    TesseraError::internal("indexed column missing from row")
                })?;
                binding.index_entry(index_col, v, row.id())
            }
        };

        // Merge committed entries with this Session's pending rows.
        let mut merged: Vec<(tessera_core::bundle::IndexEntry, Row)> = Vec::new();
        let mut seen: std::collections::HashSet<RowId> = std::collections::HashSet::new();
        for entry in committed {
            seen.insert(entry.id);
            let Some(row) = self.get_by_id(&binding, entry.id)? else {
                continue; // pending delete
            };
            let live = entry_for(&row)?;
            if query.contains(&live) {
                merged.push((live, row));
            }
        }
        let pending: Vec<Row> = self
            .entries
            .iter()
            .filter(|((t, id), _)| t.as_str() == table && !seen.contains(id))
            .filter_map(|(_, e)| e.visible().cloned())
            .collect();
        for row in pending {
            let live = entry_for(&row)?;
            if query.contains(&live) {
                merged.push((live, row));
            }
        }

        merged.sort_by(|a, b| a.0.cmp(&b.0));
        if desc {
            merged.reverse();
        }
        merged.truncate(limit);
        Ok(merged.into_iter().map(|(_, row)| row).collect())
    }

    // =========================================================================
    // Writes
    // =========================================================================

    /// Allocate a fresh row with every column at its default
    pub fn new_row(&mut self, table: &str) -> Result<Row> {
        self.ensure_writable()?;
        let binding = self.binding(table)?;
        let id = self.ids.next_id()?;
        Ok(Row::with_defaults(binding.def().clone(), id))
    }

    /// Buffer an insert
    ///
    /// The row's id must be fresh for this Session; uniqueness of `unique`
    /// columns is enforced at commit against the most recent backend state.
    pub fn insert(&mut self, row: Row) -> Result<()> {
        self.ensure_writable()?;
        if row.def().namespace() != &self.namespace {
            return Err(TesseraError::logic(
                "row belongs to a different namespace than the session",
            ));
        }
        let key = (row.def().name().to_string(), row.id());
        match self.entries.remove(&key) {
            None => {
                trace!(table = %key.0, id = key.1, "buffered insert");
                self.entries.insert(key, EntryState::InsertPending { row });
                Ok(())
            }
            Some(entry) => {
                // Put the old state back on failure so the map stays coherent.
                let result = entry.clone().inserted(row);
                self.entries.insert(key, entry);
                result.map(|_| ())
            }
        }
    }

    /// Buffer an update of a row obtained via `get`/`range` in this Session
    pub fn update(&mut self, row: Row) -> Result<()> {
        self.ensure_writable()?;
        let key = (row.def().name().to_string(), row.id());
        let entry = self.entries.remove(&key).ok_or_else(|| {
            TesseraError::logic("update requires a row obtained via get/range in this session")
        })?;
        match entry.updated(row) {
            Ok(next) => {
                self.entries.insert(key, next);
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    /// Buffer a delete of a row obtained via `get`/`range` in this Session
    pub fn delete(&mut self, row: &Row) -> Result<()> {
        self.ensure_writable()?;
        let key = (row.def().name().to_string(), row.id());
        let entry = self.entries.remove(&key).ok_or_else(|| {
            TesseraError::logic("delete requires a row obtained via get/range in this session")
        })?;
        if let Some(next) = entry.deleted()? {
            self.entries.insert(key, next);
        }
        Ok(())
    }

    /// Fetch a mutable row, creating it when missing
    ///
    /// The created row has `where_col` set to `value` and every other column
    /// at its default; it is already buffered as an insert, so a subsequent
    /// `update` with modified content folds into that insert.
    pub fn update_or_insert(
        &mut self,
        table: &str,
        value: &Value,
        where_col: &str,
    ) -> Result<Row> {
        self.ensure_writable()?;
        if let Some(row) = self.get(table, value, where_col)? {
            return Ok(row);
        }
        let mut row = if where_col == ID_COLUMN {
            let binding = self.binding(table)?;
            let id = ColumnType::U64
                .normalize(value)?
                .as_caller_id()
                .ok_or_else(|| TesseraError::query("id must be unsigned"))?;
            Row::with_defaults(binding.def().clone(), id)
        } else {
            self.new_row(table)?
        };
        if where_col != ID_COLUMN {
            row.set(where_col, value.clone())?;
        }
        self.insert(row.clone())?;
        Ok(row)
    }

    // =========================================================================
    // Commit
    // =========================================================================

    /// Number of rows with pending mutations (diagnostics)
    pub fn pending_count(&self) -> usize {
        self.entries
            .values()
            .filter(|e| !matches!(e, EntryState::Clean { .. }))
            .count()
    }

    /// Atomically commit every buffered mutation
    ///
    /// Consumes the Session: after a successful commit its rows must not be
    /// reused, and the move makes that unrepresentable.
    ///
    /// # Errors
    ///
    /// - `Race` when an optimistic precondition failed; the caller discards
    ///   everything and retries from a fresh Session.
    /// - `UniqueViolation` when a unique column would admit a duplicate;
    ///   this is a logic error and is not retried.
    pub fn commit(self) -> Result<CommitReceipt> {
        let bundle = plan(&self.namespace, &self.tables, &self.entries)?;
        if bundle.is_empty() {
            return Ok(CommitReceipt { seq: 0 });
        }
        match self.backend.commit(bundle)? {
            CommitOutcome::Committed { seq } => Ok(CommitReceipt { seq }),
            CommitOutcome::Race { key } => Err(TesseraError::race(key)),
            CommitOutcome::Unique { table, column } => {
                Err(TesseraError::unique_violation(table, column))
            }
        }
    }
}
