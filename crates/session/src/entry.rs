//! Identity-map entry states
//!
//! Every row a Session has touched is tracked by exactly one entry. The
//! entry is a sum type over the row's pending fate; the commit planner
//! pattern-matches on it to emit bundle operations.
//!
//! State transitions for a second operation on the same row:
//!
//! | first op | second op | result |
//! |----------|-----------|--------|
//! | get      | update    | update |
//! | get      | delete    | delete |
//! | insert   | update    | single insert with latest values |
//! | insert   | delete    | entry erased (no-op) |
//! | update   | update    | single update with latest values |
//! | update   | delete    | delete |
//! | delete   | insert    | `LogicError` (resurrection not permitted) |

use tessera_core::error::{Result, TesseraError};
use tessera_core::row::Row;

/// Pending fate of one row inside a Session
#[derive(Debug, Clone)]
pub enum EntryState {
    /// Read in this Session, not (yet) written
    Clean {
        /// Row as observed, version included
        row: Row,
    },
    /// Created in this Session; does not exist on the backend
    InsertPending {
        /// Row content to insert
        row: Row,
    },
    /// Read and then modified; the pre-image pins the observed version and
    /// the old index values
    UpdatePending {
        /// Row as observed at first read
        pre: Row,
        /// Latest written content
        row: Row,
    },
    /// Read and then deleted
    DeletePending {
        /// Row as observed at first read
        pre: Row,
    },
}

impl EntryState {
    /// Row content visible to subsequent reads in the same Session
    pub fn visible(&self) -> Option<&Row> {
        match self {
            EntryState::Clean { row }
            | EntryState::InsertPending { row }
            | EntryState::UpdatePending { row, .. } => Some(row),
            EntryState::DeletePending { .. } => None,
        }
    }

    /// Apply an `update` with the given content
    pub fn updated(self, row: Row) -> Result<EntryState> {
        match self {
            EntryState::Clean { row: pre } => Ok(EntryState::UpdatePending { pre, row }),
            EntryState::InsertPending { .. } => Ok(EntryState::InsertPending { row }),
            EntryState::UpdatePending { pre, .. } => Ok(EntryState::UpdatePending { pre, row }),
            EntryState::DeletePending { .. } => Err(TesseraError::logic(
                "cannot update a row already deleted in this session",
            )),
        }
    }

    /// Apply a `delete`; `None` erases the entry (insert followed by delete)
    pub fn deleted(self) -> Result<Option<EntryState>> {
        match self {
            EntryState::Clean { row } => Ok(Some(EntryState::DeletePending { pre: row })),
            EntryState::InsertPending { .. } => Ok(None),
            EntryState::UpdatePending { pre, .. } => Ok(Some(EntryState::DeletePending { pre })),
            EntryState::DeletePending { pre } => Ok(Some(EntryState::DeletePending { pre })),
        }
    }

    /// Apply an `insert` on a row that already has an entry
    pub fn inserted(self, _row: Row) -> Result<EntryState> {
        match self {
            EntryState::DeletePending { .. } => Err(TesseraError::logic(
                "resurrection not permitted: row was deleted in this session",
            )),
            _ => Err(TesseraError::logic(
                "duplicate insert: row already tracked in this session",
            )),
        }
    }
}
