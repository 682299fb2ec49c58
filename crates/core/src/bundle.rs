//! Commit bundles: the neutral payload a Session hands to a backend
//!
//! A bundle pairs preconditions (version checks, existence checks, unique
//! probes) with mutations (row writes, row deletes, index insertions and
//! removals). The backend evaluates all preconditions and applies all
//! mutations atomically: backends with native transactional blocks run the
//! bundle server-side, the in-process backend runs it under one write lock.
//!
//! The bundle also carries the per-table change notices that become
//! subscription-plane notifications once the commit applies, and never
//! before.

use crate::row::Row;
use crate::types::RowId;
use smallvec::SmallVec;
use std::cmp::Ordering;

/// One entry of an ordered index set
///
/// Entries order by `(score, text, id)`: numeric columns order by score with
/// an empty text, string columns by text under score 0, and the row id is a
/// stable tiebreak in both regimes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexEntry {
    /// Order-preserving score bits (see `ColumnType::score_bits`)
    pub score: u64,
    /// Value text for string columns, empty for numeric columns
    pub text: String,
    /// Row the entry references
    pub id: RowId,
}

impl IndexEntry {
    /// Build an entry
    pub fn new(score: u64, text: impl Into<String>, id: RowId) -> Self {
        IndexEntry {
            score,
            text: text.into(),
            id,
        }
    }

    /// Whether two entries reference the same column value
    pub fn same_value(&self, other: &IndexEntry) -> bool {
        self.score == other.score && self.text == other.text
    }
}

impl Ord for IndexEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        self.score
            .cmp(&other.score)
            .then_with(|| self.text.cmp(&other.text))
            .then_with(|| self.id.cmp(&other.id))
    }
}

impl PartialOrd for IndexEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Atomic check evaluated before any mutation applies
#[derive(Debug, Clone)]
pub enum Precondition {
    /// Row must exist with exactly this version (read-then-write check)
    RowVersion {
        /// Row key
        key: String,
        /// Version observed by the Session
        version: u64,
    },
    /// Row must not exist (insert check)
    RowAbsent {
        /// Row key
        key: String,
    },
    /// Row must exist (update/delete check)
    RowExists {
        /// Row key
        key: String,
    },
    /// No live index entry may hold this value, except entries removed by
    /// this same bundle (permits unique-value swaps within one transaction)
    UniqueFree {
        /// Index set to probe
        index_key: String,
        /// Score of the candidate value
        score: u64,
        /// Text of the candidate value
        text: String,
        /// Row that is about to hold the value (its own entry is not a conflict)
        candidate: RowId,
        /// Component name, for the structured violation report
        table: String,
        /// Column name, for the structured violation report
        column: String,
    },
}

/// State change applied once all preconditions hold
#[derive(Debug, Clone)]
pub enum Mutation {
    /// Write a row (insert or update); `row.version()` is the post-commit version
    PutRow {
        /// Row key
        key: String,
        /// Row content to store
        row: Row,
    },
    /// Remove a row
    DelRow {
        /// Row key
        key: String,
    },
    /// Insert an index entry
    IndexAdd {
        /// Index set key
        index_key: String,
        /// Entry to insert
        entry: IndexEntry,
    },
    /// Remove an index entry
    IndexRemove {
        /// Index set key
        index_key: String,
        /// Entry to remove
        entry: IndexEntry,
    },
}

/// Kind of a committed row change, as seen by the subscription plane
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    /// Row came into existence
    Insert,
    /// Row content changed
    Update,
    /// Row was removed
    Delete,
}

/// One row's change inside a committed transaction
#[derive(Debug, Clone)]
pub struct RowChange {
    /// Row that changed
    pub id: RowId,
    /// What happened to it
    pub kind: ChangeKind,
    /// Columns whose values changed (empty for inserts and deletes, which
    /// affect every subscription on the table regardless of column)
    pub changed_columns: SmallVec<[String; 4]>,
}

/// Committed changes of one table, published on its change topic
#[derive(Debug, Clone)]
pub struct ChangeBatch {
    /// Backend commit sequence; the subscription ordering key
    pub seq: u64,
    /// Notification topic (see `key::change_topic`)
    pub topic: String,
    /// Per-row changes in this commit
    pub changes: Vec<RowChange>,
}

/// Everything one Session commit asks of the backend
#[derive(Debug, Clone, Default)]
pub struct CommitBundle {
    /// Checks evaluated atomically before the mutations
    pub preconditions: Vec<Precondition>,
    /// Mutations applied atomically after the checks pass
    pub mutations: Vec<Mutation>,
    /// Change notices published after the mutations apply (seq filled by the
    /// backend at commit time)
    pub notifications: Vec<ChangeBatch>,
}

impl CommitBundle {
    /// Whether the bundle performs no state change
    pub fn is_empty(&self) -> bool {
        self.mutations.is_empty()
    }

    /// Row keys this bundle deletes; used by the unique probe's swap rule
    pub fn deleted_index_entries<'a>(
        &'a self,
        index_key: &'a str,
    ) -> impl Iterator<Item = &'a IndexEntry> {
        self.mutations.iter().filter_map(move |m| match m {
            Mutation::IndexRemove {
                index_key: k,
                entry,
            } if k == index_key => Some(entry),
            _ => None,
        })
    }
}

/// Structured result of a commit attempt
///
/// Transport and fatal failures travel as errors; these are the expected
/// domain outcomes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommitOutcome {
    /// All preconditions held; every mutation applied
    Committed {
        /// Backend commit sequence assigned to this transaction
        seq: u64,
    },
    /// A version/existence precondition failed; the caller should retry
    Race {
        /// Key whose precondition failed
        key: String,
    },
    /// A unique probe found a conflicting live value; not retriable
    Unique {
        /// Component name
        table: String,
        /// Violating column
        column: String,
    },
}
