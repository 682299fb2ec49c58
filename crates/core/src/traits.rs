//! Backend and ID-source abstractions
//!
//! The `Backend` trait captures the capability set the core needs from a
//! key-value + ordered-index store: point reads, bounded range queries,
//! atomic multi-op commits with precondition checks, and per-topic change
//! notifications. Implementations live in `tessera-backend`; the trait sits
//! here so the Session and broker layers depend only on the contract.

use crate::bundle::{ChangeBatch, CommitBundle, CommitOutcome, IndexEntry};
use crate::error::Result;
use crate::row::Row;
use crate::schema::ComponentDef;
use crate::types::RowId;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast;

/// One end of a range query over an index set
#[derive(Debug, Clone)]
pub enum RangeBound {
    /// No bound on this end
    Unbounded,
    /// Bound at an index point
    Point {
        /// Score of the boundary value
        score: u64,
        /// Text of the boundary value (empty for numeric columns)
        text: String,
        /// Whether the boundary value itself is included
        inclusive: bool,
    },
}

impl RangeBound {
    /// Inclusive bound at a point
    pub fn inclusive(score: u64, text: impl Into<String>) -> Self {
        RangeBound::Point {
            score,
            text: text.into(),
            inclusive: true,
        }
    }

    /// Whether an entry lies on or above this bound (as a lower end)
    pub fn admits_from_below(&self, entry: &IndexEntry) -> bool {
        match self {
            RangeBound::Unbounded => true,
            RangeBound::Point {
                score,
                text,
                inclusive,
            } => match (entry.score, &entry.text).cmp(&(*score, text)) {
                std::cmp::Ordering::Greater => true,
                std::cmp::Ordering::Equal => *inclusive,
                std::cmp::Ordering::Less => false,
            },
        }
    }

    /// Whether an entry lies on or below this bound (as an upper end)
    pub fn admits_from_above(&self, entry: &IndexEntry) -> bool {
        match self {
            RangeBound::Unbounded => true,
            RangeBound::Point {
                score,
                text,
                inclusive,
            } => match (entry.score, &entry.text).cmp(&(*score, text)) {
                std::cmp::Ordering::Less => true,
                std::cmp::Ordering::Equal => *inclusive,
                std::cmp::Ordering::Greater => false,
            },
        }
    }
}

/// Bounded, ordered query over one index set
#[derive(Debug, Clone)]
pub struct RangeQuery {
    /// Lower end
    pub lower: RangeBound,
    /// Upper end
    pub upper: RangeBound,
    /// Maximum number of entries returned
    pub limit: usize,
    /// Traverse from the upper end downward
    pub desc: bool,
}

impl RangeQuery {
    /// Query for every entry holding exactly one value
    pub fn exact(score: u64, text: impl Into<String> + Clone, limit: usize) -> Self {
        RangeQuery {
            lower: RangeBound::inclusive(score, text.clone()),
            upper: RangeBound::inclusive(score, text),
            limit,
            desc: false,
        }
    }

    /// Whether an entry falls inside both bounds
    pub fn contains(&self, entry: &IndexEntry) -> bool {
        self.lower.admits_from_below(entry) && self.upper.admits_from_above(entry)
    }
}

/// Capability set of a key-value + ordered-index store
///
/// All methods are synchronous from the caller's perspective; a networked
/// implementation owns its own I/O and blocks the calling task only at these
/// defined suspension points.
pub trait Backend: Send + Sync {
    /// Point-read a row. The definition drives decoding; read steering (to a
    /// replica) is an implementation concern.
    fn get_row(&self, def: &Arc<ComponentDef>, key: &str) -> Result<Option<Row>>;

    /// Bounded ordered traversal of one index set
    fn range(&self, index_key: &str, query: &RangeQuery) -> Result<Vec<IndexEntry>>;

    /// Atomically evaluate preconditions and apply mutations
    ///
    /// Returns the structured outcome; transport failures are errors.
    fn commit(&self, bundle: CommitBundle) -> Result<CommitOutcome>;

    /// Subscribe to a change topic
    fn subscribe(&self, topic: &str) -> broadcast::Receiver<ChangeBatch>;

    /// Release interest in a change topic once no subscriber remains
    fn unsubscribe(&self, topic: &str);

    /// Every stored row under a table's row-key prefix, in key order
    ///
    /// Used by schema migration to backfill new columns and indices; not a
    /// query-plane operation.
    fn scan_rows(&self, row_prefix: &str) -> Result<Vec<Row>>;

    /// Read an uninterpreted blob (schema descriptors)
    fn read_blob(&self, key: &str) -> Result<Option<Vec<u8>>>;

    /// Write an uninterpreted blob
    fn write_blob(&self, key: &str, bytes: Vec<u8>) -> Result<()>;

    /// Drop every row and index entry of one table (ephemeral wipe)
    fn clear_table(&self, row_prefix: &str, index_keys: &[String]) -> Result<()>;
}

/// Source of fresh row ids
///
/// Production deployments plug the external distributed ID service in here;
/// a process-local atomic source ships for single-host use and tests.
pub trait IdAllocator: Send + Sync {
    /// Allocate the next id
    fn next_id(&self) -> Result<RowId>;
}

/// Process-local monotonically increasing id source
#[derive(Debug)]
pub struct AtomicIds(AtomicU64);

impl AtomicIds {
    /// Start allocating from `first`
    pub fn starting_at(first: RowId) -> Self {
        AtomicIds(AtomicU64::new(first))
    }
}

impl Default for AtomicIds {
    fn default() -> Self {
        Self::starting_at(1)
    }
}

impl IdAllocator for AtomicIds {
    fn next_id(&self) -> Result<RowId> {
        Ok(self.0.fetch_add(1, Ordering::Relaxed))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_atomic_ids_are_dense_and_unique() {
        let ids = AtomicIds::default();
        assert_eq!(ids.next_id().unwrap(), 1);
        assert_eq!(ids.next_id().unwrap(), 2);
        let ids = AtomicIds::starting_at(100);
        assert_eq!(ids.next_id().unwrap(), 100);
    }

    #[test]
    fn test_range_bound_admission() {
        let entry = IndexEntry::new(10, "", 1);
        assert!(RangeBound::Unbounded.admits_from_below(&entry));
        assert!(RangeBound::inclusive(10, "").admits_from_below(&entry));
        assert!(RangeBound::inclusive(10, "").admits_from_above(&entry));
        let exclusive = RangeBound::Point {
            score: 10,
            text: String::new(),
            inclusive: false,
        };
        assert!(!exclusive.admits_from_below(&entry));
        assert!(RangeBound::inclusive(9, "").admits_from_below(&entry));
        assert!(!RangeBound::inclusive(9, "").admits_from_above(&entry));
    }

    #[test]
    fn test_exact_query_contains_only_value() {
        let q = RangeQuery::exact(5, "", 10);
        assert!(q.contains(&IndexEntry::new(5, "", 1)));
        assert!(q.contains(&IndexEntry::new(5, "", 999)));
        assert!(!q.contains(&IndexEntry::new(6, "", 1)));
        assert!(!q.contains(&IndexEntry::new(4, "", 1)));
    }

    #[test]
    fn test_text_bounds_order_value_major() {
        let q = RangeQuery {
            lower: RangeBound::inclusive(0, "b"),
            upper: RangeBound::inclusive(0, "d"),
            limit: 10,
            desc: false,
        };
        assert!(!q.contains(&IndexEntry::new(0, "a", 1)));
        assert!(q.contains(&IndexEntry::new(0, "b", 1)));
        assert!(q.contains(&IndexEntry::new(0, "c", 1)));
        assert!(!q.contains(&IndexEntry::new(0, "e", 1)));
    }
}
