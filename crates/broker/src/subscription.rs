//! Subscription state
//!
//! Each handle remembers the membership it last reported. Mutation
//! notifications re-evaluate the query and diff against that membership;
//! the diff is what travels to the client, so a quiescent subscription
//! always converges on the backend's truth regardless of which intermediate
//! states were observed.

use std::collections::BTreeMap;
use tessera_core::bundle::{ChangeBatch, ChangeKind};
use tessera_core::row::Row;
use tessera_core::types::{CallerId, Namespace, RowId};
use tessera_core::value::Value;

/// Worker-local identifier of a client connection
pub type ConnectionId = u64;

/// Query shape of a subscription
#[derive(Debug, Clone)]
pub enum SubscriptionQuery {
    /// The single row whose indexed `column` equals `value`
    Row {
        /// Indexed lookup column
        column: String,
        /// Pinned value
        value: Value,
    },
    /// Rows whose indexed `column` lies in `[left, right]`
    Range {
        /// Indexed range column
        column: String,
        /// Inclusive lower bound
        left: Value,
        /// Inclusive upper bound
        right: Value,
        /// Cap on reported rows
        limit: usize,
        /// Traverse descending
        desc: bool,
    },
}

impl SubscriptionQuery {
    /// Column the query is keyed on
    pub fn column(&self) -> &str {
        match self {
            SubscriptionQuery::Row { column, .. } => column,
            SubscriptionQuery::Range { column, .. } => column,
        }
    }

    /// Whether this is a single-row subscription (budget accounting)
    pub fn is_row(&self) -> bool {
        matches!(self, SubscriptionQuery::Row { .. })
    }
}

/// One active subscription handle
#[derive(Debug)]
pub struct Subscription {
    /// Canonical fingerprint, also the wire `subId`
    pub fingerprint: String,
    /// Namespace of the watched component
    pub namespace: Namespace,
    /// Watched component
    pub table: String,
    /// Query shape
    pub query: SubscriptionQuery,
    /// OWNER-permission filter: only rows owned by this caller are visible
    pub owner_filter: Option<CallerId>,
    /// Membership as last reported to the client
    pub last: BTreeMap<RowId, Row>,
    /// Commit sequence of the last processed notification
    pub last_seq: u64,
}

impl Subscription {
    /// Whether a committed batch may change this subscription's report
    ///
    /// Inserts and deletes always may (membership can change). Updates may
    /// when they touch the query column, or when the row is currently a
    /// member (its visible content changed).
    pub fn affected_by(&self, batch: &ChangeBatch) -> bool {
        batch.changes.iter().any(|change| match change.kind {
            ChangeKind::Insert | ChangeKind::Delete => true,
            ChangeKind::Update => {
                change
                    .changed_columns
                    .iter()
                    .any(|c| c == self.query.column())
                    || self.last.contains_key(&change.id)
            }
        })
    }

    /// Per-row deltas between the last report and the current truth
    ///
    /// `None` rows left the subscription (out of range, deleted, or no
    /// longer visible); `Some` rows are new or changed content.
    pub fn diff(&self, now: &BTreeMap<RowId, Row>) -> Vec<(RowId, Option<Row>)> {
        let mut out = Vec::new();
        for id in self.last.keys() {
            if !now.contains_key(id) {
                out.push((*id, None));
            }
        }
        for (id, row) in now {
            match self.last.get(id) {
                Some(prev) if prev.same_content(row) => {}
                _ => out.push((*id, Some(row.clone()))),
            }
        }
        out
    }
}

/// Build a membership map from an ordered snapshot
pub fn membership(rows: &[Row]) -> BTreeMap<RowId, Row> {
    rows.iter().map(|r| (r.id(), r.clone())).collect()
}
