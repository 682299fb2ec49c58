//! Single-host in-memory backend
//!
//! Rows live in a hash map keyed by their full backend key; every index is a
//! `BTreeSet` of `(score, text, id)` entries, so bounded range traversal is
//! a plain ordered range over the set. One write lock covers the whole
//! store: a commit bundle's preconditions and mutations are evaluated under
//! it, which gives the same atomicity a scripted networked store provides
//! server-side.
//!
//! Change notifications are published per table topic, strictly after the
//! mutations apply and tagged with the commit sequence. Nothing is published
//! for a bundle that fails a precondition.

use dashmap::DashMap;
use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use std::collections::BTreeSet;
use std::ops::Bound;
use std::sync::Arc;
use tessera_core::bundle::{ChangeBatch, CommitBundle, CommitOutcome, IndexEntry, Mutation, Precondition};
use tessera_core::error::Result;
use tessera_core::limits::CHANGE_TOPIC_CAPACITY;
use tessera_core::row::Row;
use tessera_core::schema::ComponentDef;
use tessera_core::traits::{Backend, RangeBound, RangeQuery};
use tokio::sync::broadcast;
use tracing::{debug, trace};

#[derive(Default)]
struct State {
    rows: FxHashMap<String, Row>,
    indexes: FxHashMap<String, BTreeSet<IndexEntry>>,
    blobs: FxHashMap<String, Vec<u8>>,
    seq: u64,
}

/// In-process backend serving one host
pub struct MemoryBackend {
    state: RwLock<State>,
    topics: DashMap<String, broadcast::Sender<ChangeBatch>>,
}

impl MemoryBackend {
    /// Create an empty backend
    pub fn new() -> Arc<Self> {
        Arc::new(MemoryBackend {
            state: RwLock::new(State::default()),
            topics: DashMap::new(),
        })
    }

    /// Current commit sequence (tests and diagnostics)
    pub fn commit_seq(&self) -> u64 {
        self.state.read().seq
    }

    /// Number of live rows under a prefix (tests and diagnostics)
    pub fn row_count(&self, row_prefix: &str) -> usize {
        self.state
            .read()
            .rows
            .keys()
            .filter(|k| k.starts_with(row_prefix))
            .count()
    }

    /// Evaluate every precondition; `Ok(None)` means all hold
    fn check_preconditions(state: &State, bundle: &CommitBundle) -> Option<CommitOutcome> {
        // Version and existence checks first: a racing write invalidates the
        // whole read snapshot, so unique probes against it are meaningless.
        for pre in &bundle.preconditions {
            match pre {
                Precondition::RowVersion { key, version } => {
                    match state.rows.get(key) {
                        Some(row) if row.version() == *version => {}
                        _ => return Some(CommitOutcome::Race { key: key.clone() }),
                    }
                }
                Precondition::RowAbsent { key } => {
                    if state.rows.contains_key(key) {
                        return Some(CommitOutcome::Race { key: key.clone() });
                    }
                }
                Precondition::RowExists { key } => {
                    if !state.rows.contains_key(key) {
                        return Some(CommitOutcome::Race { key: key.clone() });
                    }
                }
                Precondition::UniqueFree { .. } => {}
            }
        }

        for pre in &bundle.preconditions {
            if let Precondition::UniqueFree {
                index_key,
                score,
                text,
                candidate,
                table,
                column,
            } = pre
            {
                let probe = IndexEntry::new(*score, text.clone(), 0);
                let Some(set) = state.indexes.get(index_key) else {
                    continue;
                };
                let conflict = set
                    .range((
                        Bound::Included(IndexEntry::new(*score, text.clone(), 0)),
                        Bound::Included(IndexEntry::new(*score, text.clone(), u64::MAX)),
                    ))
                    .filter(|e| e.same_value(&probe) && e.id != *candidate)
                    .any(|e| {
                        // A live holder is no conflict when this same bundle
                        // removes its entry (unique-value swap).
                        !bundle
                            .deleted_index_entries(index_key)
                            .any(|removed| removed.id == e.id && removed.same_value(e))
                    });
                if conflict {
                    return Some(CommitOutcome::Unique {
                        table: table.clone(),
                        column: column.clone(),
                    });
                }
            }
        }
        None
    }
}

impl Backend for MemoryBackend {
    fn get_row(&self, _def: &Arc<ComponentDef>, key: &str) -> Result<Option<Row>> {
        Ok(self.state.read().rows.get(key).cloned())
    }

    fn range(&self, index_key: &str, query: &RangeQuery) -> Result<Vec<IndexEntry>> {
        let state = self.state.read();
        let Some(set) = state.indexes.get(index_key) else {
            return Ok(Vec::new());
        };

        let lower = match &query.lower {
            RangeBound::Unbounded => Bound::Unbounded,
            RangeBound::Point {
                score,
                text,
                inclusive: true,
            } => Bound::Included(IndexEntry::new(*score, text.clone(), 0)),
            RangeBound::Point {
                score,
                text,
                inclusive: false,
            } => Bound::Excluded(IndexEntry::new(*score, text.clone(), u64::MAX)),
        };
        let upper = match &query.upper {
            RangeBound::Unbounded => Bound::Unbounded,
            RangeBound::Point {
                score,
                text,
                inclusive: true,
            } => Bound::Included(IndexEntry::new(*score, text.clone(), u64::MAX)),
            RangeBound::Point {
                score,
                text,
                inclusive: false,
            } => Bound::Excluded(IndexEntry::new(*score, text.clone(), 0)),
        };

        // An inverted range is empty, never a panic.
        let inverted = match (&lower, &upper) {
            (
                Bound::Included(l) | Bound::Excluded(l),
                Bound::Included(u) | Bound::Excluded(u),
            ) => l > u,
            _ => false,
        };
        if inverted {
            return Ok(Vec::new());
        }

        let iter = set.range((lower, upper));
        let out: Vec<IndexEntry> = if query.desc {
            iter.rev().take(query.limit).cloned().collect()
        } else {
            iter.take(query.limit).cloned().collect()
        };
        Ok(out)
    }

    fn commit(&self, mut bundle: CommitBundle) -> Result<CommitOutcome> {
        let mut state = self.state.write();

        if let Some(outcome) = Self::check_preconditions(&state, &bundle) {
            trace!(?outcome, "commit rejected by precondition");
            return Ok(outcome);
        }

        state.seq += 1;
        let seq = state.seq;

        for mutation in bundle.mutations.drain(..) {
            match mutation {
                Mutation::PutRow { key, row } => {
                    state.rows.insert(key, row);
                }
                Mutation::DelRow { key } => {
                    state.rows.remove(&key);
                }
                Mutation::IndexAdd { index_key, entry } => {
                    state.indexes.entry(index_key).or_default().insert(entry);
                }
                Mutation::IndexRemove { index_key, entry } => {
                    if let Some(set) = state.indexes.get_mut(&index_key) {
                        set.remove(&entry);
                    }
                }
            }
        }
        drop(state);

        // Publish only after the mutations are visible; subscribers re-read
        // through the same lock and therefore observe the committed state.
        for mut batch in bundle.notifications.drain(..) {
            batch.seq = seq;
            if let Some(sender) = self.topics.get(&batch.topic) {
                // No receivers is normal when nothing subscribes to the table.
                let _ = sender.send(batch);
            }
        }

        Ok(CommitOutcome::Committed { seq })
    }

    fn subscribe(&self, topic: &str) -> broadcast::Receiver<ChangeBatch> {
        self.topics
            .entry(topic.to_string())
            .or_insert_with(|| broadcast::channel(CHANGE_TOPIC_CAPACITY).0)
            .subscribe()
    }

    fn unsubscribe(&self, topic: &str) {
        let drained = self
            .topics
            .get(topic)
            .map(|sender| sender.receiver_count() == 0)
            .unwrap_or(false);
        if drained {
            self.topics.remove(topic);
            debug!(topic, "released change topic");
        }
    }

    fn scan_rows(&self, row_prefix: &str) -> Result<Vec<Row>> {
        let state = self.state.read();
        let mut keyed: Vec<(&String, &Row)> = state
            .rows
            .iter()
            .filter(|(k, _)| k.starts_with(row_prefix))
            .collect();
        keyed.sort_by(|a, b| a.0.cmp(b.0));
        Ok(keyed.into_iter().map(|(_, r)| r.clone()).collect())
    }

    fn read_blob(&self, key: &str) -> Result<Option<Vec<u8>>> {
        Ok(self.state.read().blobs.get(key).cloned())
    }

    fn write_blob(&self, key: &str, bytes: Vec<u8>) -> Result<()> {
        self.state.write().blobs.insert(key.to_string(), bytes);
        Ok(())
    }

    fn clear_table(&self, row_prefix: &str, index_keys: &[String]) -> Result<()> {
        let mut state = self.state.write();
        state.rows.retain(|k, _| !k.starts_with(row_prefix));
        for key in index_keys {
            state.indexes.remove(key);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tessera_core::bundle::RowChange;
    use tessera_core::schema::{ColumnDef, ComponentDef};
    use tessera_core::types::{Namespace, Permission, Persistence};
    use tessera_core::value::{ColumnType, Value};

    fn hp() -> Arc<ComponentDef> {
        Arc::new(
            ComponentDef::new(
                Namespace::new("game").unwrap(),
                "HP",
                vec![
                    ColumnDef::new("owner", ColumnType::I64).unique(),
                    ColumnDef::new("value", ColumnType::I32),
                ],
                Permission::Everybody,
                Persistence::Persistent,
                "main",
            )
            .unwrap(),
        )
    }

    fn put_bundle(key: &str, row: Row) -> CommitBundle {
        CommitBundle {
            preconditions: vec![Precondition::RowAbsent { key: key.into() }],
            mutations: vec![Mutation::PutRow {
                key: key.into(),
                row,
            }],
            notifications: vec![],
        }
    }

    #[test]
    fn test_put_get_round_trip() {
        let backend = MemoryBackend::new();
        let def = hp();
        let mut row = Row::with_defaults(def.clone(), 1);
        row.set("owner", Value::Int(7)).unwrap();
        row.set_version(1);

        let outcome = backend.commit(put_bundle("k1", row)).unwrap();
        assert!(matches!(outcome, CommitOutcome::Committed { seq: 1 }));

        let got = backend.get_row(&def, "k1").unwrap().unwrap();
        assert_eq!(got.get("owner"), Some(&Value::Int(7)));
        assert!(backend.get_row(&def, "k2").unwrap().is_none());
    }

    #[test]
    fn test_version_precondition_races() {
        let backend = MemoryBackend::new();
        let def = hp();
        let mut row = Row::with_defaults(def.clone(), 1);
        row.set_version(1);
        backend.commit(put_bundle("k1", row.clone())).unwrap();

        // Observed version 5 but stored version is 1
        let bundle = CommitBundle {
            preconditions: vec![Precondition::RowVersion {
                key: "k1".into(),
                version: 5,
            }],
            mutations: vec![Mutation::DelRow { key: "k1".into() }],
            notifications: vec![],
        };
        let outcome = backend.commit(bundle).unwrap();
        assert_eq!(
            outcome,
            CommitOutcome::Race {
                key: "k1".to_string()
            }
        );
        // Nothing applied
        assert!(backend.get_row(&def, "k1").unwrap().is_some());
    }

    #[test]
    fn test_failed_precondition_applies_nothing_and_notifies_nobody() {
        let backend = MemoryBackend::new();
        let def = hp();
        let mut rx = backend.subscribe("game:HP:changes");

        let mut row = Row::with_defaults(def, 1);
        row.set_version(1);
        let bundle = CommitBundle {
            preconditions: vec![Precondition::RowExists {
                key: "missing".into(),
            }],
            mutations: vec![Mutation::PutRow {
                key: "k1".into(),
                row,
            }],
            notifications: vec![ChangeBatch {
                seq: 0,
                topic: "game:HP:changes".into(),
                changes: vec![RowChange {
                    id: 1,
                    kind: tessera_core::bundle::ChangeKind::Insert,
                    changed_columns: Default::default(),
                }],
            }],
        };
        let outcome = backend.commit(bundle).unwrap();
        assert!(matches!(outcome, CommitOutcome::Race { .. }));
        assert_eq!(backend.commit_seq(), 0);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_notifications_carry_commit_seq() {
        let backend = MemoryBackend::new();
        let def = hp();
        let mut rx = backend.subscribe("game:HP:changes");

        let mut row = Row::with_defaults(def, 1);
        row.set_version(1);
        let bundle = CommitBundle {
            preconditions: vec![],
            mutations: vec![Mutation::PutRow {
                key: "k1".into(),
                row,
            }],
            notifications: vec![ChangeBatch {
                seq: 0,
                topic: "game:HP:changes".into(),
                changes: vec![RowChange {
                    id: 1,
                    kind: tessera_core::bundle::ChangeKind::Insert,
                    changed_columns: Default::default(),
                }],
            }],
        };
        backend.commit(bundle).unwrap();
        let batch = rx.try_recv().unwrap();
        assert_eq!(batch.seq, 1);
        assert_eq!(batch.changes.len(), 1);
    }

    #[test]
    fn test_unique_probe_detects_live_holder() {
        let backend = MemoryBackend::new();
        let bundle = CommitBundle {
            preconditions: vec![],
            mutations: vec![Mutation::IndexAdd {
                index_key: "idx".into(),
                entry: IndexEntry::new(7, "", 1),
            }],
            notifications: vec![],
        };
        backend.commit(bundle).unwrap();

        // Row 2 wants the same value 7
        let bundle = CommitBundle {
            preconditions: vec![Precondition::UniqueFree {
                index_key: "idx".into(),
                score: 7,
                text: String::new(),
                candidate: 2,
                table: "HP".into(),
                column: "owner".into(),
            }],
            mutations: vec![Mutation::IndexAdd {
                index_key: "idx".into(),
                entry: IndexEntry::new(7, "", 2),
            }],
            notifications: vec![],
        };
        let outcome = backend.commit(bundle).unwrap();
        assert_eq!(
            outcome,
            CommitOutcome::Unique {
                table: "HP".to_string(),
                column: "owner".to_string()
            }
        );
    }

    #[test]
    fn test_unique_probe_allows_same_bundle_swap() {
        let backend = MemoryBackend::new();
        backend
            .commit(CommitBundle {
                preconditions: vec![],
                mutations: vec![
                    Mutation::IndexAdd {
                        index_key: "idx".into(),
                        entry: IndexEntry::new(7, "", 1),
                    },
                    Mutation::IndexAdd {
                        index_key: "idx".into(),
                        entry: IndexEntry::new(8, "", 2),
                    },
                ],
                notifications: vec![],
            })
            .unwrap();

        // Swap: row 1 takes 8, row 2 takes 7; old entries removed in-bundle
        let bundle = CommitBundle {
            preconditions: vec![
                Precondition::UniqueFree {
                    index_key: "idx".into(),
                    score: 8,
                    text: String::new(),
                    candidate: 1,
                    table: "HP".into(),
                    column: "owner".into(),
                },
                Precondition::UniqueFree {
                    index_key: "idx".into(),
                    score: 7,
                    text: String::new(),
                    candidate: 2,
                    table: "HP".into(),
                    column: "owner".into(),
                },
            ],
            mutations: vec![
                Mutation::IndexRemove {
                    index_key: "idx".into(),
                    entry: IndexEntry::new(7, "", 1),
                },
                Mutation::IndexRemove {
                    index_key: "idx".into(),
                    entry: IndexEntry::new(8, "", 2),
                },
                Mutation::IndexAdd {
                    index_key: "idx".into(),
                    entry: IndexEntry::new(8, "", 1),
                },
                Mutation::IndexAdd {
                    index_key: "idx".into(),
                    entry: IndexEntry::new(7, "", 2),
                },
            ],
            notifications: vec![],
        };
        let outcome = backend.commit(bundle).unwrap();
        assert!(matches!(outcome, CommitOutcome::Committed { .. }));
    }

    #[test]
    fn test_range_ordering_and_limit() {
        let backend = MemoryBackend::new();
        let mutations = (0..10u64)
            .map(|i| Mutation::IndexAdd {
                index_key: "idx".into(),
                entry: IndexEntry::new(i, "", 100 + i),
            })
            .collect();
        backend
            .commit(CommitBundle {
                preconditions: vec![],
                mutations,
                notifications: vec![],
            })
            .unwrap();

        let q = RangeQuery {
            lower: RangeBound::inclusive(2, ""),
            upper: RangeBound::inclusive(7, ""),
            limit: 3,
            desc: false,
        };
        let asc = backend.range("idx", &q).unwrap();
        assert_eq!(asc.iter().map(|e| e.score).collect::<Vec<_>>(), vec![2, 3, 4]);

        let q = RangeQuery { desc: true, ..q };
        let desc = backend.range("idx", &q).unwrap();
        assert_eq!(
            desc.iter().map(|e| e.score).collect::<Vec<_>>(),
            vec![7, 6, 5]
        );
    }

    #[test]
    fn test_range_exclusive_bounds_skip_all_ids_at_value() {
        let backend = MemoryBackend::new();
        backend
            .commit(CommitBundle {
                preconditions: vec![],
                mutations: vec![
                    Mutation::IndexAdd {
                        index_key: "idx".into(),
                        entry: IndexEntry::new(5, "", 1),
                    },
                    Mutation::IndexAdd {
                        index_key: "idx".into(),
                        entry: IndexEntry::new(5, "", 2),
                    },
                    Mutation::IndexAdd {
                        index_key: "idx".into(),
                        entry: IndexEntry::new(6, "", 3),
                    },
                ],
                notifications: vec![],
            })
            .unwrap();

        let q = RangeQuery {
            lower: RangeBound::Point {
                score: 5,
                text: String::new(),
                inclusive: false,
            },
            upper: RangeBound::Unbounded,
            limit: 10,
            desc: false,
        };
        let got = backend.range("idx", &q).unwrap();
        assert_eq!(got.len(), 1);
        assert_eq!(got[0].id, 3);
    }

    #[test]
    fn test_clear_table_wipes_rows_and_indexes() {
        let backend = MemoryBackend::new();
        let def = hp();
        let mut row = Row::with_defaults(def.clone(), 1);
        row.set_version(1);
        backend
            .commit(CommitBundle {
                preconditions: vec![],
                mutations: vec![
                    Mutation::PutRow {
                        key: "game:HP:{CLU 0}:id:1".into(),
                        row,
                    },
                    Mutation::IndexAdd {
                        index_key: "game:HP:{CLU 0}:index:owner".into(),
                        entry: IndexEntry::new(1, "", 1),
                    },
                ],
                notifications: vec![],
            })
            .unwrap();

        backend
            .clear_table(
                "game:HP:{CLU 0}:id:",
                &["game:HP:{CLU 0}:index:owner".to_string()],
            )
            .unwrap();
        assert!(backend.get_row(&def, "game:HP:{CLU 0}:id:1").unwrap().is_none());
        assert!(backend
            .range("game:HP:{CLU 0}:index:owner", &RangeQuery {
                lower: RangeBound::Unbounded,
                upper: RangeBound::Unbounded,
                limit: 10,
                desc: false,
            })
            .unwrap()
            .is_empty());
    }
}
