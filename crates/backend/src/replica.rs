//! Master/replica read fan-out
//!
//! Writes always go to the master. Reads are steered to a replica by
//! weighted random choice; a deployment with no replicas reads from the
//! master. Read-your-writes inside a Session is guaranteed by the Session's
//! identity map, not by this wrapper, so replica lag is acceptable on the
//! query plane.
//!
//! Change subscriptions and schema descriptors always come from the master:
//! commit ordering is defined there.

use rand::Rng;
use std::sync::Arc;
use tessera_core::bundle::{ChangeBatch, CommitBundle, CommitOutcome, IndexEntry};
use tessera_core::error::Result;
use tessera_core::row::Row;
use tessera_core::schema::ComponentDef;
use tessera_core::traits::{Backend, RangeQuery};
use tokio::sync::broadcast;

/// A backend with optional weighted read replicas
pub struct ReplicaSet {
    master: Arc<dyn Backend>,
    replicas: Vec<(Arc<dyn Backend>, u32)>,
    total_weight: u32,
}

impl ReplicaSet {
    /// Wrap a master with zero or more `(replica, weight)` pairs
    ///
    /// Zero-weight replicas are never read.
    pub fn new(master: Arc<dyn Backend>, replicas: Vec<(Arc<dyn Backend>, u32)>) -> Arc<Self> {
        let replicas: Vec<_> = replicas.into_iter().filter(|(_, w)| *w > 0).collect();
        let total_weight = replicas.iter().map(|(_, w)| w).sum();
        Arc::new(ReplicaSet {
            master,
            replicas,
            total_weight,
        })
    }

    /// Pick the backend serving the next read
    fn read_target(&self) -> &Arc<dyn Backend> {
        if self.total_weight == 0 {
            return &self.master;
        }
        let mut roll = rand::thread_rng().gen_range(0..self.total_weight);
        for (replica, weight) in &self.replicas {
            if roll < *weight {
                return replica;
            }
            roll -= weight;
        }
        &self.master
    }
}

impl Backend for ReplicaSet {
    fn get_row(&self, def: &Arc<ComponentDef>, key: &str) -> Result<Option<Row>> {
        self.read_target().get_row(def, key)
    }

    fn range(&self, index_key: &str, query: &RangeQuery) -> Result<Vec<IndexEntry>> {
        self.read_target().range(index_key, query)
    }

    fn commit(&self, bundle: CommitBundle) -> Result<CommitOutcome> {
        self.master.commit(bundle)
    }

    fn subscribe(&self, topic: &str) -> broadcast::Receiver<ChangeBatch> {
        self.master.subscribe(topic)
    }

    fn unsubscribe(&self, topic: &str) {
        self.master.unsubscribe(topic)
    }

    fn scan_rows(&self, row_prefix: &str) -> Result<Vec<Row>> {
        self.master.scan_rows(row_prefix)
    }

    fn read_blob(&self, key: &str) -> Result<Option<Vec<u8>>> {
        self.master.read_blob(key)
    }

    fn write_blob(&self, key: &str, bytes: Vec<u8>) -> Result<()> {
        self.master.write_blob(key, bytes)
    }

    fn clear_table(&self, row_prefix: &str, index_keys: &[String]) -> Result<()> {
        self.master.clear_table(row_prefix, index_keys)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryBackend;
    use tessera_core::bundle::Mutation;
    use tessera_core::schema::ColumnDef;
    use tessera_core::types::{Namespace, Permission, Persistence};
    use tessera_core::value::ColumnType;

    fn def() -> Arc<ComponentDef> {
        Arc::new(
            ComponentDef::new(
                Namespace::new("game").unwrap(),
                "HP",
                vec![ColumnDef::new("value", ColumnType::I32)],
                Permission::Everybody,
                Persistence::Persistent,
                "main",
            )
            .unwrap(),
        )
    }

    fn put(backend: &Arc<dyn Backend>, key: &str, id: u64) {
        let mut row = Row::with_defaults(def(), id);
        row.set_version(1);
        backend
            .commit(CommitBundle {
                preconditions: vec![],
                mutations: vec![Mutation::PutRow {
                    key: key.into(),
                    row,
                }],
                notifications: vec![],
            })
            .unwrap();
    }

    #[test]
    fn test_no_replicas_reads_master() {
        let master: Arc<dyn Backend> = MemoryBackend::new();
        put(&master, "k", 1);
        let set = ReplicaSet::new(master, vec![]);
        assert!(set.get_row(&def(), "k").unwrap().is_some());
    }

    #[test]
    fn test_writes_land_on_master_only() {
        let master: Arc<dyn Backend> = MemoryBackend::new();
        let replica = MemoryBackend::new();
        let set = ReplicaSet::new(master.clone(), vec![(replica.clone(), 1)]);

        let mut row = Row::with_defaults(def(), 1);
        row.set_version(1);
        set.commit(CommitBundle {
            preconditions: vec![],
            mutations: vec![Mutation::PutRow {
                key: "k".into(),
                row,
            }],
            notifications: vec![],
        })
        .unwrap();

        assert!(master.get_row(&def(), "k").unwrap().is_some());
        // The replica never saw the write (replication is the store's job)
        assert!(replica.get_row(&def(), "k").unwrap().is_none());
    }

    #[test]
    fn test_weighted_reads_hit_replicas() {
        let master: Arc<dyn Backend> = MemoryBackend::new();
        let replica: Arc<dyn Backend> = MemoryBackend::new();
        // Replica holds the row, master does not: every steered read that
        // finds the row proves replica routing.
        put(&replica, "k", 1);
        let set = ReplicaSet::new(master, vec![(replica, 1)]);
        for _ in 0..8 {
            assert!(set.get_row(&def(), "k").unwrap().is_some());
        }
    }

    #[test]
    fn test_zero_weight_replica_never_reads() {
        let master: Arc<dyn Backend> = MemoryBackend::new();
        put(&master, "k", 1);
        let dead: Arc<dyn Backend> = MemoryBackend::new();
        let set = ReplicaSet::new(master, vec![(dead, 0)]);
        for _ in 0..8 {
            assert!(set.get_row(&def(), "k").unwrap().is_some());
        }
    }
}
