//! Cluster planning
//!
//! Any two Systems sharing at least one referenced component must run
//! against the same backend shard, because their transactions may span the
//! shared component. The planner builds a union-find over components: every
//! component a System references (directly or through its bases) joins one
//! cluster, and each cluster receives a stable numeric id used as the
//! `{CLU K}` key tag.
//!
//! A cluster whose components bind to different backends cannot commit
//! atomically; planning fails with `CrossBackendCluster` before the worker
//! serves traffic.

use crate::registry::ComponentRegistry;
use crate::system::SystemDef;
use std::collections::BTreeMap;
use tessera_core::error::{Result, TesseraError};
use tessera_core::types::{ClusterId, Namespace};

/// Disjoint-set forest over component indices
struct UnionFind {
    parent: Vec<usize>,
    rank: Vec<u8>,
}

impl UnionFind {
    fn new(n: usize) -> Self {
        UnionFind {
            parent: (0..n).collect(),
            rank: vec![0; n],
        }
    }

    fn find(&mut self, x: usize) -> usize {
        if self.parent[x] != x {
            let root = self.find(self.parent[x]);
            self.parent[x] = root;
        }
        self.parent[x]
    }

    fn union(&mut self, a: usize, b: usize) {
        let (ra, rb) = (self.find(a), self.find(b));
        if ra == rb {
            return;
        }
        match self.rank[ra].cmp(&self.rank[rb]) {
            std::cmp::Ordering::Less => self.parent[ra] = rb,
            std::cmp::Ordering::Greater => self.parent[rb] = ra,
            std::cmp::Ordering::Equal => {
                self.parent[rb] = ra;
                self.rank[ra] += 1;
            }
        }
    }
}

/// Result of cluster planning
#[derive(Debug, Default)]
pub struct ClusterPlan {
    component_clusters: BTreeMap<(Namespace, String), ClusterId>,
    system_clusters: BTreeMap<(Namespace, String), Option<ClusterId>>,
    count: u32,
}

impl ClusterPlan {
    /// Cluster id of a component
    pub fn component_cluster(&self, ns: &Namespace, name: &str) -> Option<ClusterId> {
        self.component_clusters
            .get(&(ns.clone(), name.to_string()))
            .copied()
    }

    /// Cluster id of a System (`None` for Systems touching no component)
    pub fn system_cluster(&self, ns: &Namespace, name: &str) -> Option<ClusterId> {
        self.system_clusters
            .get(&(ns.clone(), name.to_string()))
            .copied()
            .flatten()
    }

    /// Number of clusters
    pub fn count(&self) -> u32 {
        self.count
    }
}

/// Resolve a System's component set, following bases transitively
fn effective_components<'a>(
    system: &'a SystemDef,
    systems: &'a BTreeMap<(Namespace, String), SystemDef>,
    out: &mut Vec<String>,
    depth: usize,
) -> Result<()> {
    if depth > systems.len() {
        return Err(TesseraError::logic(format!(
            "base cycle reaching system {:?}",
            system.name()
        )));
    }
    out.extend(system.components().iter().cloned());
    for base in system.bases() {
        let key = (system.namespace().clone(), base.clone());
        let base_def = systems
            .get(&key)
            .ok_or_else(|| TesseraError::unknown_system(base.clone()))?;
        effective_components(base_def, systems, out, depth + 1)?;
    }
    Ok(())
}

/// Build the cluster plan
///
/// Cluster ids are assigned in component key order, so a given set of
/// definitions always plans identically: the ids are part of the persisted
/// key layout and must not drift between runs.
pub fn plan(
    components: &ComponentRegistry,
    systems: &BTreeMap<(Namespace, String), SystemDef>,
) -> Result<ClusterPlan> {
    // Stable component ordering drives both the union-find indices and the
    // final cluster numbering.
    let keys: Vec<(Namespace, String)> = components
        .iter_all()
        .map(|def| (def.namespace().clone(), def.name().to_string()))
        .collect();
    let index_of: BTreeMap<&(Namespace, String), usize> =
        keys.iter().enumerate().map(|(i, k)| (k, i)).collect();

    let mut forest = UnionFind::new(keys.len());
    for system in systems.values() {
        let mut refs = Vec::new();
        effective_components(system, systems, &mut refs, 0)?;
        let mut indices = Vec::with_capacity(refs.len());
        for name in &refs {
            let key = (system.namespace().clone(), name.clone());
            let idx = index_of.get(&key).ok_or_else(|| {
                TesseraError::query(format!(
                    "system {:?} references unregistered component {:?}",
                    system.name(),
                    name
                ))
            })?;
            indices.push(*idx);
        }
        for pair in indices.windows(2) {
            forest.union(pair[0], pair[1]);
        }
    }

    // Number clusters by first appearance in key order.
    let mut cluster_of_root: BTreeMap<usize, ClusterId> = BTreeMap::new();
    let mut component_clusters = BTreeMap::new();
    let mut next: ClusterId = 0;
    for (i, key) in keys.iter().enumerate() {
        let root = forest.find(i);
        let id = *cluster_of_root.entry(root).or_insert_with(|| {
            let id = next;
            next += 1;
            id
        });
        component_clusters.insert(key.clone(), id);
    }

    // Every cluster must live on one backend.
    let mut cluster_backend: BTreeMap<ClusterId, (String, String)> = BTreeMap::new();
    for def in components.iter_all() {
        let key = (def.namespace().clone(), def.name().to_string());
        let id = component_clusters[&key];
        match cluster_backend.get(&id) {
            None => {
                cluster_backend.insert(id, (def.backend().to_string(), def.name().to_string()));
            }
            Some((backend, first)) if backend != def.backend() => {
                return Err(TesseraError::CrossBackendCluster {
                    detail: format!(
                        "{} on {:?}, {} on {:?}",
                        first,
                        backend,
                        def.name(),
                        def.backend()
                    ),
                });
            }
            Some(_) => {}
        }
    }

    let mut system_clusters = BTreeMap::new();
    for (key, system) in systems {
        let mut refs = Vec::new();
        effective_components(system, systems, &mut refs, 0)?;
        let cluster = refs.first().map(|name| {
            component_clusters[&(system.namespace().clone(), name.clone())]
        });
        system_clusters.insert(key.clone(), cluster);
    }

    Ok(ClusterPlan {
        component_clusters,
        system_clusters,
        count: next,
    })
}
