//! Catalog builder
//!
//! Application startup registers every component and System through the
//! builder and receives an immutable `Catalog`. The catalog is the single
//! source of truth threaded into each worker: schema lookups, System
//! resolution, and the cluster plan all come from it, and tests build fresh
//! catalogs instead of sharing process-wide registries.

use crate::cluster::{plan, ClusterPlan};
use crate::registry::ComponentRegistry;
use crate::system::SystemDef;
use std::collections::BTreeMap;
use std::sync::Arc;
use tessera_core::error::{Result, TesseraError};
use tessera_core::schema::ComponentDef;
use tessera_core::types::{ClusterId, Namespace};
use tracing::info;

/// Staged registrations, consumed by `build`
#[derive(Debug, Default)]
pub struct CatalogBuilder {
    components: ComponentRegistry,
    systems: BTreeMap<(Namespace, String), SystemDef>,
}

impl CatalogBuilder {
    /// Create an empty builder
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a component definition (idempotent on identical input)
    pub fn component(mut self, def: ComponentDef) -> Result<Self> {
        self.components.register(def)?;
        Ok(self)
    }

    /// Register a System
    ///
    /// # Errors
    ///
    /// `LogicError` when the name is already taken in the namespace.
    pub fn system(mut self, def: SystemDef) -> Result<Self> {
        let key = (def.namespace().clone(), def.name().to_string());
        if self.systems.contains_key(&key) {
            return Err(TesseraError::logic(format!(
                "system {:?} registered twice in namespace {}",
                key.1, key.0
            )));
        }
        self.systems.insert(key, def);
        Ok(self)
    }

    /// Validate everything and freeze the catalog
    ///
    /// Runs the cluster planner; any dangling reference or cross-backend
    /// cluster fails here, before a worker ever serves traffic.
    pub fn build(self) -> Result<Catalog> {
        let plan = plan(&self.components, &self.systems)?;
        info!(
            components = self.components.len(),
            systems = self.systems.len(),
            clusters = plan.count(),
            "catalog built"
        );
        Ok(Catalog {
            components: self.components,
            systems: self
                .systems
                .into_iter()
                .map(|(k, v)| (k, Arc::new(v)))
                .collect(),
            plan,
        })
    }
}

/// Immutable catalog of components, Systems, and the cluster plan
#[derive(Debug)]
pub struct Catalog {
    components: ComponentRegistry,
    systems: BTreeMap<(Namespace, String), Arc<SystemDef>>,
    plan: ClusterPlan,
}

impl Catalog {
    /// Look up a component
    pub fn component(&self, ns: &Namespace, name: &str) -> Option<&Arc<ComponentDef>> {
        self.components.lookup(ns, name)
    }

    /// Look up a System
    pub fn system(&self, ns: &Namespace, name: &str) -> Option<&Arc<SystemDef>> {
        self.systems.get(&(ns.clone(), name.to_string()))
    }

    /// Components of one namespace
    pub fn components<'a>(
        &'a self,
        ns: &'a Namespace,
    ) -> impl Iterator<Item = &'a Arc<ComponentDef>> + 'a {
        self.components.iterate(ns)
    }

    /// Every System in key order
    pub fn systems(&self) -> impl Iterator<Item = &Arc<SystemDef>> {
        self.systems.values()
    }

    /// Cluster id of a component
    pub fn component_cluster(&self, ns: &Namespace, name: &str) -> Option<ClusterId> {
        self.plan.component_cluster(ns, name)
    }

    /// Cluster id of a System (`None` when it touches no component)
    pub fn system_cluster(&self, ns: &Namespace, name: &str) -> Option<ClusterId> {
        self.plan.system_cluster(ns, name)
    }

    /// Number of planned clusters
    pub fn cluster_count(&self) -> u32 {
        self.plan.count()
    }

    /// `(component, cluster)` pairs for the Table Manager
    pub fn table_set(&self) -> Vec<(Arc<ComponentDef>, ClusterId)> {
        self.components
            .iter_all()
            .map(|def| {
                let cluster = self
                    .plan
                    .component_cluster(def.namespace(), def.name())
                    .unwrap_or(0);
                (def.clone(), cluster)
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc as StdArc;
    use tessera_core::schema::ColumnDef;
    use tessera_core::types::{Permission, Persistence};
    use tessera_core::value::ColumnType;
    use tessera_session::SystemHandler;

    fn ns() -> Namespace {
        Namespace::new("game").unwrap()
    }

    fn component(name: &str) -> ComponentDef {
        ComponentDef::new(
            ns(),
            name,
            vec![ColumnDef::new("v", ColumnType::I64)],
            Permission::Everybody,
            Persistence::Persistent,
            "main",
        )
        .unwrap()
    }

    fn noop() -> SystemHandler {
        StdArc::new(|_, _| Ok(None))
    }

    #[test]
    fn test_build_and_lookup() {
        let catalog = CatalogBuilder::new()
            .component(component("HP"))
            .unwrap()
            .system(
                SystemDef::new(ns(), "use_hp", Permission::User, noop())
                    .unwrap()
                    .with_components(["HP"]),
            )
            .unwrap()
            .build()
            .unwrap();

        assert!(catalog.component(&ns(), "HP").is_some());
        assert!(catalog.system(&ns(), "use_hp").is_some());
        assert!(catalog.system(&ns(), "ghost").is_none());
        assert_eq!(catalog.cluster_count(), 1);
        assert_eq!(catalog.table_set().len(), 1);
    }

    #[test]
    fn test_duplicate_system_name_rejected() {
        let result = CatalogBuilder::new()
            .system(SystemDef::new(ns(), "s", Permission::Everybody, noop()).unwrap())
            .unwrap()
            .system(SystemDef::new(ns(), "s", Permission::Everybody, noop()).unwrap());
        assert!(result.is_err());
    }

    #[test]
    fn test_build_fails_on_dangling_reference() {
        let result = CatalogBuilder::new()
            .system(
                SystemDef::new(ns(), "s", Permission::Everybody, noop())
                    .unwrap()
                    .with_components(["Ghost"]),
            )
            .unwrap()
            .build();
        assert!(result.is_err());
    }

    #[test]
    fn test_fresh_catalogs_are_independent() {
        let c1 = CatalogBuilder::new()
            .component(component("HP"))
            .unwrap()
            .build()
            .unwrap();
        let c2 = CatalogBuilder::new().build().unwrap();
        assert!(c1.component(&ns(), "HP").is_some());
        assert!(c2.component(&ns(), "HP").is_none());
    }
}
