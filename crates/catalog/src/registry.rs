//! Component registry
//!
//! Registration is idempotent on identical input: registering the same
//! definition twice returns the existing handle, registering a differing
//! definition under the same name fails with `SchemaConflict`. After the
//! catalog is built, the registry is frozen and shared read-only.

use std::collections::BTreeMap;
use std::sync::Arc;
use tessera_core::error::{Result, TesseraError};
use tessera_core::schema::ComponentDef;
use tessera_core::types::Namespace;

/// Registry of component definitions, keyed by `(namespace, name)`
#[derive(Debug, Default)]
pub struct ComponentRegistry {
    map: BTreeMap<(Namespace, String), Arc<ComponentDef>>,
}

impl ComponentRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a definition
    ///
    /// # Errors
    ///
    /// `SchemaConflict` when a different definition already holds the name.
    pub fn register(&mut self, def: ComponentDef) -> Result<Arc<ComponentDef>> {
        let key = (def.namespace().clone(), def.name().to_string());
        if let Some(existing) = self.map.get(&key) {
            if existing.as_ref() == &def {
                return Ok(existing.clone());
            }
            return Err(TesseraError::SchemaConflict {
                table: def.name().to_string(),
            });
        }
        let def = Arc::new(def);
        self.map.insert(key, def.clone());
        Ok(def)
    }

    /// Look up a component by name within a namespace
    pub fn lookup(&self, ns: &Namespace, name: &str) -> Option<&Arc<ComponentDef>> {
        self.map.get(&(ns.clone(), name.to_string()))
    }

    /// Iterate the components of one namespace
    pub fn iterate<'a>(
        &'a self,
        ns: &'a Namespace,
    ) -> impl Iterator<Item = &'a Arc<ComponentDef>> + 'a {
        self.map
            .iter()
            .filter(move |((n, _), _)| n == ns)
            .map(|(_, def)| def)
    }

    /// Iterate every component across namespaces, in key order
    pub fn iter_all(&self) -> impl Iterator<Item = &Arc<ComponentDef>> {
        self.map.values()
    }

    /// Number of registered components
    pub fn len(&self) -> usize {
        self.map.len()
    }

    /// Whether the registry is empty
    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}
