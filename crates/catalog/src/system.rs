//! System definitions
//!
//! A System is a named piece of server-side logic registered against the
//! components it references. The handler runs inside a Session opened by the
//! executor; `bases` name other Systems invocable through the context within
//! the same transaction.

use std::fmt;
use tessera_core::error::Result;
use tessera_core::types::{Namespace, Permission};
use tessera_core::types::validate_name;
use tessera_session::SystemHandler;

/// Declaration of one System
#[derive(Clone)]
pub struct SystemDef {
    name: String,
    namespace: Namespace,
    permission: Permission,
    components: Vec<String>,
    bases: Vec<String>,
    handler: SystemHandler,
}

impl SystemDef {
    /// Declare a System
    pub fn new(
        namespace: Namespace,
        name: impl Into<String>,
        permission: Permission,
        handler: SystemHandler,
    ) -> Result<Self> {
        let name = name.into();
        validate_name("system", &name)?;
        Ok(SystemDef {
            name,
            namespace,
            permission,
            components: Vec::new(),
            bases: Vec::new(),
            handler,
        })
    }

    /// Components this System reads or writes
    pub fn with_components<I, S>(mut self, components: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.components = components.into_iter().map(Into::into).collect();
        self
    }

    /// Other Systems callable as helpers within the same transaction
    pub fn with_bases<I, S>(mut self, bases: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.bases = bases.into_iter().map(Into::into).collect();
        self
    }

    /// System name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Namespace the System is registered in
    pub fn namespace(&self) -> &Namespace {
        &self.namespace
    }

    /// Permission class required of the calling connection
    pub fn permission(&self) -> Permission {
        self.permission
    }

    /// Referenced component names
    pub fn components(&self) -> &[String] {
        &self.components
    }

    /// Base System names
    pub fn bases(&self) -> &[String] {
        &self.bases
    }

    /// The registered logic
    pub fn handler(&self) -> &SystemHandler {
        &self.handler
    }
}

impl fmt::Debug for SystemDef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SystemDef")
            .field("name", &self.name)
            .field("namespace", &self.namespace)
            .field("permission", &self.permission)
            .field("components", &self.components)
            .field("bases", &self.bases)
            .finish_non_exhaustive()
    }
}
