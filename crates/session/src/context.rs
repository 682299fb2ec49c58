//! Execution context handed to System logic
//!
//! The context owns the Session for one invocation attempt and carries the
//! caller's identity, the deferred client response, and the base Systems
//! invocable within the same transaction. The executor moves a fresh
//! Session in before running user logic and takes it back out to commit, so
//! a retried invocation never sees stale rows.

use crate::session::Session;
use rustc_hash::FxHashMap;
use std::sync::Arc;
use tessera_core::error::{Result, TesseraError};
use tessera_core::row::Row;
use tessera_core::types::{CallerId, Role};
use tessera_core::value::Value;

/// Signature of registered System logic
///
/// The handler reads and mutates components through the context; its
/// returned payload (when any) becomes the `rsp` body after the commit
/// succeeds.
pub type SystemHandler = Arc<
    dyn Fn(&mut SystemContext, &[serde_json::Value]) -> Result<Option<serde_json::Value>>
        + Send
        + Sync,
>;

/// Elevation requested by the built-in permission-elevation System
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Elevation {
    /// Identity the connection assumes
    pub caller: CallerId,
    /// Role granted to the connection
    pub role: Role,
}

/// Per-invocation execution context
pub struct SystemContext {
    caller: Option<CallerId>,
    role: Role,
    session: Session,
    response: Option<serde_json::Value>,
    elevation: Option<Elevation>,
    bases: FxHashMap<String, SystemHandler>,
}

impl SystemContext {
    /// Build a context around a fresh Session
    pub fn new(
        session: Session,
        caller: Option<CallerId>,
        role: Role,
        bases: FxHashMap<String, SystemHandler>,
    ) -> Self {
        SystemContext {
            caller,
            role,
            session,
            response: None,
            elevation: None,
            bases,
        }
    }

    /// Identity of the calling connection, when elevated
    pub fn caller(&self) -> Option<CallerId> {
        self.caller
    }

    /// Role of the calling connection
    pub fn role(&self) -> Role {
        self.role
    }

    // =========================================================================
    // Component access (delegates to the Session)
    // =========================================================================

    /// See [`Session::get`]
    pub fn get(&mut self, table: &str, value: &Value, where_col: &str) -> Result<Option<Row>> {
        self.session.get(table, value, where_col)
    }

    /// See [`Session::range`]
    pub fn range(
        &mut self,
        table: &str,
        index_col: &str,
        left: &Value,
        right: &Value,
        limit: usize,
        desc: bool,
    ) -> Result<Vec<Row>> {
        self.session.range(table, index_col, left, right, limit, desc)
    }

    /// See [`Session::new_row`]
    pub fn new_row(&mut self, table: &str) -> Result<Row> {
        self.session.new_row(table)
    }

    /// See [`Session::insert`]
    pub fn insert(&mut self, row: Row) -> Result<()> {
        self.session.insert(row)
    }

    /// See [`Session::update`]
    pub fn update(&mut self, row: Row) -> Result<()> {
        self.session.update(row)
    }

    /// See [`Session::delete`]
    pub fn delete(&mut self, row: &Row) -> Result<()> {
        self.session.delete(row)
    }

    /// See [`Session::update_or_insert`]
    pub fn update_or_insert(
        &mut self,
        table: &str,
        value: &Value,
        where_col: &str,
    ) -> Result<Row> {
        self.session.update_or_insert(table, value, where_col)
    }

    // =========================================================================
    // Responses, bases, elevation
    // =========================================================================

    /// Queue a client-visible response payload
    ///
    /// The payload reaches the connection only after the commit succeeds,
    /// never before.
    pub fn emit(&mut self, payload: serde_json::Value) {
        self.response = Some(payload);
    }

    /// Invoke a base System within the same Session
    ///
    /// Bases share this transaction; they are not nested transactions.
    pub fn call_base(
        &mut self,
        name: &str,
        args: &[serde_json::Value],
    ) -> Result<Option<serde_json::Value>> {
        let handler = self
            .bases
            .get(name)
            .cloned()
            .ok_or_else(|| TesseraError::unknown_system(name))?;
        handler(self, args)
    }

    /// Request elevation of the calling connection (built-in System only)
    ///
    /// Applied by the worker after the commit succeeds.
    pub fn elevate(&mut self, caller: CallerId, role: Role) {
        self.elevation = Some(Elevation { caller, role });
    }

    /// Dismantle the context after user logic returns
    ///
    /// Returns the Session (for commit), the queued response, and any
    /// requested elevation.
    pub fn into_parts(self) -> (Session, Option<serde_json::Value>, Option<Elevation>) {
        (self.session, self.response, self.elevation)
    }
}
