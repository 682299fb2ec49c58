//! System executor: RPC dispatch with transactional wrapping
//!
//! `call_system` resolves the System, checks the caller's permission, opens
//! a Session, runs the user logic, and commits. Commit races restart the
//! whole invocation from a fresh Session under the retry policy. Everything
//! else (unique violations, user-raised errors) aborts and surfaces to the
//! caller with its structured code.
//!
//! Every invocation is logged with caller identity, System name, retry
//! count, outcome code, and wall-clock duration; a DEBUG-level replay record
//! captures the arguments and the commit outcome for post-hoc reproduction.

use crate::retry::RetryPolicy;
use rustc_hash::FxHashMap;
use std::sync::Arc;
use std::time::Instant;
use tessera_backend::TableManager;
use tessera_catalog::Catalog;
use tessera_core::error::{Result, TesseraError};
use tessera_core::traits::{Backend, IdAllocator};
use tessera_core::types::{CallerId, Namespace, Role};
use tessera_session::{Elevation, Session, SystemContext, SystemHandler};
use tracing::{debug, info, warn};

/// Result of a successful System invocation
#[derive(Debug, Clone)]
pub struct CallOutcome {
    /// Response payload queued for the connection (after commit)
    pub response: Option<serde_json::Value>,
    /// Elevation requested by the built-in elevation System
    pub elevation: Option<Elevation>,
    /// Backend commit sequence (0 for read-only invocations)
    pub seq: u64,
    /// Number of race retries performed
    pub retries: u32,
}

/// Dispatches RPCs into transactional System invocations
pub struct SystemExecutor {
    catalog: Arc<Catalog>,
    backend: Arc<dyn Backend>,
    tables: Arc<TableManager>,
    ids: Arc<dyn IdAllocator>,
    retry: RetryPolicy,
}

impl SystemExecutor {
    /// Assemble an executor over a worker's shared state
    pub fn new(
        catalog: Arc<Catalog>,
        backend: Arc<dyn Backend>,
        tables: Arc<TableManager>,
        ids: Arc<dyn IdAllocator>,
        retry: RetryPolicy,
    ) -> Self {
        SystemExecutor {
            catalog,
            backend,
            tables,
            ids,
            retry,
        }
    }

    /// The catalog this executor resolves Systems from
    pub fn catalog(&self) -> &Arc<Catalog> {
        &self.catalog
    }

    /// Invoke a System on behalf of a connection
    ///
    /// # Errors
    ///
    /// - `UnknownSystem` when no System carries the name in the namespace;
    /// - `PermissionDenied` when the connection's role is insufficient;
    /// - `RaceExhausted` when commit races outlive the retry budget;
    /// - any logic error the user code or the commit raised, unretried.
    pub async fn call_system(
        &self,
        namespace: &Namespace,
        caller: Option<CallerId>,
        role: Role,
        name: &str,
        args: &[serde_json::Value],
    ) -> Result<CallOutcome> {
        let started = Instant::now();
        let result = self.call_inner(namespace, caller, role, name, args).await;

        let (code, retries) = match &result {
            Ok(outcome) => ("OK", outcome.retries),
            Err(TesseraError::RaceExhausted { retries, .. }) => ("RaceExhausted", *retries),
            Err(e) => (e.code(), 0),
        };
        info!(
            caller = caller.unwrap_or(0),
            system = name,
            retries,
            outcome = code,
            duration_ms = started.elapsed().as_millis() as u64,
            "rpc"
        );
        result
    }

    async fn call_inner(
        &self,
        namespace: &Namespace,
        caller: Option<CallerId>,
        role: Role,
        name: &str,
        args: &[serde_json::Value],
    ) -> Result<CallOutcome> {
        let system = self
            .catalog
            .system(namespace, name)
            .ok_or_else(|| TesseraError::unknown_system(name))?
            .clone();

        if !system.permission().admits(role) {
            return Err(TesseraError::permission_denied(
                name,
                system.permission().as_str(),
            ));
        }

        // Bases resolved once: they share the Session, not the retry loop.
        let mut bases: FxHashMap<String, SystemHandler> = FxHashMap::default();
        for base in system.bases() {
            let def = self
                .catalog
                .system(namespace, base)
                .ok_or_else(|| TesseraError::unknown_system(base.clone()))?;
            bases.insert(base.clone(), def.handler().clone());
        }

        let started = Instant::now();
        let mut attempt: u32 = 0;
        loop {
            let session = Session::new(
                self.backend.clone(),
                self.tables.clone(),
                self.ids.clone(),
                namespace.clone(),
            );
            let mut ctx = SystemContext::new(session, caller, role, bases.clone());

            let payload = match (system.handler())(&mut ctx, args) {
                Ok(payload) => payload,
                Err(e) => {
                    // User logic failed: abort, surface, never retry.
                    debug!(system = name, code = e.code(), "system logic aborted");
                    return Err(e);
                }
            };

            let (session, emitted, elevation) = ctx.into_parts();
            let response = payload.or(emitted);

            match session.commit() {
                Ok(receipt) => {
                    debug!(
                        system = name,
                        args = %serde_json::Value::from(args.to_vec()),
                        seq = receipt.seq,
                        "replay"
                    );
                    return Ok(CallOutcome {
                        response,
                        elevation,
                        seq: receipt.seq,
                        retries: attempt,
                    });
                }
                Err(e) if e.is_transient() => {
                    attempt += 1;
                    let delay = self.retry.delay_for(attempt);
                    if started.elapsed() + delay > self.retry.budget {
                        warn!(system = name, retries = attempt, "race budget exhausted");
                        return Err(TesseraError::RaceExhausted {
                            system: name.to_string(),
                            retries: attempt,
                        });
                    }
                    debug!(
                        system = name,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        "commit race, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => {
                    debug!(
                        system = name,
                        args = %serde_json::Value::from(args.to_vec()),
                        code = e.code(),
                        "replay (aborted)"
                    );
                    return Err(e);
                }
            }
        }
    }
}
