//! Worker assembly and message dispatch
//!
//! One worker owns a catalog, a backend, the table bindings, the executor,
//! and the broker, plus the per-connection state of every client link it
//! serves. Workers are independent: all shared mutable state lives in the
//! backend, so hosts run several workers side by side.
//!
//! The external pipeline hands the worker decoded JSON messages; dispatch
//! routes `rpc` to the executor and `sub`/`unsub` to the broker, and every
//! failure is rendered as a structured error envelope rather than a closed
//! connection.

use crate::config::WorkerConfig;
use crate::connection::ConnectionSession;
use crate::protocol::{ClientMessage, ServerMessage};
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tessera_backend::{install, TableManager};
use tessera_catalog::{Catalog, CatalogBuilder, SystemDef};
use tessera_broker::{ConnectionId, OutboundItem, SubscriptionBroker};
use tessera_core::error::{Result, TesseraError};
use tessera_core::row::Row;
use tessera_core::schema::{ComponentDef, ID_COLUMN};
use tessera_core::traits::{Backend, IdAllocator};
use tessera_core::types::{Namespace, Permission, Role};
use tessera_core::value::{ColumnType, Value};
use tessera_executor::{RetryPolicy, SystemExecutor};
use tessera_session::SystemContext;
use tracing::{debug, info, warn};

/// One worker process's core
pub struct Worker {
    config: WorkerConfig,
    catalog: Arc<Catalog>,
    broker: Arc<SubscriptionBroker>,
    executor: SystemExecutor,
    connections: Mutex<FxHashMap<ConnectionId, Arc<Mutex<ConnectionSession>>>>,
    anon_per_ip: Mutex<FxHashMap<String, usize>>,
    next_conn: AtomicU64,
}

impl Worker {
    /// Build a worker: register built-ins, freeze the catalog, install
    /// schemas, and wire the executor and broker
    ///
    /// Fatal schema or cluster failures surface here; a worker that fails to
    /// start must not serve traffic.
    pub fn start(
        config: WorkerConfig,
        builder: CatalogBuilder,
        namespace: &Namespace,
        backend: Arc<dyn Backend>,
        ids: Arc<dyn IdAllocator>,
    ) -> Result<Arc<Self>> {
        config.validate()?;
        let builder = builder.system(elevation_system(&config, namespace)?)?;
        let catalog = Arc::new(builder.build()?);

        let tables = Arc::new(TableManager::new(catalog.table_set()));
        install(&tables, &backend)?;

        let executor = SystemExecutor::new(
            catalog.clone(),
            backend.clone(),
            tables.clone(),
            ids,
            RetryPolicy::with_budget(std::time::Duration::from_millis(config.retry_budget_ms)),
        );
        let broker = SubscriptionBroker::new(backend, tables);

        info!(
            listen = %config.listen_addr,
            clusters = catalog.cluster_count(),
            "worker ready"
        );
        Ok(Arc::new(Worker {
            config,
            catalog,
            broker,
            executor,
            connections: Mutex::new(FxHashMap::default()),
            anon_per_ip: Mutex::new(FxHashMap::default()),
            next_conn: AtomicU64::new(1),
        }))
    }

    /// The frozen catalog
    pub fn catalog(&self) -> &Arc<Catalog> {
        &self.catalog
    }

    /// Worker configuration
    pub fn config(&self) -> &WorkerConfig {
        &self.config
    }

    // =========================================================================
    // Connection lifecycle
    // =========================================================================

    /// Admit a client link after its handshake
    ///
    /// # Errors
    ///
    /// `ConnectionBudget` when the IP already holds the configured number of
    /// anonymous connections.
    pub fn connect(&self, peer_ip: &str, namespace: Namespace) -> Result<ConnectionId> {
        {
            let mut per_ip = self.anon_per_ip.lock();
            let count = per_ip.entry(peer_ip.to_string()).or_insert(0);
            if *count >= self.config.max_anonymous_per_ip {
                return Err(TesseraError::ConnectionBudget {
                    limit: self.config.max_anonymous_per_ip,
                });
            }
            *count += 1;
        }

        let id = self.next_conn.fetch_add(1, Ordering::Relaxed);
        let queue = self.broker.register_connection(id);
        let session = ConnectionSession::new(id, peer_ip, namespace, &self.config, queue);
        self.connections
            .lock()
            .insert(id, Arc::new(Mutex::new(session)));
        debug!(conn = id, peer_ip, "connection admitted");
        Ok(id)
    }

    /// Tear down a closing connection
    ///
    /// Releases subscription handles and, while the connection is still
    /// anonymous, returns its admission slot to the per-IP pool. In-flight
    /// RPCs past commit issuance still commit; their queued responses die
    /// with the outbound queue.
    pub fn disconnect(&self, conn: ConnectionId) {
        let Some(session) = self.connections.lock().remove(&conn) else {
            return;
        };
        let (role, ip) = {
            let s = session.lock();
            (s.role(), s.peer_ip().to_string())
        };
        if role == Role::Anonymous {
            let mut per_ip = self.anon_per_ip.lock();
            if let Some(count) = per_ip.get_mut(&ip) {
                *count = count.saturating_sub(1);
                if *count == 0 {
                    per_ip.remove(&ip);
                }
            }
        }
        self.broker.drop_connection(conn);
        debug!(conn, "connection closed");
    }

    /// Close every connection idle past the configured window
    pub fn sweep_idle(&self) -> Vec<ConnectionId> {
        let now = Instant::now();
        let idle: Vec<ConnectionId> = self
            .connections
            .lock()
            .iter()
            .filter(|(_, s)| s.lock().is_idle(now))
            .map(|(id, _)| *id)
            .collect();
        for conn in &idle {
            warn!(conn = *conn, "closing idle connection");
            self.disconnect(*conn);
        }
        idle
    }

    fn session(&self, conn: ConnectionId) -> Result<Arc<Mutex<ConnectionSession>>> {
        self.connections
            .lock()
            .get(&conn)
            .cloned()
            .ok_or_else(|| TesseraError::internal(format!("unknown connection {}", conn)))
    }

    // =========================================================================
    // Dispatch
    // =========================================================================

    /// Handle one decoded client message; replies (if any) are returned
    ///
    /// All failures are rendered as error envelopes; only an unknown
    /// connection id is an `Err`.
    pub async fn handle_message(
        &self,
        conn: ConnectionId,
        raw: &serde_json::Value,
    ) -> Result<Vec<ServerMessage>> {
        let session = self.session(conn)?;

        let outcome = self.dispatch(&session, raw).await;
        Ok(match outcome {
            Ok(replies) => replies,
            Err(e) => {
                debug!(conn, code = e.code(), "request failed");
                vec![ServerMessage::from_error(&e)]
            }
        })
    }

    async fn dispatch(
        &self,
        session: &Arc<Mutex<ConnectionSession>>,
        raw: &serde_json::Value,
    ) -> Result<Vec<ServerMessage>> {
        let encoded_len = serde_json::to_string(raw)?.len();
        if encoded_len > self.config.max_message_bytes {
            return Err(TesseraError::query(format!(
                "message of {} bytes exceeds the {} byte cap",
                encoded_len, self.config.max_message_bytes
            )));
        }

        match ClientMessage::parse(raw)? {
            ClientMessage::Rpc { system, args } => {
                let (namespace, caller, role) = {
                    let mut s = session.lock();
                    s.admit_recv(Instant::now())?;
                    s.touch(Instant::now());
                    (s.namespace().clone(), s.caller(), s.role())
                };

                let outcome = self
                    .executor
                    .call_system(&namespace, caller, role, &system, &args)
                    .await?;

                if let Some(elevation) = outcome.elevation {
                    session.lock().apply_elevation(elevation, &self.config);
                }
                Ok(vec![ServerMessage::Rsp {
                    payload: outcome.response.unwrap_or(serde_json::Value::Null),
                }])
            }

            ClientMessage::SubRow {
                table,
                column,
                value,
            } => {
                let (namespace, caller, role, conn_id) = {
                    let mut s = session.lock();
                    s.admit_recv(Instant::now())?;
                    (s.namespace().clone(), s.caller(), s.role(), s.id())
                };
                let def = self.component(&namespace, &table)?;
                if !def.has_index(&column) {
                    return Err(TesseraError::not_subscribable(&table, &column));
                }
                let value = column_type(&def, &column)?.from_json(&value)?;
                let outcome = self.broker.subscribe_row(
                    conn_id,
                    &namespace,
                    &table,
                    &column,
                    &value,
                    role,
                    caller,
                    self.config.row_sub_budget,
                )?;
                Ok(vec![ServerMessage::SubOk {
                    sub_id: outcome.sub_id,
                    snapshot: outcome
                        .snapshot
                        .first()
                        .map(Row::to_json)
                        .unwrap_or(serde_json::Value::Null),
                }])
            }

            ClientMessage::SubRange {
                table,
                column,
                left,
                right,
                limit,
                desc,
                force,
            } => {
                let (namespace, caller, role, conn_id) = {
                    let mut s = session.lock();
                    s.admit_recv(Instant::now())?;
                    (s.namespace().clone(), s.caller(), s.role(), s.id())
                };
                let def = self.component(&namespace, &table)?;
                if !def.has_index(&column) {
                    return Err(TesseraError::not_subscribable(&table, &column));
                }
                let dtype = column_type(&def, &column)?;
                let left = bound_value(&dtype, &left, false)?;
                let right = bound_value(&dtype, &right, true)?;
                let outcome = self.broker.subscribe_range(
                    conn_id,
                    &namespace,
                    &table,
                    &column,
                    &left,
                    &right,
                    limit,
                    desc,
                    force,
                    role,
                    caller,
                    self.config.index_sub_budget,
                )?;
                let snapshot: Vec<serde_json::Value> =
                    outcome.snapshot.iter().map(Row::to_json).collect();
                Ok(vec![ServerMessage::SubOk {
                    sub_id: outcome.sub_id,
                    snapshot: serde_json::Value::from(snapshot),
                }])
            }

            ClientMessage::Unsub { sub_id } => {
                let conn_id = session.lock().id();
                self.broker.unsubscribe(conn_id, &sub_id);
                Ok(Vec::new())
            }
        }
    }

    /// Await the next push for a connection, paced by its send budget
    ///
    /// Returns `None` once the connection's queue is closed and drained.
    pub async fn next_push(&self, conn: ConnectionId) -> Option<ServerMessage> {
        let session = self.session(conn).ok()?;
        let queue = session.lock().queue().clone();
        let item = queue.pop().await?;

        // Pace sends; the queue keeps coalescing behind us while we wait.
        loop {
            let admitted = session.lock().admit_send(Instant::now());
            match admitted {
                Ok(()) => break,
                Err(TesseraError::RateLimited { window_secs, .. }) => {
                    let wait = std::time::Duration::from_millis(
                        (window_secs.max(1) * 1000 / 20).clamp(5, 250),
                    );
                    tokio::time::sleep(wait).await;
                }
                Err(_) => break,
            }
        }

        let mut s = session.lock();
        Some(match item {
            OutboundItem::Update { sub_id, rows } => {
                s.record_push();
                ServerMessage::Updt { sub_id, rows }
            }
            OutboundItem::Evicted { sub_id } => {
                s.record_eviction();
                ServerMessage::Evicted { sub_id }
            }
        })
    }

    /// Per-connection counters (access log, tests)
    pub fn connection_stats(&self, conn: ConnectionId) -> Option<crate::connection::ConnectionStats> {
        let session = self.connections.lock().get(&conn).cloned()?;
        let stats = session.lock().stats();
        Some(stats)
    }

    fn component(&self, ns: &Namespace, table: &str) -> Result<Arc<ComponentDef>> {
        self.catalog
            .component(ns, table)
            .cloned()
            .ok_or_else(|| TesseraError::query(format!("unknown component {}:{}", ns, table)))
    }
}

/// The built-in permission-elevation System
///
/// Takes the identity as its first argument, records it on the connection,
/// and grants USER. Registered under the configured name so deployments can
/// alias it (`login`, `login_test`, …).
pub fn elevation_system(config: &WorkerConfig, namespace: &Namespace) -> Result<SystemDef> {
    SystemDef::new(
        namespace.clone(),
        config.elevation_system.clone(),
        Permission::Everybody,
        Arc::new(|ctx: &mut SystemContext, args: &[serde_json::Value]| {
            let identity = args
                .first()
                .and_then(serde_json::Value::as_u64)
                .ok_or_else(|| TesseraError::query("elevation requires an unsigned identity"))?;
            ctx.elevate(identity, Role::User);
            Ok(Some(serde_json::json!({ "caller": identity })))
        }),
    )
}

/// Convert a wire literal to a typed column value
fn column_type(def: &Arc<ComponentDef>, column: &str) -> Result<ColumnType> {
    if column == ID_COLUMN {
        return Ok(ColumnType::U64);
    }
    def.column(column)
        .map(|c| c.dtype)
        .ok_or_else(|| {
            TesseraError::query(format!("{} has no column {:?}", def.name(), column))
        })
}

/// Convert a range boundary literal; `null` expands to the type's extreme
fn bound_value(dtype: &ColumnType, raw: &serde_json::Value, upper: bool) -> Result<Value> {
    if raw.is_null() {
        return Ok(if upper {
            dtype.max_value()
        } else {
            dtype.min_value()
        });
    }
    // `±inf` literals arrive as strings on some SDKs
    if let (Some(s), true) = (raw.as_str(), dtype.is_numeric()) {
        match s {
            "inf" | "+inf" => return Ok(dtype.max_value()),
            "-inf" => return Ok(dtype.min_value()),
            _ => {}
        }
    }
    dtype.from_json(raw)
}
