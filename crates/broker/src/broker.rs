//! The subscription broker
//!
//! One broker per worker. It keeps a per-connection directory of row and
//! range subscriptions, consumes the backend's committed-change topics, and
//! pushes diffs into each connection's outbound queue.
//!
//! # Data flow
//!
//! 1. `subscribe_*` runs the initial query through a short-lived read-only
//!    Session, stores the reported membership, and registers interest on the
//!    component's change topic (one pump task per topic, refcounted).
//! 2. A committed batch wakes the topic pump, which re-evaluates every
//!    possibly-affected subscription, diffs against its last report, and
//!    pushes the delta. Per-topic processing is single-tasked, so deltas
//!    reach a subscription in backend commit order.
//! 3. `unsubscribe` / `drop_connection` release handles; the last handle on
//!    a topic cancels the pump and unregisters the backend notification.
//!
//! A subscription whose connection cannot drain is evicted with a
//! `SubscriptionEvicted` signal; broker-side errors on one subscription
//! never kill the connection.

use crate::queue::{OutboundQueue, PushResult};
use crate::subscription::{membership, ConnectionId, Subscription, SubscriptionQuery};
use crate::fingerprint;
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use std::collections::BTreeMap;
use std::sync::Arc;
use tessera_backend::TableManager;
use tessera_core::bundle::ChangeBatch;
use tessera_core::error::{Result, TesseraError};
use tessera_core::key;
use tessera_core::limits::{OUTBOUND_HIGH_WATER, OUTBOUND_QUEUE_CAPACITY};
use tessera_core::row::Row;
use tessera_core::schema::ComponentDef;
use tessera_core::traits::Backend;
use tessera_core::types::{CallerId, Namespace, Permission, Role, RowId};
use tessera_core::value::Value;
use tessera_session::Session;
use tokio::sync::{broadcast, oneshot};
use tracing::{debug, trace, warn};

/// Reply to a subscribe request
#[derive(Debug)]
pub struct SubscribeOutcome {
    /// Fingerprint handle; `None` when no subscription materialized
    pub sub_id: Option<String>,
    /// Snapshot rows in query order (zero or one row for a row subscription)
    pub snapshot: Vec<Row>,
}

struct ConnState {
    queue: Arc<OutboundQueue>,
    subs: FxHashMap<String, Subscription>,
}

struct TopicPump {
    refs: usize,
    cancel: Option<oneshot::Sender<()>>,
}

#[derive(Default)]
struct Inner {
    connections: FxHashMap<ConnectionId, ConnState>,
    pumps: FxHashMap<String, TopicPump>,
}

/// Per-worker subscription broker
pub struct SubscriptionBroker {
    backend: Arc<dyn Backend>,
    tables: Arc<TableManager>,
    inner: Mutex<Inner>,
    queue_capacity: usize,
    queue_high_water: usize,
}

impl SubscriptionBroker {
    /// Create a broker over a worker's backend and table bindings
    pub fn new(backend: Arc<dyn Backend>, tables: Arc<TableManager>) -> Arc<Self> {
        Self::with_queue_bounds(backend, tables, OUTBOUND_QUEUE_CAPACITY, OUTBOUND_HIGH_WATER)
    }

    /// Broker with custom outbound queue bounds (tests)
    pub fn with_queue_bounds(
        backend: Arc<dyn Backend>,
        tables: Arc<TableManager>,
        capacity: usize,
        high_water: usize,
    ) -> Arc<Self> {
        Arc::new(SubscriptionBroker {
            backend,
            tables,
            inner: Mutex::new(Inner::default()),
            queue_capacity: capacity,
            queue_high_water: high_water,
        })
    }

    /// Attach a connection; the returned queue is its push channel
    pub fn register_connection(&self, conn: ConnectionId) -> Arc<OutboundQueue> {
        let queue = Arc::new(OutboundQueue::new(self.queue_capacity, self.queue_high_water));
        self.inner.lock().connections.insert(
            conn,
            ConnState {
                queue: queue.clone(),
                subs: FxHashMap::default(),
            },
        );
        queue
    }

    /// Number of active subscriptions on a connection (`row`, `range`)
    pub fn subscription_counts(&self, conn: ConnectionId) -> (usize, usize) {
        let inner = self.inner.lock();
        let Some(state) = inner.connections.get(&conn) else {
            return (0, 0);
        };
        let rows = state.subs.values().filter(|s| s.query.is_row()).count();
        (rows, state.subs.len() - rows)
    }

    // =========================================================================
    // Subscribe / unsubscribe
    // =========================================================================

    /// Subscribe to the single row of `table` whose `column` equals `value`
    ///
    /// A missing row is reported as null and does not materialize a handle:
    /// clients watch for future rows with a range subscription.
    #[allow(clippy::too_many_arguments)]
    pub fn subscribe_row(
        self: &Arc<Self>,
        conn: ConnectionId,
        ns: &Namespace,
        table: &str,
        column: &str,
        value: &Value,
        role: Role,
        caller: Option<CallerId>,
        budget: usize,
    ) -> Result<SubscribeOutcome> {
        let def = self.admit(ns, table, column, role)?;
        let owner_filter = owner_filter(&def, caller);
        let value = lookup_type(&def, column)?.normalize(value)?;
        let fp = fingerprint::row(table, column, &value);

        if let Some(existing) = self.existing_snapshot(conn, &fp) {
            return Ok(existing);
        }
        self.check_budget(conn, true, budget)?;

        let query = SubscriptionQuery::Row {
            column: column.to_string(),
            value,
        };
        let snapshot = self.evaluate(ns, table, &query, owner_filter)?;
        if snapshot.is_empty() {
            // Null subscription: reported as such, no server state.
            return Ok(SubscribeOutcome {
                sub_id: None,
                snapshot,
            });
        }
        self.materialize(conn, ns, table, fp.clone(), query, owner_filter, &snapshot);
        Ok(SubscribeOutcome {
            sub_id: Some(fp),
            snapshot,
        })
    }

    /// Subscribe to rows of `table` whose `column` lies in `[left, right]`
    ///
    /// With `force` an empty range still materializes a handle, so the
    /// client is notified on first insertion; without it an empty snapshot
    /// establishes nothing.
    #[allow(clippy::too_many_arguments)]
    pub fn subscribe_range(
        self: &Arc<Self>,
        conn: ConnectionId,
        ns: &Namespace,
        table: &str,
        column: &str,
        left: &Value,
        right: &Value,
        limit: usize,
        desc: bool,
        force: bool,
        role: Role,
        caller: Option<CallerId>,
        budget: usize,
    ) -> Result<SubscribeOutcome> {
        let def = self.admit(ns, table, column, role)?;
        let owner_filter = owner_filter(&def, caller);
        let dtype = lookup_type(&def, column)?;
        let left = dtype.normalize(left)?;
        let right = dtype.normalize(right)?;
        let fp = fingerprint::range(table, column, &left, &right, desc, limit);

        if let Some(existing) = self.existing_snapshot(conn, &fp) {
            return Ok(existing);
        }
        self.check_budget(conn, false, budget)?;

        let query = SubscriptionQuery::Range {
            column: column.to_string(),
            left,
            right,
            limit,
            desc,
        };
        let snapshot = self.evaluate(ns, table, &query, owner_filter)?;
        if snapshot.is_empty() && !force {
            return Ok(SubscribeOutcome {
                sub_id: None,
                snapshot,
            });
        }
        self.materialize(conn, ns, table, fp.clone(), query, owner_filter, &snapshot);
        Ok(SubscribeOutcome {
            sub_id: Some(fp),
            snapshot,
        })
    }

    /// Drop one subscription handle
    pub fn unsubscribe(&self, conn: ConnectionId, sub_id: &str) {
        let mut inner = self.inner.lock();
        let Some(state) = inner.connections.get_mut(&conn) else {
            return;
        };
        if let Some(sub) = state.subs.remove(sub_id) {
            let topic = key::change_topic(&sub.namespace, &sub.table);
            self.release_topic(&mut inner, &topic);
            trace!(conn, sub_id, "unsubscribed");
        }
    }

    /// Release everything a closing connection held
    pub fn drop_connection(&self, conn: ConnectionId) {
        let mut inner = self.inner.lock();
        let Some(state) = inner.connections.remove(&conn) else {
            return;
        };
        state.queue.close();
        let topics: Vec<String> = state
            .subs
            .values()
            .map(|s| key::change_topic(&s.namespace, &s.table))
            .collect();
        for topic in topics {
            self.release_topic(&mut inner, &topic);
        }
        debug!(conn, "connection subscriptions released");
    }

    // =========================================================================
    // Internals
    // =========================================================================

    /// Permission and index admission for a subscribe request
    fn admit(
        &self,
        ns: &Namespace,
        table: &str,
        column: &str,
        role: Role,
    ) -> Result<Arc<ComponentDef>> {
        let binding = self.tables.binding(ns, table)?;
        let def = binding.def().clone();
        if !def.permission().admits(role) {
            return Err(TesseraError::permission_denied(
                table,
                def.permission().as_str(),
            ));
        }
        if !def.has_index(column) {
            return Err(TesseraError::not_subscribable(table, column));
        }
        Ok(def)
    }

    fn check_budget(&self, conn: ConnectionId, row_kind: bool, budget: usize) -> Result<()> {
        let (rows, ranges) = self.subscription_counts(conn);
        let used = if row_kind { rows } else { ranges };
        if used >= budget {
            return Err(TesseraError::SubscriptionBudget {
                kind: if row_kind { "row" } else { "index" }.to_string(),
                limit: budget,
            });
        }
        Ok(())
    }

    fn existing_snapshot(&self, conn: ConnectionId, fp: &str) -> Option<SubscribeOutcome> {
        let inner = self.inner.lock();
        let sub = inner.connections.get(&conn)?.subs.get(fp)?;
        Some(SubscribeOutcome {
            sub_id: Some(fp.to_string()),
            snapshot: sub.last.values().cloned().collect(),
        })
    }

    /// Current truth of a query, owner-filtered, in query order
    fn evaluate(
        &self,
        ns: &Namespace,
        table: &str,
        query: &SubscriptionQuery,
        owner_filter: Option<CallerId>,
    ) -> Result<Vec<Row>> {
        let mut session = Session::read_only(self.backend.clone(), self.tables.clone(), ns.clone());
        let rows = match query {
            SubscriptionQuery::Row { column, value } => {
                session.get(table, value, column)?.into_iter().collect()
            }
            SubscriptionQuery::Range {
                column,
                left,
                right,
                limit,
                desc,
            } => session.range(table, column, left, right, *limit, *desc)?,
        };
        Ok(match owner_filter {
            None => rows,
            Some(owner) => rows
                .into_iter()
                .filter(|r| r.owner() == Some(owner))
                .collect(),
        })
    }

    #[allow(clippy::too_many_arguments)]
    fn materialize(
        self: &Arc<Self>,
        conn: ConnectionId,
        ns: &Namespace,
        table: &str,
        fingerprint: String,
        query: SubscriptionQuery,
        owner_filter: Option<CallerId>,
        snapshot: &[Row],
    ) {
        let topic = key::change_topic(ns, table);
        let mut inner = self.inner.lock();
        self.ensure_pump(&mut inner, &topic);
        if let Some(state) = inner.connections.get_mut(&conn) {
            state.subs.insert(
                fingerprint.clone(),
                Subscription {
                    fingerprint,
                    namespace: ns.clone(),
                    table: table.to_string(),
                    query,
                    owner_filter,
                    last: membership(snapshot),
                    last_seq: 0,
                },
            );
        }
    }

    fn ensure_pump(self: &Arc<Self>, inner: &mut Inner, topic: &str) {
        let pump = inner
            .pumps
            .entry(topic.to_string())
            .or_insert_with(|| TopicPump {
                refs: 0,
                cancel: None,
            });
        pump.refs += 1;
        if pump.cancel.is_some() {
            return;
        }

        let (cancel_tx, mut cancel_rx) = oneshot::channel();
        pump.cancel = Some(cancel_tx);
        let mut rx = self.backend.subscribe(topic);
        let broker = self.clone();
        let topic = topic.to_string();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = &mut cancel_rx => break,
                    batch = rx.recv() => match batch {
                        Ok(batch) => broker.process_batch(&topic, batch),
                        Err(broadcast::error::RecvError::Lagged(missed)) => {
                            warn!(topic = %topic, missed, "notification lag, resyncing topic");
                            broker.resync_topic(&topic);
                        }
                        Err(broadcast::error::RecvError::Closed) => break,
                    }
                }
            }
            trace!(topic = %topic, "topic pump stopped");
        });
    }

    fn release_topic(&self, inner: &mut Inner, topic: &str) {
        let drained = match inner.pumps.get_mut(topic) {
            Some(pump) => {
                pump.refs = pump.refs.saturating_sub(1);
                if pump.refs == 0 {
                    if let Some(cancel) = pump.cancel.take() {
                        let _ = cancel.send(());
                    }
                    true
                } else {
                    false
                }
            }
            None => false,
        };
        if drained {
            inner.pumps.remove(topic);
            self.backend.unsubscribe(topic);
        }
    }

    /// Re-evaluate every possibly-affected subscription after a commit
    fn process_batch(self: &Arc<Self>, topic: &str, batch: ChangeBatch) {
        self.reevaluate(topic, Some(&batch));
    }

    /// Full reevaluation of a topic (lag recovery)
    fn resync_topic(self: &Arc<Self>, topic: &str) {
        self.reevaluate(topic, None);
    }

    fn reevaluate(self: &Arc<Self>, topic: &str, batch: Option<&ChangeBatch>) {
        let mut inner = self.inner.lock();

        // Collect targets first: eviction mutates the directory mid-walk.
        let targets: Vec<(ConnectionId, String)> = inner
            .connections
            .iter()
            .flat_map(|(conn, state)| {
                state.subs.values().filter_map(|sub| {
                    let sub_topic = key::change_topic(&sub.namespace, &sub.table);
                    if sub_topic != topic {
                        return None;
                    }
                    if let Some(batch) = batch {
                        if !sub.affected_by(batch) {
                            return None;
                        }
                    }
                    Some((*conn, sub.fingerprint.clone()))
                })
            })
            .collect();

        for (conn, fp) in targets {
            let Some((ns, table, query, owner, queue)) =
                inner.connections.get(&conn).and_then(|state| {
                    state.subs.get(&fp).map(|sub| {
                        (
                            sub.namespace.clone(),
                            sub.table.clone(),
                            sub.query.clone(),
                            sub.owner_filter,
                            state.queue.clone(),
                        )
                    })
                })
            else {
                continue;
            };

            let truth = match self.evaluate(&ns, &table, &query, owner) {
                Ok(rows) => membership(&rows),
                Err(e) => {
                    // One broken subscription never kills the connection.
                    warn!(conn, sub_id = %fp, error = %e, "subscription reevaluation failed, evicting");
                    self.evict(&mut inner, conn, &fp);
                    continue;
                }
            };
            let Some(diff) = inner
                .connections
                .get(&conn)
                .and_then(|s| s.subs.get(&fp))
                .map(|sub| sub.diff(&truth))
            else {
                continue;
            };
            if diff.is_empty() {
                self.store_truth(&mut inner, conn, &fp, truth, batch);
                continue;
            }

            match queue.push_update(&fp, diff) {
                PushResult::Queued | PushResult::Coalesced => {
                    self.store_truth(&mut inner, conn, &fp, truth, batch);
                }
                PushResult::Overflow => {
                    warn!(conn, sub_id = %fp, "outbound queue saturated, evicting subscription");
                    self.evict(&mut inner, conn, &fp);
                }
            }
        }
    }

    fn store_truth(
        &self,
        inner: &mut Inner,
        conn: ConnectionId,
        fp: &str,
        truth: BTreeMap<RowId, Row>,
        batch: Option<&ChangeBatch>,
    ) {
        if let Some(sub) = inner
            .connections
            .get_mut(&conn)
            .and_then(|s| s.subs.get_mut(fp))
        {
            sub.last = truth;
            if let Some(batch) = batch {
                sub.last_seq = batch.seq;
            }
        }
    }

    fn evict(&self, inner: &mut Inner, conn: ConnectionId, fp: &str) {
        let removed = inner.connections.get_mut(&conn).and_then(|state| {
            state.subs.remove(fp).map(|sub| {
                state.queue.push_evicted(fp);
                sub
            })
        });
        if let Some(sub) = removed {
            let topic = key::change_topic(&sub.namespace, &sub.table);
            self.release_topic(inner, &topic);
        }
    }
}

/// OWNER components restrict visibility to the caller's rows
fn owner_filter(def: &Arc<ComponentDef>, caller: Option<CallerId>) -> Option<CallerId> {
    if def.permission() == Permission::Owner {
        caller
    } else {
        None
    }
}

fn lookup_type(def: &Arc<ComponentDef>, column: &str) -> Result<tessera_core::value::ColumnType> {
    if column == tessera_core::schema::ID_COLUMN {
        return Ok(tessera_core::value::ColumnType::U64);
    }
    def.column(column)
        .map(|c| c.dtype)
        .ok_or_else(|| TesseraError::query(format!("{} has no column {:?}", def.name(), column)))
}
