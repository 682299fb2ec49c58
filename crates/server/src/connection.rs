//! Per-client connection state
//!
//! A connection starts anonymous. The configured elevation System assigns it
//! an identity and the USER role; at that moment the anonymous receive
//! budget is discarded and the USER budget takes over. The connection also
//! owns its subscription handles (through the broker) and its outbound
//! queue, and tracks the idle deadline that closes silent links.

use crate::config::WorkerConfig;
use crate::rate::RateBudget;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tessera_broker::{ConnectionId, OutboundQueue};
use tessera_core::error::Result;
use tessera_core::types::{CallerId, Namespace, Role};
use tessera_session::Elevation;

/// Per-connection counters surfaced in the access log
#[derive(Debug, Default, Clone, Copy)]
pub struct ConnectionStats {
    /// RPCs dispatched
    pub rpcs: u64,
    /// Subscription deltas pushed
    pub pushed: u64,
    /// Subscriptions evicted under back-pressure
    pub evictions: u64,
}

/// State of one client link
pub struct ConnectionSession {
    id: ConnectionId,
    peer_ip: String,
    namespace: Namespace,
    role: Role,
    caller: Option<CallerId>,
    recv_budget: RateBudget,
    send_budget: RateBudget,
    idle_window: Duration,
    idle_deadline: Instant,
    queue: Arc<OutboundQueue>,
    stats: ConnectionStats,
}

impl ConnectionSession {
    /// State for a fresh (anonymous) connection
    pub fn new(
        id: ConnectionId,
        peer_ip: impl Into<String>,
        namespace: Namespace,
        config: &WorkerConfig,
        queue: Arc<OutboundQueue>,
    ) -> Self {
        let idle_window = Duration::from_secs(config.idle_timeout_secs);
        ConnectionSession {
            id,
            peer_ip: peer_ip.into(),
            namespace,
            role: Role::Anonymous,
            caller: None,
            recv_budget: RateBudget::new(&config.anonymous_recv_budget),
            send_budget: RateBudget::new(&config.send_budget),
            idle_window,
            idle_deadline: Instant::now() + idle_window,
            queue,
            stats: ConnectionStats::default(),
        }
    }

    /// Connection id
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Remote address (admission accounting)
    pub fn peer_ip(&self) -> &str {
        &self.peer_ip
    }

    /// Namespace this connection operates in
    pub fn namespace(&self) -> &Namespace {
        &self.namespace
    }

    /// Current role
    pub fn role(&self) -> Role {
        self.role
    }

    /// Established identity, if elevated
    pub fn caller(&self) -> Option<CallerId> {
        self.caller
    }

    /// Outbound queue
    pub fn queue(&self) -> &Arc<OutboundQueue> {
        &self.queue
    }

    /// Counters
    pub fn stats(&self) -> ConnectionStats {
        self.stats
    }

    /// Admit an inbound message against the receive budget
    pub fn admit_recv(&mut self, now: Instant) -> Result<()> {
        self.recv_budget.admit(now)
    }

    /// Admit an outbound push against the send budget
    pub fn admit_send(&mut self, now: Instant) -> Result<()> {
        self.send_budget.admit(now)
    }

    /// Reset the idle deadline (called on every RPC)
    pub fn touch(&mut self, now: Instant) {
        self.idle_deadline = now + self.idle_window;
        self.stats.rpcs += 1;
    }

    /// Whether the idle timeout has elapsed
    pub fn is_idle(&self, now: Instant) -> bool {
        now >= self.idle_deadline
    }

    /// Count a pushed delta
    pub fn record_push(&mut self) {
        self.stats.pushed += 1;
    }

    /// Count an evicted subscription
    pub fn record_eviction(&mut self) {
        self.stats.evictions += 1;
    }

    /// Apply an elevation granted by the built-in System
    ///
    /// The identity is recorded and the connection is promoted to the USER
    /// receive budget mid-stream; the anonymous windows are discarded.
    pub fn apply_elevation(&mut self, elevation: Elevation, config: &WorkerConfig) {
        self.caller = Some(elevation.caller);
        self.role = elevation.role;
        self.recv_budget = RateBudget::new(&config.recv_budget);
    }
}
