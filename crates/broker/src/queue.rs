//! Per-connection outbound queue with coalescing back-pressure
//!
//! Deltas queue in commit order. Past the high-water mark the queue stops
//! growing for a subscription that already has a pending delta: the rows of
//! the new delta fold into the pending one, keeping only the latest state
//! per row. A queue that still overflows reports it, and the broker evicts
//! the subscription; the eviction signal itself is always enqueued, even full.
//!
//! Not every intermediate state is observed; the last state after
//! quiescence always is. That relaxation is what keeps the broker bounded.

use std::collections::VecDeque;
use parking_lot::Mutex;
use tessera_core::row::Row;
use tessera_core::types::RowId;
use tokio::sync::Notify;

/// One pushed message for a subscription
#[derive(Debug, Clone)]
pub enum OutboundItem {
    /// Row deltas; `None` means the row left the subscription (or was deleted)
    Update {
        /// Subscription fingerprint
        sub_id: String,
        /// Per-row latest state
        rows: Vec<(RowId, Option<Row>)>,
    },
    /// The broker dropped the subscription under sustained back-pressure
    Evicted {
        /// Subscription fingerprint
        sub_id: String,
    },
}

/// What happened to a pushed delta
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushResult {
    /// Enqueued as a new item
    Queued,
    /// Folded into a pending delta of the same subscription
    Coalesced,
    /// The queue cannot absorb the delta; the subscription must be evicted
    Overflow,
}

struct QueueState {
    items: VecDeque<OutboundItem>,
    closed: bool,
}

/// Bounded outbound queue of one connection
pub struct OutboundQueue {
    state: Mutex<QueueState>,
    notify: Notify,
    capacity: usize,
    high_water: usize,
}

impl OutboundQueue {
    /// Create a queue with a hard capacity and a coalescing threshold
    pub fn new(capacity: usize, high_water: usize) -> Self {
        OutboundQueue {
            state: Mutex::new(QueueState {
                items: VecDeque::new(),
                closed: false,
            }),
            notify: Notify::new(),
            capacity,
            high_water: high_water.min(capacity),
        }
    }

    /// Push a delta for a subscription
    pub fn push_update(&self, sub_id: &str, rows: Vec<(RowId, Option<Row>)>) -> PushResult {
        let mut state = self.state.lock();
        if state.closed {
            return PushResult::Queued; // dropped silently; connection is gone
        }

        if state.items.len() >= self.high_water {
            // Fold into the newest pending delta of the same subscription.
            let folded = state.items.iter_mut().rev().find_map(|item| match item {
                OutboundItem::Update {
                    sub_id: pending,
                    rows: pending_rows,
                } if pending == sub_id => Some(pending_rows),
                _ => None,
            });
            if let Some(pending_rows) = folded {
                for (id, row) in rows {
                    match pending_rows.iter_mut().find(|(pid, _)| *pid == id) {
                        Some(slot) => slot.1 = row,
                        None => pending_rows.push((id, row)),
                    }
                }
                drop(state);
                self.notify.notify_one();
                return PushResult::Coalesced;
            }
            if state.items.len() >= self.capacity {
                return PushResult::Overflow;
            }
        }

        state.items.push_back(OutboundItem::Update {
            sub_id: sub_id.to_string(),
            rows,
        });
        drop(state);
        self.notify.notify_one();
        PushResult::Queued
    }

    /// Enqueue an eviction signal; always admitted
    pub fn push_evicted(&self, sub_id: &str) {
        let mut state = self.state.lock();
        if state.closed {
            return;
        }
        state.items.push_back(OutboundItem::Evicted {
            sub_id: sub_id.to_string(),
        });
        drop(state);
        self.notify.notify_one();
    }

    /// Await the next item; `None` once the queue is closed and drained
    pub async fn pop(&self) -> Option<OutboundItem> {
        loop {
            {
                let mut state = self.state.lock();
                if let Some(item) = state.items.pop_front() {
                    return Some(item);
                }
                if state.closed {
                    return None;
                }
            }
            self.notify.notified().await;
        }
    }

    /// Non-blocking pop (tests and drain-on-close)
    pub fn try_pop(&self) -> Option<OutboundItem> {
        self.state.lock().items.pop_front()
    }

    /// Current depth
    pub fn len(&self) -> usize {
        self.state.lock().items.len()
    }

    /// Whether the queue holds no items
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Close the queue; pending items remain poppable
    pub fn close(&self) {
        self.state.lock().closed = true;
        self.notify.notify_waiters();
    }
}
