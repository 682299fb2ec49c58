//! Operational limits and their defaults
//!
//! These values back the configuration surface; the server crate exposes
//! them through `WorkerConfig` and passes them down. Changing a default here
//! changes the behavior of every deployment that does not override it.

/// Largest inbound message the dispatch layer will accept, in bytes
pub const MAX_INBOUND_MESSAGE_BYTES: usize = 64 * 1024;

/// Default cap on row subscriptions per connection
pub const DEFAULT_ROW_SUB_BUDGET: usize = 200;

/// Default cap on index (range) subscriptions per connection
pub const DEFAULT_INDEX_SUB_BUDGET: usize = 100;

/// Default wall-clock budget for commit-race retries, in milliseconds
pub const DEFAULT_RETRY_BUDGET_MS: u64 = 1_000;

/// First backoff delay after a commit race, in milliseconds
pub const RETRY_BASE_DELAY_MS: u64 = 2;

/// Per-attempt backoff cap, in milliseconds
pub const RETRY_MAX_DELAY_MS: u64 = 100;

/// Default idle timeout closing connections that send no RPC, in seconds
pub const DEFAULT_IDLE_TIMEOUT_SECS: u64 = 300;

/// Default cap on anonymous connections per client IP
pub const DEFAULT_MAX_ANONYMOUS_PER_IP: usize = 8;

/// Capacity of a connection's outbound queue
pub const OUTBOUND_QUEUE_CAPACITY: usize = 256;

/// Queue depth above which the broker coalesces pending deltas
pub const OUTBOUND_HIGH_WATER: usize = 192;

/// Capacity of each backend change-topic broadcast channel
pub const CHANGE_TOPIC_CAPACITY: usize = 1024;
