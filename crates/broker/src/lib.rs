//! # tessera-broker
//!
//! The subscription plane: per-connection directories of row and range
//! subscriptions kept coherent against committed mutations, with at-most-once
//! delivery per change and coalescing back-pressure.

pub mod broker;
pub mod fingerprint;
pub mod queue;
pub mod subscription;

pub use broker::{SubscribeOutcome, SubscriptionBroker};
pub use queue::{OutboundItem, OutboundQueue, PushResult};
pub use subscription::{ConnectionId, Subscription, SubscriptionQuery};
