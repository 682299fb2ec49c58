//! # tessera-server
//!
//! The per-client connection layer and the worker assembly: wire message
//! dispatch, rate and subscription budgets, idle timeouts, anonymous per-IP
//! admission, and the configuration surface.

pub mod config;
pub mod connection;
pub mod protocol;
pub mod rate;
pub mod worker;

pub use config::{BackendEndpoints, ReplicaEndpoint, WorkerConfig, CONFIG_FILE_NAME};
pub use connection::{ConnectionSession, ConnectionStats};
pub use protocol::{ClientMessage, ServerMessage};
pub use rate::RateBudget;
pub use worker::{elevation_system, Worker};
