//! # tessera-backend
//!
//! Backend adapters and the Table Manager. The `Backend` trait itself lives
//! in `tessera-core`; this crate provides the single-host in-memory
//! implementation, the master/replica read fan-out, the binding of
//! components to concrete keyspaces, and schema install/verify/migrate.

pub mod install;
pub mod memory;
pub mod replica;
pub mod table;

pub use install::{classify, install, SchemaDelta};
pub use memory::MemoryBackend;
pub use replica::ReplicaSet;
pub use table::{TableBinding, TableManager};
