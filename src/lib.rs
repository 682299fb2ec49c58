//! # TesseraDB
//!
//! A distributed game-server data engine organized as an Entity-Component-
//! System database: typed component tables over a key-value + ordered-index
//! backend, transactional server-side Systems with optimistic concurrency,
//! and a realtime subscription plane.
//!
//! # Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use tesseradb::{
//!     CatalogBuilder, ColumnDef, ColumnType, ComponentDef, MemoryBackend,
//!     Namespace, Permission, Persistence, SystemContext, SystemDef, Value,
//!     Worker, WorkerConfig,
//! };
//!
//! # async fn run() -> tesseradb::Result<()> {
//! let ns = Namespace::new("game")?;
//!
//! // Declare a component table
//! let hp = ComponentDef::new(
//!     ns.clone(),
//!     "HP",
//!     vec![
//!         ColumnDef::new("owner", ColumnType::I64).unique(),
//!         ColumnDef::new("value", ColumnType::I32),
//!     ],
//!     Permission::Owner,
//!     Persistence::Persistent,
//!     "main",
//! )?;
//!
//! // Declare a System running transactionally against it
//! let use_hp = SystemDef::new(
//!     ns.clone(),
//!     "use_hp",
//!     Permission::User,
//!     Arc::new(|ctx: &mut SystemContext, args| {
//!         let caller = ctx.caller().unwrap_or(0) as i64;
//!         let amount = args[0].as_i64().unwrap_or(1);
//!         if let Some(mut row) = ctx.get("HP", &Value::Int(caller), "owner")? {
//!             let hp = row.get_int("value").unwrap_or(0);
//!             row.set("value", Value::Int(hp - amount))?;
//!             ctx.update(row)?;
//!         }
//!         Ok(None)
//!     }),
//! )?
//! .with_components(["HP"]);
//!
//! // Assemble a worker over the single-host backend
//! let builder = CatalogBuilder::new().component(hp)?.system(use_hp)?;
//! let worker = Worker::start(
//!     WorkerConfig::default(),
//!     builder,
//!     &ns,
//!     MemoryBackend::new(),
//!     Arc::new(tesseradb::AtomicIds::default()),
//! )?;
//!
//! // The external pipeline feeds decoded messages in
//! let conn = worker.connect("203.0.113.7", ns.clone())?;
//! let replies = worker
//!     .handle_message(conn, &serde_json::json!(["rpc", "elevate", 42]))
//!     .await?;
//! # let _ = replies;
//! # Ok(())
//! # }
//! ```
//!
//! # Architecture
//!
//! | Crate | Responsibility |
//! |-------|----------------|
//! | `tessera-core` | values, schemas, rows, key layout, commit bundles, errors |
//! | `tessera-catalog` | component/System registries, cluster planner, frozen catalog |
//! | `tessera-backend` | backend adapters, table bindings, schema install/migrate |
//! | `tessera-session` | per-RPC identity map, commit planning, execution context |
//! | `tessera-executor` | RPC dispatch, permission checks, race retry |
//! | `tessera-broker` | row/range subscriptions, delta diffing, back-pressure |
//! | `tessera-server` | connection sessions, wire dispatch, budgets, configuration |
//!
//! The wire framing pipeline, the CLI entry point, and client SDKs are
//! external collaborators; this crate's surface starts at decoded messages.

pub use tessera_backend::{MemoryBackend, ReplicaSet, TableBinding, TableManager};
pub use tessera_broker::{OutboundItem, SubscriptionBroker};
pub use tessera_catalog::{Catalog, CatalogBuilder, SystemDef};
pub use tessera_core::{
    AtomicIds, Backend, ChangeKind, ColumnDef, ColumnType, ComponentDef, IdAllocator, Namespace,
    Permission, Persistence, Result, Role, Row, RowId, TesseraError, Value,
};
pub use tessera_executor::{CallOutcome, RetryPolicy, SystemExecutor};
pub use tessera_server::{
    ClientMessage, ServerMessage, Worker, WorkerConfig, CONFIG_FILE_NAME,
};
pub use tessera_session::{CommitReceipt, Session, SystemContext, SystemHandler};
