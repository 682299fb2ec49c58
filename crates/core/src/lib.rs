//! # tessera-core
//!
//! Shared contract types of the Tessera ECS database: scalar values and
//! column types, component schemas, rows, the backend keyspace layout,
//! commit bundles, the backend capability trait, and the unified error
//! taxonomy.
//!
//! Everything here is either immutable after startup (schemas) or a value
//! passed between subsystems (rows, bundles, errors). No I/O happens in
//! this crate.

pub mod bundle;
pub mod error;
pub mod key;
pub mod limits;
pub mod row;
pub mod schema;
pub mod traits;
pub mod types;
pub mod value;

pub use bundle::{
    ChangeBatch, ChangeKind, CommitBundle, CommitOutcome, IndexEntry, Mutation, Precondition,
    RowChange,
};
pub use error::{Result, TesseraError};
pub use row::Row;
pub use schema::{ColumnDef, ComponentDef, ID_COLUMN, OWNER_COLUMN, VERSION_COLUMN};
pub use traits::{AtomicIds, Backend, IdAllocator, RangeBound, RangeQuery};
pub use types::{CallerId, ClusterId, Namespace, Permission, Persistence, Role, RowId, Version};
pub use value::{ColumnType, Value};
