//! # tessera-catalog
//!
//! Startup-time registries: component definitions, System declarations, and
//! the cluster planner that co-locates Systems sharing components. The
//! product is an immutable [`Catalog`] threaded into each worker.

pub mod builder;
pub mod cluster;
pub mod registry;
pub mod system;

pub use builder::{Catalog, CatalogBuilder};
pub use cluster::ClusterPlan;
pub use registry::ComponentRegistry;
pub use system::SystemDef;
