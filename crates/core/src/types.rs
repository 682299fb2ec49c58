//! Core identifier and permission types
//!
//! This module defines the foundational types:
//! - RowId / Version: per-row identity and optimistic-concurrency counter
//! - ClusterId: co-location group tag for System transactions
//! - Namespace: logical database name, validated
//! - Role / Permission: connection privilege and component/System access class

use crate::error::{Result, TesseraError};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Surrogate primary key of a row (filled from the distributed ID source)
pub type RowId = u64;

/// Monotonically increasing per-row version; bumped on every successful mutation
pub type Version = u64;

/// Stable numeric id of a System co-location cluster
pub type ClusterId = u32;

/// Caller identity established by the permission-elevation System
pub type CallerId = u64;

/// Characters that would corrupt the `:`-separated keyspace layout
const FORBIDDEN_NAME_CHARS: &[char] = &[':', '{', '}', '\0'];

/// Validate a namespace, component, or column name
///
/// Names participate in the backend key layout (`N:T:{CLU K}:...`), so they
/// must not be empty and must not contain the separator or tag characters.
pub fn validate_name(kind: &str, name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(TesseraError::query(format!("{} name cannot be empty", kind)));
    }
    if name.contains(FORBIDDEN_NAME_CHARS) {
        return Err(TesseraError::query(format!(
            "{} name {:?} contains a reserved character",
            kind, name
        )));
    }
    Ok(())
}

/// Logical database name
///
/// Multiple namespaces may share one backend; a component name is unique
/// within its namespace.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Namespace(String);

impl Namespace {
    /// Create a validated namespace
    pub fn new(name: impl Into<String>) -> Result<Self> {
        let name = name.into();
        validate_name("namespace", &name)?;
        Ok(Namespace(name))
    }

    /// Borrow the raw name
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Privilege level of a connection
///
/// A connection starts `Anonymous`; the configured permission-elevation
/// System raises it to `User` (or `Admin` for operator tooling).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Role {
    /// No identity established
    Anonymous,
    /// Identity established by the elevation System
    User,
    /// Operator-level access
    Admin,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Anonymous => f.write_str("ANONYMOUS"),
            Role::User => f.write_str("USER"),
            Role::Admin => f.write_str("ADMIN"),
        }
    }
}

/// Access class of a component or System
///
/// `Owner` additionally restricts row visibility to rows whose `owner`
/// column equals the caller identity; that filtering happens in the read
/// paths, not here.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Permission {
    /// Open to unauthenticated connections
    Everybody,
    /// Requires an established identity
    User,
    /// Requires identity; rows visible only to their owner
    Owner,
    /// Operator only
    Admin,
}

impl Permission {
    /// Check whether a connection role satisfies this permission class
    pub fn admits(&self, role: Role) -> bool {
        match self {
            Permission::Everybody => true,
            Permission::User | Permission::Owner => role >= Role::User,
            Permission::Admin => role == Role::Admin,
        }
    }

    /// Wire name of the class, used in `PermissionDenied` payloads
    pub fn as_str(&self) -> &'static str {
        match self {
            Permission::Everybody => "EVERYBODY",
            Permission::User => "USER",
            Permission::Owner => "OWNER",
            Permission::Admin => "ADMIN",
        }
    }
}

/// Persistence policy of a component
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Persistence {
    /// Rows survive process and backend restart
    Persistent,
    /// Rows are wiped at table install time
    Ephemeral,
}
