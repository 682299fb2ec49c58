//! Error types for the Tessera database
//!
//! This module defines the unified error type for all Tessera APIs.
//! We use `thiserror` for automatic `Display` and `Error` trait implementations.
//!
//! ## Error Taxonomy
//!
//! - **Transient**: commit-time races below the retry budget; retried silently
//!   by the executor and never surfaced to clients.
//! - **Logic**: bad requests or domain failures (`UniqueViolation`,
//!   `LogicError`, `NotSubscribable`, `QueryError`, `PermissionDenied`);
//!   returned to the client verbatim, never retried.
//! - **Fatal**: configuration/schema failures surfaced at startup
//!   (`SchemaMismatch`, `SchemaConflict`, `CrossBackendCluster`); the worker
//!   refuses to serve.
//! - **Resource**: budget exhaustion the client can react to
//!   (`SubscriptionBudget`, `RaceExhausted`, `SubscriptionEvicted`,
//!   `RateLimited`).
//!
//! ### Usage
//!
//! ```ignore
//! match session.commit() {
//!     Err(e) if e.is_transient() => {
//!         // Discard the session and retry the System invocation
//!     }
//!     Err(e) if e.is_logic() => {
//!         // Forward the structured code to the client
//!     }
//!     Err(e) => return Err(e),
//!     Ok(receipt) => { /* success */ }
//! }
//! ```

use thiserror::Error;

/// Result type alias for Tessera operations
pub type Result<T> = std::result::Result<T, TesseraError>;

/// Unified error type for all Tessera operations
///
/// Every error that can cross a subsystem boundary is a variant here, so the
/// executor and the connection dispatch can classify failures without
/// downcasting.
#[derive(Debug, Error)]
pub enum TesseraError {
    // =========================================================================
    // Transient Errors
    // =========================================================================
    /// An optimistic precondition failed at commit
    ///
    /// The Session observed a row version that changed before the commit was
    /// applied. The executor discards the Session and retries; this variant
    /// never reaches a client.
    #[error("commit race on {key}")]
    Race {
        /// Row key whose precondition failed
        key: String,
    },

    // =========================================================================
    // Logic Errors
    // =========================================================================
    /// A `unique` column would admit two live rows with the same value
    #[error("unique violation on {table}.{column}")]
    UniqueViolation {
        /// Component name
        table: String,
        /// Violating column
        column: String,
    },

    /// User logic performed an operation the Session forbids
    ///
    /// Example: re-inserting a row deleted earlier in the same Session.
    #[error("logic error: {message}")]
    LogicError {
        /// What the logic did wrong
        message: String,
    },

    /// A subscription targeted a column without an index
    #[error("column {table}.{column} is not subscribable")]
    NotSubscribable {
        /// Component name
        table: String,
        /// Non-indexed column
        column: String,
    },

    /// A query carried a malformed or out-of-type argument
    #[error("query error: {message}")]
    QueryError {
        /// What was wrong with the query
        message: String,
    },

    /// The connection's permission class does not admit the operation
    #[error("permission denied: {name} requires {required}")]
    PermissionDenied {
        /// System or component name
        name: String,
        /// Permission class that would be required
        required: String,
    },

    /// No System with the requested name exists in the namespace
    #[error("unknown system: {name}")]
    UnknownSystem {
        /// Requested System name
        name: String,
    },

    // =========================================================================
    // Fatal Errors (startup)
    // =========================================================================
    /// The persisted schema of a component is incompatible with the registered one
    #[error("schema mismatch on {table}: {reason}")]
    SchemaMismatch {
        /// Component name
        table: String,
        /// Field-level description of the incompatibility
        reason: String,
    },

    /// A component was registered twice with differing definitions
    #[error("schema conflict: component {table} already registered with a different definition")]
    SchemaConflict {
        /// Component name
        table: String,
    },

    /// A System cluster spans components bound to different backends
    #[error("cross-backend cluster: {detail}")]
    CrossBackendCluster {
        /// Names of the components that straddle backends
        detail: String,
    },

    // =========================================================================
    // Resource Errors
    // =========================================================================
    /// The connection exhausted its subscription budget
    #[error("subscription budget exceeded: {kind} limit {limit}")]
    SubscriptionBudget {
        /// "row" or "index"
        kind: String,
        /// Configured maximum
        limit: usize,
    },

    /// Commit races persisted beyond the wall-clock retry budget
    #[error("race retry budget exhausted for {system} after {retries} attempts")]
    RaceExhausted {
        /// System whose invocation kept racing
        system: String,
        /// Number of attempts made
        retries: u32,
    },

    /// The broker dropped a subscription whose outbound queue would not drain
    #[error("subscription evicted: {fingerprint}")]
    SubscriptionEvicted {
        /// Fingerprint of the evicted subscription
        fingerprint: String,
    },

    /// An inbound rate budget window rejected the message
    #[error("rate limited: {max} messages per {window_secs}s exceeded")]
    RateLimited {
        /// Window capacity
        max: u32,
        /// Window length in seconds
        window_secs: u64,
    },

    /// A handshake exceeded the anonymous-connections-per-IP cap
    #[error("connection budget exceeded: {limit} anonymous connections per IP")]
    ConnectionBudget {
        /// Configured cap
        limit: usize,
    },

    // =========================================================================
    // Infrastructure Errors
    // =========================================================================
    /// Backend transport or storage failure
    #[error("backend error: {message}")]
    Backend {
        /// Error message
        message: String,
        /// Optional underlying error
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Failed to serialize or deserialize data
    #[error("serialization error: {message}")]
    Serialization {
        /// What went wrong
        message: String,
    },

    /// Unexpected internal state; indicates a bug
    #[error("internal error: {message}")]
    Internal {
        /// Error message
        message: String,
    },
}

impl TesseraError {
    // =========================================================================
    // Constructors
    // =========================================================================

    /// Create a `Race` error for a row key
    pub fn race(key: impl Into<String>) -> Self {
        TesseraError::Race { key: key.into() }
    }

    /// Create a `UniqueViolation` error
    pub fn unique_violation(table: impl Into<String>, column: impl Into<String>) -> Self {
        TesseraError::UniqueViolation {
            table: table.into(),
            column: column.into(),
        }
    }

    /// Create a `LogicError`
    pub fn logic(message: impl Into<String>) -> Self {
        TesseraError::LogicError {
            message: message.into(),
        }
    }

    /// Create a `NotSubscribable` error
    pub fn not_subscribable(table: impl Into<String>, column: impl Into<String>) -> Self {
        TesseraError::NotSubscribable {
            table: table.into(),
            column: column.into(),
        }
    }

    /// Create a `QueryError`
    pub fn query(message: impl Into<String>) -> Self {
        TesseraError::QueryError {
            message: message.into(),
        }
    }

    /// Create a `PermissionDenied` error
    pub fn permission_denied(name: impl Into<String>, required: impl Into<String>) -> Self {
        TesseraError::PermissionDenied {
            name: name.into(),
            required: required.into(),
        }
    }

    /// Create an `UnknownSystem` error
    pub fn unknown_system(name: impl Into<String>) -> Self {
        TesseraError::UnknownSystem { name: name.into() }
    }

    /// Create a `SchemaMismatch` error
    pub fn schema_mismatch(table: impl Into<String>, reason: impl Into<String>) -> Self {
        TesseraError::SchemaMismatch {
            table: table.into(),
            reason: reason.into(),
        }
    }

    /// Create a `Backend` error
    pub fn backend(message: impl Into<String>) -> Self {
        TesseraError::Backend {
            message: message.into(),
            source: None,
        }
    }

    /// Create a `Backend` error with an underlying source
    pub fn backend_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        TesseraError::Backend {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Create a `Serialization` error
    pub fn serialization(message: impl Into<String>) -> Self {
        TesseraError::Serialization {
            message: message.into(),
        }
    }

    /// Create an `Internal` error
    pub fn internal(message: impl Into<String>) -> Self {
        TesseraError::Internal {
            message: message.into(),
        }
    }

    // =========================================================================
    // Classification
    // =========================================================================

    /// True for errors the executor retries transparently
    pub fn is_transient(&self) -> bool {
        matches!(self, TesseraError::Race { .. })
    }

    /// True for errors returned to the client verbatim and never retried
    pub fn is_logic(&self) -> bool {
        matches!(
            self,
            TesseraError::UniqueViolation { .. }
                | TesseraError::LogicError { .. }
                | TesseraError::NotSubscribable { .. }
                | TesseraError::QueryError { .. }
                | TesseraError::PermissionDenied { .. }
                | TesseraError::UnknownSystem { .. }
        )
    }

    /// True for startup failures after which the worker refuses to serve
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            TesseraError::SchemaMismatch { .. }
                | TesseraError::SchemaConflict { .. }
                | TesseraError::CrossBackendCluster { .. }
        )
    }

    /// True for budget exhaustion the client can react to
    pub fn is_resource(&self) -> bool {
        matches!(
            self,
            TesseraError::SubscriptionBudget { .. }
                | TesseraError::RaceExhausted { .. }
                | TesseraError::SubscriptionEvicted { .. }
                | TesseraError::RateLimited { .. }
                | TesseraError::ConnectionBudget { .. }
        )
    }

    /// Stable code string used in the wire response envelope
    pub fn code(&self) -> &'static str {
        match self {
            TesseraError::Race { .. } => "Race",
            TesseraError::UniqueViolation { .. } => "UniqueViolation",
            TesseraError::LogicError { .. } => "LogicError",
            TesseraError::NotSubscribable { .. } => "NotSubscribable",
            TesseraError::QueryError { .. } => "QueryError",
            TesseraError::PermissionDenied { .. } => "PermissionDenied",
            TesseraError::UnknownSystem { .. } => "UnknownSystem",
            TesseraError::SchemaMismatch { .. } => "SchemaMismatch",
            TesseraError::SchemaConflict { .. } => "SchemaConflict",
            TesseraError::CrossBackendCluster { .. } => "CrossBackendCluster",
            TesseraError::SubscriptionBudget { .. } => "SubscriptionBudget",
            TesseraError::RaceExhausted { .. } => "RaceExhausted",
            TesseraError::SubscriptionEvicted { .. } => "SubscriptionEvicted",
            TesseraError::RateLimited { .. } => "RateLimited",
            TesseraError::ConnectionBudget { .. } => "ConnectionBudget",
            TesseraError::Backend { .. } => "Backend",
            TesseraError::Serialization { .. } => "Serialization",
            TesseraError::Internal { .. } => "Internal",
        }
    }
}

impl From<serde_json::Error> for TesseraError {
    fn from(e: serde_json::Error) -> Self {
        TesseraError::Serialization {
            message: format!("JSON error: {}", e),
        }
    }
}
