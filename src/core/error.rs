//! Typed error handling for order creation
//!
//! Every failure the workflow can report falls into one of a small number of
//! categories so callers can react to them specifically rather than matching
//! on message text.
//!
//! # Error Categories
//!
//! - [`ConfigError`]: missing or malformed configuration
//! - [`ValidationError`]: order input rejected before any write
//! - [`StoreError`]: a classified failure reported by the relational store
//! - [`WorkflowError`]: the outcome surfaced by a full workflow run
//!
//! Store failures carry a [`StoreErrorKind`]. Vendor-specific error codes are
//! mapped to that closed set at the storage boundary (see
//! [`classify_mysql_error_number`]); nothing above the storage layer looks at
//! raw codes.
//!
//! # Example
//!
//! ```rust,ignore
//! match workflow.execute(&store).await {
//!     Ok(report) => println!("committed {}", report.order_number),
//!     Err(WorkflowError::Transaction { source, .. }) if source.is_lock_timeout() => {
//!         eprintln!("contention on {}", source);
//!     }
//!     Err(e) => eprintln!("{} ({})", e, e.error_code()),
//! }
//! ```

use crate::workflow::RunReport;
use serde::Serialize;
use std::fmt;
use thiserror::Error;

// =============================================================================
// Store Errors
// =============================================================================

/// Closed classification of store failures
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StoreErrorKind {
    /// The store could not be reached, authenticated against, or the pool is closed
    Connectivity,
    /// A unique index rejected the write (e.g. duplicate order number)
    UniqueViolation,
    /// A foreign key rejected the write
    ForeignKeyViolation,
    /// Any other integrity constraint (NOT NULL, CHECK, type range)
    ConstraintViolation,
    /// The store gave up waiting for a row or table lock
    LockWaitTimeout,
    /// The store chose this transaction as a deadlock victim
    Deadlock,
    /// The transaction or statement exceeded its time budget
    Timeout,
    /// An update targeted a row that does not exist
    NotFound,
    /// Anything not covered above
    Other,
}

impl StoreErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            StoreErrorKind::Connectivity => "connectivity",
            StoreErrorKind::UniqueViolation => "unique_violation",
            StoreErrorKind::ForeignKeyViolation => "foreign_key_violation",
            StoreErrorKind::ConstraintViolation => "constraint_violation",
            StoreErrorKind::LockWaitTimeout => "lock_wait_timeout",
            StoreErrorKind::Deadlock => "deadlock",
            StoreErrorKind::Timeout => "timeout",
            StoreErrorKind::NotFound => "not_found",
            StoreErrorKind::Other => "other",
        }
    }

    /// Whether re-running the whole transaction may succeed
    ///
    /// Only lock contention qualifies; data errors would fail again.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            StoreErrorKind::LockWaitTimeout | StoreErrorKind::Deadlock
        )
    }

    /// Whether this is an integrity constraint rejected by the store
    pub fn is_constraint_violation(&self) -> bool {
        matches!(
            self,
            StoreErrorKind::UniqueViolation
                | StoreErrorKind::ForeignKeyViolation
                | StoreErrorKind::ConstraintViolation
                | StoreErrorKind::LockWaitTimeout
        )
    }
}

impl fmt::Display for StoreErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A classified failure reported by a store backend
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{backend} {kind}: {message}")]
pub struct StoreError {
    pub backend: &'static str,
    pub kind: StoreErrorKind,
    pub message: String,
}

impl StoreError {
    pub fn new(backend: &'static str, kind: StoreErrorKind, message: impl Into<String>) -> Self {
        Self {
            backend,
            kind,
            message: message.into(),
        }
    }

    pub fn connectivity(backend: &'static str, message: impl Into<String>) -> Self {
        Self::new(backend, StoreErrorKind::Connectivity, message)
    }

    pub fn timeout(backend: &'static str, message: impl Into<String>) -> Self {
        Self::new(backend, StoreErrorKind::Timeout, message)
    }

    pub fn is_lock_timeout(&self) -> bool {
        self.kind == StoreErrorKind::LockWaitTimeout
    }

    pub fn is_retryable(&self) -> bool {
        self.kind.is_retryable()
    }

    pub fn error_code(&self) -> &'static str {
        match self.kind {
            StoreErrorKind::Connectivity => "STORE_UNREACHABLE",
            StoreErrorKind::UniqueViolation => "DUPLICATE_KEY",
            StoreErrorKind::ForeignKeyViolation => "FOREIGN_KEY_VIOLATION",
            StoreErrorKind::ConstraintViolation => "CONSTRAINT_VIOLATION",
            StoreErrorKind::LockWaitTimeout => "LOCK_WAIT_TIMEOUT",
            StoreErrorKind::Deadlock => "DEADLOCK",
            StoreErrorKind::Timeout => "TRANSACTION_TIMEOUT",
            StoreErrorKind::NotFound => "ROW_NOT_FOUND",
            StoreErrorKind::Other => "STORE_ERROR",
        }
    }
}

/// Map a MySQL server or client error number to a [`StoreErrorKind`]
///
/// Numbers come from the MySQL error reference (server errors 1000-5000,
/// client errors 2000-2999).
pub fn classify_mysql_error_number(number: u16) -> StoreErrorKind {
    match number {
        // ER_LOCK_WAIT_TIMEOUT
        1205 => StoreErrorKind::LockWaitTimeout,
        // ER_LOCK_DEADLOCK
        1213 => StoreErrorKind::Deadlock,
        // ER_DUP_ENTRY, ER_DUP_KEY, ER_DUP_ENTRY_WITH_KEY_NAME
        1062 | 1022 | 1586 => StoreErrorKind::UniqueViolation,
        // ER_ROW_IS_REFERENCED(_2), ER_NO_REFERENCED_ROW(_2)
        1216 | 1217 | 1451 | 1452 => StoreErrorKind::ForeignKeyViolation,
        // ER_BAD_NULL_ERROR, ER_NO_DEFAULT_FOR_FIELD, ER_WARN_DATA_OUT_OF_RANGE,
        // ER_TRUNCATED_WRONG_VALUE_FOR_FIELD, ER_CHECK_CONSTRAINT_VIOLATED
        1048 | 1364 | 1264 | 1366 | 3819 => StoreErrorKind::ConstraintViolation,
        // ER_QUERY_INTERRUPTED, ER_QUERY_TIMEOUT
        1317 | 3024 => StoreErrorKind::Timeout,
        // ER_DBACCESS_DENIED_ERROR, ER_ACCESS_DENIED_ERROR, ER_BAD_DB_ERROR,
        // ER_CON_COUNT_ERROR, ER_TOO_MANY_USER_CONNECTIONS
        1044 | 1045 | 1049 | 1040 | 1203 => StoreErrorKind::Connectivity,
        // CR_CONNECTION_ERROR, CR_CONN_HOST_ERROR, CR_UNKNOWN_HOST,
        // CR_SERVER_GONE_ERROR, CR_SERVER_LOST
        2002 | 2003 | 2005 | 2006 | 2013 => StoreErrorKind::Connectivity,
        _ => StoreErrorKind::Other,
    }
}

// =============================================================================
// Configuration Errors
// =============================================================================

/// Errors raised while assembling configuration or scenario input
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A required environment variable is absent or empty
    #[error("Missing required configuration variable '{name}'")]
    MissingVariable { name: String },

    /// A variable is present but cannot be parsed
    #[error("Invalid value for '{name}': {message}")]
    InvalidValue { name: String, message: String },

    /// A file could not be read or parsed
    #[error("Failed to load {file}: {message}")]
    ParseError { file: String, message: String },

    /// The variable source itself failed
    #[error("Failed to load configuration: {0}")]
    Load(#[from] ::config::ConfigError),
}

impl ConfigError {
    pub fn error_code(&self) -> &'static str {
        match self {
            ConfigError::MissingVariable { .. } => "CONFIG_MISSING_VARIABLE",
            ConfigError::InvalidValue { .. } => "CONFIG_INVALID_VALUE",
            ConfigError::ParseError { .. } => "CONFIG_PARSE_ERROR",
            ConfigError::Load(_) => "CONFIG_LOAD_ERROR",
        }
    }
}

// =============================================================================
// Validation Errors
// =============================================================================

/// Order input rejected before reaching the store
#[derive(Debug, Error)]
pub enum ValidationError {
    /// Field-level failures reported by `validator`
    #[error("Invalid order input: {0}")]
    Fields(#[from] validator::ValidationErrors),

    /// A rule spanning more than one field
    #[error("Invalid order input: {message}")]
    Rule { message: String },
}

// =============================================================================
// Workflow Errors
// =============================================================================

/// Outcome surfaced by a failed workflow run
#[derive(Debug, Error)]
pub enum WorkflowError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// The store was unreachable before a transaction could begin
    #[error("Store unreachable: {0}")]
    Connectivity(StoreError),

    /// The transaction was rolled back; `report` records signals and cleanup
    #[error("Order {} rolled back after {} attempt(s): {source}", .report.order_number, .report.attempts.len())]
    Transaction {
        source: StoreError,
        report: Box<RunReport>,
    },
}

impl WorkflowError {
    pub fn error_code(&self) -> &'static str {
        match self {
            WorkflowError::Config(e) => e.error_code(),
            WorkflowError::Validation(_) => "VALIDATION_ERROR",
            WorkflowError::Connectivity(_) => "STORE_UNREACHABLE",
            WorkflowError::Transaction { source, .. } => source.error_code(),
        }
    }

    /// The store error underneath, if the failure came from the store
    pub fn store_error(&self) -> Option<&StoreError> {
        match self {
            WorkflowError::Connectivity(e) => Some(e),
            WorkflowError::Transaction { source, .. } => Some(source),
            _ => None,
        }
    }

    /// The run report, if a transaction was attempted
    pub fn report(&self) -> Option<&RunReport> {
        match self {
            WorkflowError::Transaction { report, .. } => Some(report),
            _ => None,
        }
    }
}
