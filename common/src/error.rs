//! Error types for SimpleBank ledger operations.

use crate::AccountId;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Kind of persisted entity an error refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Entity {
    Account,
    Entry,
    Transfer,
}

impl fmt::Display for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Entity::Account => "account",
            Entity::Entry => "entry",
            Entity::Transfer => "transfer",
        };
        f.write_str(name)
    }
}

/// Main error type for ledger operations.
#[derive(Error, Debug)]
pub enum LedgerError {
    /// The request was malformed; nothing was sent to the datastore.
    #[error("Invalid argument: {message}")]
    InvalidArgument {
        message: String,
        field: Option<String>,
    },

    /// A referenced account, entry or transfer does not exist.
    #[error("{entity} {id} not found")]
    NotFound { entity: Entity, id: i64 },

    /// The overdraft policy refused the debit.
    #[error("Insufficient funds in account {account_id}: balance {balance}, requested {amount}")]
    InsufficientFunds {
        account_id: AccountId,
        balance: i64,
        amount: i64,
    },

    /// Datastore failure: connectivity, constraint, or commit.
    #[error("Database error in {operation}: {message}")]
    Persistence {
        operation: String,
        message: String,
        /// SQLSTATE code when the datastore reported one.
        code: Option<String>,
    },

    /// The unit of work failed and the rollback failed as well.
    #[error("tx err: {source}, rb err: {rollback}")]
    RollbackFailed {
        source: Box<LedgerError>,
        rollback: Box<LedgerError>,
    },

    /// The caller cancelled the operation.
    #[error("Cancelled during {operation}")]
    Cancelled { operation: String },

    /// The caller's deadline passed.
    #[error("Deadline exceeded during {operation}")]
    DeadlineExceeded { operation: String },

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Configuration(String),
}

/// Coarse error classification consumed by outer layers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    InvalidArgument,
    NotFound,
    Persistence,
    Aborted,
}

impl ErrorKind {
    /// HTTP status class an API layer should answer with.
    pub fn http_status(&self) -> u16 {
        match self {
            ErrorKind::InvalidArgument => 400,
            ErrorKind::NotFound => 404,
            ErrorKind::Persistence => 500,
            ErrorKind::Aborted => 503,
        }
    }
}

/// SQLSTATE codes a caller may reasonably retry on.
const RETRYABLE_SQLSTATES: [&str; 2] = [
    "40001", // serialization_failure
    "40P01", // deadlock_detected
];

/// SQLSTATE class for connection exceptions. Pool timeouts and I/O failures
/// are reported under it as well.
const CONNECTION_EXCEPTION_CLASS: &str = "08";

impl LedgerError {
    /// Shorthand for an invalid argument tied to a request field.
    pub fn invalid(field: impl Into<String>, message: impl Into<String>) -> Self {
        LedgerError::InvalidArgument {
            message: message.into(),
            field: Some(field.into()),
        }
    }

    /// Shorthand for a missing row.
    pub fn not_found(entity: Entity, id: impl Into<i64>) -> Self {
        LedgerError::NotFound {
            entity,
            id: id.into(),
        }
    }

    /// Shorthand for a datastore failure without a SQLSTATE.
    pub fn persistence(operation: impl Into<String>, message: impl Into<String>) -> Self {
        LedgerError::Persistence {
            operation: operation.into(),
            message: message.into(),
            code: None,
        }
    }

    /// Classify the error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            LedgerError::InvalidArgument { .. } | LedgerError::InsufficientFunds { .. } => {
                ErrorKind::InvalidArgument
            }
            LedgerError::NotFound { .. } => ErrorKind::NotFound,
            LedgerError::Persistence { .. }
            | LedgerError::RollbackFailed { .. }
            | LedgerError::Configuration(_) => ErrorKind::Persistence,
            LedgerError::Cancelled { .. } | LedgerError::DeadlineExceeded { .. } => {
                ErrorKind::Aborted
            }
        }
    }

    /// Check if re-issuing the same request may succeed.
    ///
    /// The engine never retries on its own. Transfers carry no idempotency key,
    /// so a retry after an ambiguous failure can apply a transfer twice.
    pub fn is_retryable(&self) -> bool {
        match self {
            LedgerError::Persistence { code: Some(code), .. } => {
                RETRYABLE_SQLSTATES.contains(&code.as_str())
                    || code.starts_with(CONNECTION_EXCEPTION_CLASS)
            }
            LedgerError::DeadlineExceeded { .. } => true,
            _ => false,
        }
    }

    /// Get error code for API responses.
    pub fn error_code(&self) -> &'static str {
        match self {
            LedgerError::InvalidArgument { .. } => "INVALID_ARGUMENT",
            LedgerError::NotFound { .. } => "NOT_FOUND",
            LedgerError::InsufficientFunds { .. } => "INSUFFICIENT_FUNDS",
            LedgerError::Persistence { .. } => "PERSISTENCE_ERROR",
            LedgerError::RollbackFailed { .. } => "ROLLBACK_FAILED",
            LedgerError::Cancelled { .. } => "CANCELLED",
            LedgerError::DeadlineExceeded { .. } => "DEADLINE_EXCEEDED",
            LedgerError::Configuration(_) => "CONFIGURATION_ERROR",
        }
    }
}

/// Result type alias for ledger operations.
pub type Result<T> = std::result::Result<T, LedgerError>;
