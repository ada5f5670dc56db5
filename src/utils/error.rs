//! Error types for indexer operations.
//!
//! Every fallible path in the crate returns [`IndexerError`]. The dispatcher
//! relies on [`IndexerError::is_contention`] to decide whether a failed write
//! is retried or surfaced.

use std::time::Duration;
use thiserror::Error;

/// SQLSTATE codes Postgres reports when a write lost a lock race.
///
/// `40001` serialization failure, `40P01` deadlock detected,
/// `55P03` lock not available (raised once `lock_timeout` elapses).
const CONTENTION_SQLSTATES: [&str; 3] = ["40001", "40P01", "55P03"];

/// Error type for indexer operations.
#[derive(Debug, Error)]
pub enum IndexerError {
    /// Errors encountered during database operations.
    ///
    /// Wraps `sqlx::Error` via `#[from]` so storage code can use `?` directly.
    /// Whether the failure is retryable is decided by [`IndexerError::is_contention`].
    #[error("Database error: {0}")]
    DatabaseError(#[from] sqlx::Error),

    /// The store reported lock contention without a SQLSTATE.
    #[error("Lock contention: {0}")]
    LockContention(String),

    /// Malformed payload bytes, an unknown output variant, a malformed
    /// credential or an unrecoverable signature.
    ///
    /// Decode failures are permanent: redelivering the same bytes fails the same way.
    #[error("Decoding error: {0}")]
    DecodingError(String),

    /// A write attempt exceeded its wall-clock budget.
    #[error("Write timed out after {budget_ms} ms")]
    WriteTimeout {
        /// Budget that elapsed, in milliseconds.
        budget_ms: u128,
    },

    /// Errors interacting with the node RPC.
    #[error("RPC error: {0}")]
    RpcError(String),

    /// A persisted-data invariant did not hold.
    #[error("Invariant violation: {0}")]
    InvariantViolation(String),

    /// Errors related to configuration.
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Errors from environment variable operations.
    #[error("Environment variable error: {0}")]
    EnvVarError(#[from] std::env::VarError),

    /// Invalid data error
    #[error("Data error: {0}")]
    DataError(String),

    /// Generic errors for operations that don't fit other categories.
    #[error("Internal error: {0}")]
    InternalError(String),
}

/// Type alias for Results using `IndexerError`.
pub type Result<T> = std::result::Result<T, IndexerError>;

impl IndexerError {
    /// Returns `true` when the failure came from competing writers and the
    /// same write is expected to succeed if attempted again.
    ///
    /// | Error                                   | Contention |
    /// |-----------------------------------------|------------|
    /// | `DatabaseError` with SQLSTATE 40001/40P01/55P03 | yes |
    /// | `DatabaseError(PoolTimedOut)`           | yes        |
    /// | `LockContention`                        | yes        |
    /// | `WriteTimeout`                          | no         |
    /// | everything else                         | no         |
    #[must_use]
    pub fn is_contention(&self) -> bool {
        match self {
            IndexerError::LockContention(_) => true,
            IndexerError::DatabaseError(sqlx::Error::PoolTimedOut) => true,
            IndexerError::DatabaseError(sqlx::Error::Database(db_err)) => db_err
                .code()
                .is_some_and(|code| CONTENTION_SQLSTATES.contains(&code.as_ref())),
            _ => false,
        }
    }

    /// Builds the timeout error for an elapsed write budget.
    #[must_use]
    pub fn write_timeout(budget: Duration) -> Self {
        IndexerError::WriteTimeout {
            budget_ms: budget.as_millis(),
        }
    }
}

impl From<serde_json::Error> for IndexerError {
    fn from(err: serde_json::Error) -> Self {
        IndexerError::DecodingError(err.to_string())
    }
}

impl From<hex::FromHexError> for IndexerError {
    fn from(err: hex::FromHexError) -> Self {
        IndexerError::DecodingError(format!("invalid hex: {err}"))
    }
}

impl From<secp256k1::Error> for IndexerError {
    fn from(err: secp256k1::Error) -> Self {
        IndexerError::DecodingError(format!("signature recovery failed: {err}"))
    }
}

impl From<reqwest::Error> for IndexerError {
    fn from(err: reqwest::Error) -> Self {
        IndexerError::RpcError(err.to_string())
    }
}
