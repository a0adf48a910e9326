//! PostgreSQL failures and their mapping onto [`StorageError`].

use hotshop_storage::StorageError;
use sqlx_core::error::Error as SqlxError;

/// SQLSTATE `unique_violation`.
pub const UNIQUE_VIOLATION: &str = "23505";

/// SQLSTATE `check_violation`, raised by the `stock >= 0` constraint.
pub const CHECK_VIOLATION: &str = "23514";

/// SQLSTATE `serialization_failure`.
pub const SERIALIZATION_FAILURE: &str = "40001";

/// SQLSTATE `deadlock_detected`.
pub const DEADLOCK_DETECTED: &str = "40P01";

/// Conflicts the server resolves by aborting one side; rerunning the
/// transaction can succeed.
fn is_transient_sqlstate(code: &str) -> bool {
    matches!(code, SERIALIZATION_FAILURE | DEADLOCK_DETECTED)
}

fn sqlstate(err: &SqlxError) -> Option<String> {
    match err {
        SqlxError::Database(db) => db.code().map(|code| code.into_owned()),
        _ => None,
    }
}

/// True when the database rejected an insert on a unique index.
pub fn is_unique_violation(err: &SqlxError) -> bool {
    sqlstate(err).as_deref() == Some(UNIQUE_VIOLATION)
}

/// Classifies a driver error. Transport and pool failures, serialization
/// failures and deadlocks are transient; constraint failures are bad data;
/// everything else is internal.
pub(crate) fn storage_error(err: SqlxError) -> StorageError {
    let transient = matches!(
        err,
        SqlxError::Io(_)
            | SqlxError::Tls(_)
            | SqlxError::PoolTimedOut
            | SqlxError::PoolClosed
            | SqlxError::WorkerCrashed
    );
    if transient {
        return StorageError::connection_error(err.to_string());
    }
    match sqlstate(&err).as_deref() {
        Some(code) if is_transient_sqlstate(code) => StorageError::connection_error(err.to_string()),
        Some(CHECK_VIOLATION) => StorageError::invalid_data(err.to_string()),
        _ => StorageError::internal(err.to_string()),
    }
}

#[derive(Debug, thiserror::Error)]
pub enum PostgresError {
    #[error("postgres: {0}")]
    Sqlx(#[from] SqlxError),

    #[error("schema migration failed: {0}")]
    Migration(String),

    #[error("invalid postgres settings: {0}")]
    Config(String),
}

impl PostgresError {
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }
}

impl From<PostgresError> for StorageError {
    fn from(err: PostgresError) -> Self {
        match err {
            PostgresError::Sqlx(e) => storage_error(e),
            other => StorageError::internal(other.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, PostgresError>;
