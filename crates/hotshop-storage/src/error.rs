use std::fmt;

use hotshop_core::CoreError;

/// Failure of a system-of-record operation.
///
/// Only [`StorageError::ConnectionError`] is transient; the order consumer
/// requeues on it and discards on everything else.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("{entity} {id} does not exist")]
    NotFound { entity: String, id: String },

    /// A unique index rejected the write.
    #[error("{entity} {id} already exists")]
    AlreadyExists { entity: String, id: String },

    #[error("rejected by the store: {message}")]
    InvalidData { message: String },

    #[error("transaction failed: {message}")]
    TransactionError { message: String },

    #[error("store unreachable: {message}")]
    ConnectionError { message: String },

    #[error("storage failure: {message}")]
    Internal { message: String },
}

impl StorageError {
    pub fn not_found(entity: impl Into<String>, id: impl ToString) -> Self {
        Self::NotFound {
            entity: entity.into(),
            id: id.to_string(),
        }
    }

    pub fn already_exists(entity: impl Into<String>, id: impl ToString) -> Self {
        Self::AlreadyExists {
            entity: entity.into(),
            id: id.to_string(),
        }
    }

    pub fn invalid_data(message: impl Into<String>) -> Self {
        Self::InvalidData {
            message: message.into(),
        }
    }

    pub fn transaction_error(message: impl Into<String>) -> Self {
        Self::TransactionError {
            message: message.into(),
        }
    }

    pub fn connection_error(message: impl Into<String>) -> Self {
        Self::ConnectionError {
            message: message.into(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    pub fn is_already_exists(&self) -> bool {
        matches!(self, Self::AlreadyExists { .. })
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::ConnectionError { .. })
    }

    /// Coarse kind, used as a log field.
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::NotFound { .. } => ErrorCategory::NotFound,
            Self::AlreadyExists { .. } => ErrorCategory::Conflict,
            Self::InvalidData { .. } => ErrorCategory::Validation,
            Self::TransactionError { .. } => ErrorCategory::Transaction,
            Self::ConnectionError { .. } => ErrorCategory::Infrastructure,
            Self::Internal { .. } => ErrorCategory::Internal,
        }
    }
}

impl From<CoreError> for StorageError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::NotFound { entity, id } => Self::NotFound { entity, id },
            CoreError::Unavailable(message) => Self::ConnectionError { message },
            CoreError::Json(e) => Self::internal(e.to_string()),
            invalid => Self::invalid_data(invalid.to_string()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    NotFound,
    Conflict,
    Validation,
    Transaction,
    Infrastructure,
    Internal,
}

impl ErrorCategory {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::NotFound => "not_found",
            Self::Conflict => "conflict",
            Self::Validation => "validation",
            Self::Transaction => "transaction",
            Self::Infrastructure => "infrastructure",
            Self::Internal => "internal",
        }
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
