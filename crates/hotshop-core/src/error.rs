use std::fmt::Display;

use thiserror::Error;

/// Errors raised by the domain model itself.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Identifiers are positive; zero and negatives are rejected.
    #[error("{0} is not a valid identifier")]
    InvalidId(String),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error("{entity} {id} not found")]
    NotFound { entity: String, id: String },

    #[error("{message}")]
    InvalidData { message: String },

    #[error("{0} is unavailable")]
    Unavailable(String),
}

impl CoreError {
    pub fn invalid_id(id: impl Display) -> Self {
        Self::InvalidId(id.to_string())
    }

    pub fn not_found(entity: impl Into<String>, id: impl Display) -> Self {
        Self::NotFound {
            entity: entity.into(),
            id: id.to_string(),
        }
    }

    pub fn invalid_data(message: impl Into<String>) -> Self {
        Self::InvalidData {
            message: message.into(),
        }
    }

    pub fn unavailable(what: impl Into<String>) -> Self {
        Self::Unavailable(what.into())
    }

    /// The caller sent something that will never be accepted as is.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            Self::InvalidId(_) | Self::NotFound { .. } | Self::InvalidData { .. }
        )
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Unavailable(_))
    }
}

pub type Result<T> = std::result::Result<T, CoreError>;
