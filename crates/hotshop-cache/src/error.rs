//! Cache error types.

use std::time::Duration;

use hotshop_kv::KvError;

/// Boxed error returned by cache loaders.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Errors surfaced by [`crate::CacheClient`] reads and writes.
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    /// The key-value store failed.
    #[error(transparent)]
    Store(#[from] KvError),

    /// A cached payload could not be encoded or decoded.
    #[error("Cache serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The loader consulting the system of record failed.
    #[error("Cache loader failed: {0}")]
    Loader(#[source] BoxError),

    /// A mutex-guarded miss waited too long for another caller's fill.
    #[error("Timed out after {waited:?} waiting for cache fill of {key}")]
    LockWaitTimeout { key: String, waited: Duration },
}

impl CacheError {
    pub fn loader(err: impl Into<BoxError>) -> Self {
        Self::Loader(err.into())
    }

    /// Transient infrastructure failure; the caller may retry the read.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Store(e) => e.is_retryable(),
            Self::LockWaitTimeout { .. } => true,
            Self::Serialization(_) | Self::Loader(_) => false,
        }
    }
}

pub type CacheResult<T> = Result<T, CacheError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        assert!(CacheError::Store(KvError::connection("down")).is_retryable());
        assert!(!CacheError::Store(KvError::command("bad")).is_retryable());
        assert!(!CacheError::loader("db gone").is_retryable());
        let timeout = CacheError::LockWaitTimeout {
            key: "cache:shop:1".into(),
            waited: Duration::from_secs(1),
        };
        assert!(timeout.is_retryable());
        assert!(timeout.to_string().contains("cache:shop:1"));
    }
}
