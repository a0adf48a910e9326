//! Key-value store error types.

/// Errors that can occur while talking to the key-value store.
#[derive(Debug, thiserror::Error)]
pub enum KvError {
    /// The store could not be reached (pool exhausted, I/O failure, timeout).
    #[error("Store connection error: {0}")]
    Connection(String),

    /// The store rejected a command.
    #[error("Store command error: {0}")]
    Command(String),

    /// The key holds a value of a different type than the command expects.
    #[error("Wrong value type at key {key}")]
    WrongType { key: String },

    /// An atomic script failed.
    #[error("Script {name} failed: {message}")]
    Script { name: String, message: String },

    /// Store configuration is invalid.
    #[error("Store configuration error: {0}")]
    Config(String),
}

impl KvError {
    pub fn connection(message: impl Into<String>) -> Self {
        Self::Connection(message.into())
    }

    pub fn command(message: impl Into<String>) -> Self {
        Self::Command(message.into())
    }

    pub fn wrong_type(key: impl Into<String>) -> Self {
        Self::WrongType { key: key.into() }
    }

    pub fn script(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Script {
            name: name.into(),
            message: message.into(),
        }
    }

    /// Transient unavailability; safe to retry idempotent operations.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Connection(_))
    }
}

impl From<redis::RedisError> for KvError {
    fn from(e: redis::RedisError) -> Self {
        if e.is_io_error() || e.is_connection_dropped() || e.is_timeout() {
            KvError::Connection(e.to_string())
        } else {
            KvError::Command(e.to_string())
        }
    }
}

impl From<deadpool_redis::PoolError> for KvError {
    fn from(e: deadpool_redis::PoolError) -> Self {
        KvError::Connection(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        assert!(KvError::connection("refused").is_retryable());
        assert!(!KvError::command("ERR syntax").is_retryable());
        assert!(!KvError::wrong_type("k").is_retryable());
        assert_eq!(
            KvError::script("unlock", "boom").to_string(),
            "Script unlock failed: boom"
        );
    }
}
