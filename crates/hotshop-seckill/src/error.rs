//! Flash-sale error types.
//!
//! Out-of-stock and duplicate purchases are not errors; they are reported as
//! [`crate::Rejection`] values. Everything here is an infrastructure failure.

use hotshop_core::{CoreError, OrderId};
use hotshop_kv::KvError;
use hotshop_storage::StorageError;

/// Message shown to purchasers for any infrastructure failure.
pub const RETRY_LATER_MESSAGE: &str = "The service is busy, please try again later";

/// Errors raised by the order queue.
#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error(transparent)]
    Store(#[from] KvError),

    /// A delivery body could not be decoded into a purchase intent.
    #[error("Malformed queue message {payload:?}: {source}")]
    Malformed {
        payload: String,
        #[source]
        source: CoreError,
    },
}

impl QueueError {
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Store(e) => e.is_retryable(),
            Self::Malformed { .. } => false,
        }
    }
}

/// Errors raised by admission, the producer and the consumer.
#[derive(Debug, thiserror::Error)]
pub enum SeckillError {
    /// The admission state could not be read or written.
    #[error("Admission store error: {0}")]
    Store(#[from] KvError),

    /// The purchase was admitted but its intent could not be enqueued.
    #[error("Failed to publish order {order_id}: {source}")]
    Publish {
        order_id: OrderId,
        #[source]
        source: QueueError,
    },

    #[error(transparent)]
    Queue(#[from] QueueError),

    #[error("Order persistence failed: {0}")]
    Storage(#[from] StorageError),

    #[error("Invalid seckill configuration: {0}")]
    Config(String),
}

impl SeckillError {
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Store(e) => e.is_retryable(),
            Self::Publish { source, .. } | Self::Queue(source) => source.is_retryable(),
            Self::Storage(e) => e.is_retryable(),
            Self::Config(_) => false,
        }
    }

    /// The purchaser-facing message. Details stay in the logs.
    pub fn user_message(&self) -> &'static str {
        RETRY_LATER_MESSAGE
    }
}

pub type Result<T> = std::result::Result<T, SeckillError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_follows_source() {
        assert!(SeckillError::from(KvError::connection("refused")).is_retryable());
        assert!(!SeckillError::from(KvError::command("ERR")).is_retryable());

        let publish = SeckillError::Publish {
            order_id: 7,
            source: QueueError::Store(KvError::connection("reset")),
        };
        assert!(publish.is_retryable());
        assert!(publish.to_string().contains("order 7"));

        let storage = SeckillError::from(StorageError::connection_error("down"));
        assert!(storage.is_retryable());
        assert!(!SeckillError::from(StorageError::internal("bug")).is_retryable());
    }

    #[test]
    fn test_user_message_hides_details() {
        let err = SeckillError::from(KvError::connection("10.0.0.3:6379 refused"));
        assert_eq!(err.user_message(), RETRY_LATER_MESSAGE);
        assert!(!err.user_message().contains("6379"));
    }

    #[test]
    fn test_malformed_is_not_retryable() {
        let source = hotshop_core::PurchaseIntent::from_json("{oops").unwrap_err();
        let err = QueueError::Malformed {
            payload: "{oops".into(),
            source,
        };
        assert!(!err.is_retryable());
    }
}
