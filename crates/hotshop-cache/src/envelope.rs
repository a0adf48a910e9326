use std::time::Duration;

use hotshop_core::now_unix_millis;
use serde::{Deserialize, Serialize};

/// Payload wrapper stored by the logical-expiry strategy.
///
/// The store keeps the entry without a TTL; staleness is judged only by
/// `expire_at` (Unix milliseconds).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogicalExpiryEnvelope<T> {
    pub expire_at: i64,
    pub data: T,
}

impl<T> LogicalExpiryEnvelope<T> {
    /// Wraps `data` so that it turns stale `ttl` from now.
    pub fn new(data: T, ttl: Duration) -> Self {
        let ttl_ms = i64::try_from(ttl.as_millis()).unwrap_or(i64::MAX);
        Self {
            expire_at: now_unix_millis().saturating_add(ttl_ms),
            data,
        }
    }

    pub fn is_expired_at(&self, now_millis: i64) -> bool {
        self.expire_at <= now_millis
    }

    pub fn is_expired(&self) -> bool {
        self.is_expired_at(now_unix_millis())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wire_format() {
        let envelope = LogicalExpiryEnvelope {
            expire_at: 1_700_000_000_000,
            data: serde_json::json!({"id": 1}),
        };
        let raw = serde_json::to_string(&envelope).unwrap();
        assert_eq!(raw, r#"{"expireAt":1700000000000,"data":{"id":1}}"#);
    }

    #[test]
    fn test_expiry() {
        let fresh = LogicalExpiryEnvelope::new("x", Duration::from_secs(60));
        assert!(!fresh.is_expired());
        assert!(fresh.is_expired_at(fresh.expire_at));

        let stale = LogicalExpiryEnvelope::new("x", Duration::ZERO);
        assert!(stale.is_expired());
    }

    #[test]
    fn test_expiry_readable_without_payload_type() {
        let raw = r#"{"expireAt":1,"data":{"nested":[1,2,3]}}"#;
        let envelope: LogicalExpiryEnvelope<serde::de::IgnoredAny> =
            serde_json::from_str(raw).unwrap();
        assert!(envelope.is_expired());
    }
}
