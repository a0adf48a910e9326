//! Flash-sale configuration.

use std::time::Duration;

use hotshop_core::VoucherId;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeckillConfig {
    /// Ready list of the order queue. In-flight deliveries live in
    /// `{queue_name}:processing`.
    #[serde(default = "default_queue_name")]
    pub queue_name: String,

    /// Number of concurrent consumer workers.
    #[serde(default = "default_consumer_workers")]
    pub consumer_workers: usize,

    /// How long one receive call blocks waiting for a message.
    #[serde(default = "default_receive_timeout_ms")]
    pub receive_timeout_ms: u64,

    /// Undo the admission reservation when the intent cannot be enqueued.
    #[serde(default = "default_compensate_on_publish_failure")]
    pub compensate_on_publish_failure: bool,

    /// Vouchers whose admission stock is seeded from the system of record at
    /// startup (only where no admission stock exists yet).
    #[serde(default)]
    pub preload_vouchers: Vec<VoucherId>,

    /// Key prefix of the order id counters.
    #[serde(default = "default_id_prefix")]
    pub id_prefix: String,
}

fn default_queue_name() -> String {
    "stream.orders".to_string()
}

fn default_consumer_workers() -> usize {
    1
}

fn default_receive_timeout_ms() -> u64 {
    2_000
}

fn default_compensate_on_publish_failure() -> bool {
    true
}

fn default_id_prefix() -> String {
    "order".to_string()
}

impl Default for SeckillConfig {
    fn default() -> Self {
        Self {
            queue_name: default_queue_name(),
            consumer_workers: default_consumer_workers(),
            receive_timeout_ms: default_receive_timeout_ms(),
            compensate_on_publish_failure: default_compensate_on_publish_failure(),
            preload_vouchers: Vec::new(),
            id_prefix: default_id_prefix(),
        }
    }
}

impl SeckillConfig {
    pub fn receive_timeout(&self) -> Duration {
        Duration::from_millis(self.receive_timeout_ms)
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.queue_name.trim().is_empty() {
            return Err("seckill.queue_name must not be empty".into());
        }
        if self.consumer_workers == 0 {
            return Err("seckill.consumer_workers must be greater than 0".into());
        }
        if self.receive_timeout_ms == 0 {
            return Err("seckill.receive_timeout_ms must be greater than 0".into());
        }
        if self.id_prefix.trim().is_empty() || self.id_prefix.contains(':') {
            return Err("seckill.id_prefix must be non-empty and must not contain ':'".into());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = SeckillConfig::default();
        assert_eq!(config.queue_name, "stream.orders");
        assert!(config.compensate_on_publish_failure);
        assert_eq!(config.receive_timeout(), Duration::from_secs(2));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_deserialize_uses_defaults() {
        let config: SeckillConfig =
            serde_json::from_str(r#"{"consumer_workers": 4, "preload_vouchers": [10, 11]}"#)
                .unwrap();
        assert_eq!(config.consumer_workers, 4);
        assert_eq!(config.preload_vouchers, vec![10, 11]);
        assert_eq!(config.id_prefix, "order");
    }

    #[test]
    fn test_validate_rejects_zero_workers() {
        let config = SeckillConfig {
            consumer_workers: 0,
            ..Default::default()
        };
        assert!(config.validate().unwrap_err().contains("consumer_workers"));
    }
}
