//! Cache configuration.

use std::time::Duration;

use hotshop_kv::RetryPolicy;
use serde::{Deserialize, Serialize};

/// Breakdown protection used by [`crate::CacheClient::get`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheStrategy {
    /// Negative caching only.
    PassThrough,
    /// Negative caching plus a per-key lock around the fill.
    #[default]
    Mutex,
    /// Entries never expire in the store; stale reads trigger a background refresh.
    LogicalExpire,
}

impl CacheStrategy {
    pub fn as_str(self) -> &'static str {
        match self {
            CacheStrategy::PassThrough => "pass_through",
            CacheStrategy::Mutex => "mutex",
            CacheStrategy::LogicalExpire => "logical_expire",
        }
    }
}

impl std::fmt::Display for CacheStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Cache client configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheConfig {
    #[serde(default)]
    pub strategy: CacheStrategy,

    /// Base TTL for negative ("not found") entries.
    #[serde(default = "default_null_ttl_secs")]
    pub null_ttl_secs: u64,
    #[serde(default = "default_null_jitter_min_secs")]
    pub null_jitter_min_secs: u64,
    #[serde(default = "default_null_jitter_max_secs")]
    pub null_jitter_max_secs: u64,

    /// Jitter added on top of the caller-supplied TTL of positive entries.
    #[serde(default = "default_value_jitter_min_secs")]
    pub value_jitter_min_secs: u64,
    #[serde(default = "default_value_jitter_max_secs")]
    pub value_jitter_max_secs: u64,

    /// TTL of the per-key fill/refresh lock.
    #[serde(default = "default_lock_ttl_secs")]
    pub lock_ttl_secs: u64,
    #[serde(default = "default_lock_backoff_min_ms")]
    pub lock_backoff_min_ms: u64,
    #[serde(default = "default_lock_backoff_max_ms")]
    pub lock_backoff_max_ms: u64,
    /// Ceiling on how long a mutex loser keeps polling before giving up.
    #[serde(default = "default_mutex_wait_ms")]
    pub mutex_wait_ms: u64,

    #[serde(default)]
    pub refresher: RefresherConfig,

    #[serde(default)]
    pub retry: RetryPolicy,
}

fn default_null_ttl_secs() -> u64 {
    120
}

fn default_null_jitter_min_secs() -> u64 {
    20
}

fn default_null_jitter_max_secs() -> u64 {
    50
}

fn default_value_jitter_min_secs() -> u64 {
    60
}

fn default_value_jitter_max_secs() -> u64 {
    300
}

fn default_lock_ttl_secs() -> u64 {
    10
}

fn default_lock_backoff_min_ms() -> u64 {
    30
}

fn default_lock_backoff_max_ms() -> u64 {
    50
}

fn default_mutex_wait_ms() -> u64 {
    10_000
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            strategy: CacheStrategy::default(),
            null_ttl_secs: default_null_ttl_secs(),
            null_jitter_min_secs: default_null_jitter_min_secs(),
            null_jitter_max_secs: default_null_jitter_max_secs(),
            value_jitter_min_secs: default_value_jitter_min_secs(),
            value_jitter_max_secs: default_value_jitter_max_secs(),
            lock_ttl_secs: default_lock_ttl_secs(),
            lock_backoff_min_ms: default_lock_backoff_min_ms(),
            lock_backoff_max_ms: default_lock_backoff_max_ms(),
            mutex_wait_ms: default_mutex_wait_ms(),
            refresher: RefresherConfig::default(),
            retry: RetryPolicy::default(),
        }
    }
}

impl CacheConfig {
    pub fn lock_ttl(&self) -> Duration {
        Duration::from_secs(self.lock_ttl_secs)
    }

    pub fn mutex_wait(&self) -> Duration {
        Duration::from_millis(self.mutex_wait_ms)
    }

    /// Checks value ranges.
    pub fn validate(&self) -> Result<(), String> {
        if self.null_jitter_min_secs > self.null_jitter_max_secs {
            return Err("cache.null_jitter_min_secs must not exceed null_jitter_max_secs".into());
        }
        if self.value_jitter_min_secs > self.value_jitter_max_secs {
            return Err("cache.value_jitter_min_secs must not exceed value_jitter_max_secs".into());
        }
        if self.lock_backoff_min_ms > self.lock_backoff_max_ms {
            return Err("cache.lock_backoff_min_ms must not exceed lock_backoff_max_ms".into());
        }
        if self.lock_ttl_secs == 0 {
            return Err("cache.lock_ttl_secs must be greater than 0".into());
        }
        // Waiters must outlast a crashed holder's lock.
        if self.mutex_wait() < self.lock_ttl() {
            return Err(format!(
                "cache.mutex_wait_ms ({}) must be at least cache.lock_ttl_secs ({}) in milliseconds",
                self.mutex_wait_ms, self.lock_ttl_secs
            ));
        }
        self.refresher.validate()
    }
}

/// Sizing of the background refresh pool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefresherConfig {
    #[serde(default = "default_core_workers")]
    pub core_workers: usize,
    #[serde(default = "default_max_workers")]
    pub max_workers: usize,
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
    /// Idle time after which a worker above `core_workers` exits.
    #[serde(default = "default_keep_alive_secs")]
    pub keep_alive_secs: u64,
}

fn default_core_workers() -> usize {
    4
}

fn default_max_workers() -> usize {
    8
}

fn default_queue_capacity() -> usize {
    100
}

fn default_keep_alive_secs() -> u64 {
    60
}

impl Default for RefresherConfig {
    fn default() -> Self {
        Self {
            core_workers: default_core_workers(),
            max_workers: default_max_workers(),
            queue_capacity: default_queue_capacity(),
            keep_alive_secs: default_keep_alive_secs(),
        }
    }
}

impl RefresherConfig {
    pub fn keep_alive(&self) -> Duration {
        Duration::from_secs(self.keep_alive_secs)
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.core_workers == 0 {
            return Err("cache.refresher.core_workers must be greater than 0".into());
        }
        if self.core_workers > self.max_workers {
            return Err("cache.refresher.core_workers must not exceed max_workers".into());
        }
        if self.queue_capacity == 0 {
            return Err("cache.refresher.queue_capacity must be greater than 0".into());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = CacheConfig::default();
        assert_eq!(config.strategy, CacheStrategy::Mutex);
        assert_eq!(config.refresher.core_workers, 4);
        assert_eq!(config.refresher.max_workers, 8);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_rejects_inverted_jitter() {
        let config = CacheConfig {
            null_jitter_min_secs: 60,
            null_jitter_max_secs: 10,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_wait_shorter_than_lock_ttl() {
        let config = CacheConfig {
            lock_ttl_secs: 10,
            mutex_wait_ms: 9_999,
            ..Default::default()
        };
        assert!(config.validate().unwrap_err().contains("mutex_wait_ms"));

        let config = CacheConfig {
            lock_ttl_secs: 10,
            mutex_wait_ms: 10_000,
            ..Default::default()
        };
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_rejects_core_above_max() {
        let config = CacheConfig {
            refresher: RefresherConfig {
                core_workers: 9,
                ..Default::default()
            },
            ..Default::default()
        };
        assert!(config.validate().unwrap_err().contains("core_workers"));
    }

    #[test]
    fn test_strategy_deserializes_snake_case() {
        let strategy: CacheStrategy = serde_json::from_str("\"logical_expire\"").unwrap();
        assert_eq!(strategy, CacheStrategy::LogicalExpire);
        assert_eq!(strategy.to_string(), "logical_expire");
    }
}
