//! Randomized expiry for cache entries.

use std::time::Duration;

use rand::Rng;

use crate::config::CacheConfig;

/// Jitter applied to every non-logical entry so that entries written together
/// do not expire together.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TtlPolicy {
    null_base: Duration,
    null_jitter: (Duration, Duration),
    value_jitter: (Duration, Duration),
}

impl TtlPolicy {
    pub fn new(
        null_base: Duration,
        null_jitter: (Duration, Duration),
        value_jitter: (Duration, Duration),
    ) -> Self {
        Self {
            null_base,
            null_jitter: ordered(null_jitter),
            value_jitter: ordered(value_jitter),
        }
    }

    pub fn from_config(config: &CacheConfig) -> Self {
        Self::new(
            Duration::from_secs(config.null_ttl_secs),
            (
                Duration::from_secs(config.null_jitter_min_secs),
                Duration::from_secs(config.null_jitter_max_secs),
            ),
            (
                Duration::from_secs(config.value_jitter_min_secs),
                Duration::from_secs(config.value_jitter_max_secs),
            ),
        )
    }

    /// TTL of a negative entry, within `[null_base + min, null_base + max]`.
    pub fn null_ttl(&self) -> Duration {
        self.null_base + jitter(self.null_jitter)
    }

    /// TTL of a positive entry, within `[base + min, base + max]`.
    pub fn value_ttl(&self, base: Duration) -> Duration {
        base + jitter(self.value_jitter)
    }

    /// Inclusive bounds of [`TtlPolicy::null_ttl`].
    pub fn null_ttl_bounds(&self) -> (Duration, Duration) {
        (
            self.null_base + self.null_jitter.0,
            self.null_base + self.null_jitter.1,
        )
    }

    /// Inclusive bounds of [`TtlPolicy::value_ttl`] for `base`.
    pub fn value_ttl_bounds(&self, base: Duration) -> (Duration, Duration) {
        (base + self.value_jitter.0, base + self.value_jitter.1)
    }
}

impl Default for TtlPolicy {
    fn default() -> Self {
        Self::from_config(&CacheConfig::default())
    }
}

fn ordered((a, b): (Duration, Duration)) -> (Duration, Duration) {
    if a <= b { (a, b) } else { (b, a) }
}

fn jitter((min, max): (Duration, Duration)) -> Duration {
    let min = min.as_millis() as u64;
    let max = max.as_millis() as u64;
    Duration::from_millis(rand::thread_rng().gen_range(min..=max))
}

/// Random delay in `[min, max]`, used between mutex polls.
pub fn backoff(min: Duration, max: Duration) -> Duration {
    jitter(ordered((min, max)))
}
