//! The key-value store contract.

use std::time::Duration;

use async_trait::async_trait;

use crate::error::KvError;
use crate::script::AtomicScript;

/// Remaining lifetime of a key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyTtl {
    /// The key does not exist.
    Missing,
    /// The key exists without an expiry.
    Persistent,
    /// The key expires after the given duration.
    Expires(Duration),
}

impl KeyTtl {
    /// Decodes a Redis `PTTL` reply.
    pub fn from_pttl(millis: i64) -> Self {
        match millis {
            -2 => KeyTtl::Missing,
            -1 => KeyTtl::Persistent,
            ms => KeyTtl::Expires(Duration::from_millis(ms.max(0) as u64)),
        }
    }
}

/// Remote key-value store operations used by the cache, lock, admission and
/// queue layers.
///
/// Implementations must be thread-safe and every single call must be atomic
/// with respect to other calls. Multi-key atomicity is only available through
/// [`KeyValueStore::eval`].
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Reads a string value. `None` means the key is absent.
    async fn get(&self, key: &str) -> Result<Option<String>, KvError>;

    /// Writes a string value, replacing any previous value and TTL.
    ///
    /// `ttl = None` stores the key without expiry.
    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<(), KvError>;

    /// Writes the value only if the key is absent. Returns `true` when written.
    async fn set_nx(&self, key: &str, value: &str, ttl: Duration) -> Result<bool, KvError>;

    /// Deletes a key. Returns `true` if something was deleted.
    async fn delete(&self, key: &str) -> Result<bool, KvError>;

    /// Sets a new TTL on an existing key. Returns `false` if the key is absent.
    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool, KvError>;

    /// Reports the remaining lifetime of a key.
    async fn ttl(&self, key: &str) -> Result<KeyTtl, KvError>;

    /// Atomically increments an integer counter, creating it at zero.
    async fn incr(&self, key: &str) -> Result<i64, KvError>;

    /// Appends values to the tail of a list. Returns the new length.
    async fn list_push(&self, key: &str, values: &[String]) -> Result<usize, KvError>;

    /// Returns the list elements between `start` and `stop` (inclusive,
    /// negative indices count from the tail).
    async fn list_range(&self, key: &str, start: isize, stop: isize)
    -> Result<Vec<String>, KvError>;

    /// Atomically replaces a list with `values` and sets its TTL.
    async fn replace_list(&self, key: &str, values: &[String], ttl: Duration)
    -> Result<(), KvError>;

    /// Pops the head of `source` and appends it to `destination` in one step,
    /// waiting up to `wait` for an element to appear.
    async fn list_move(
        &self,
        source: &str,
        destination: &str,
        wait: Duration,
    ) -> Result<Option<String>, KvError>;

    /// Removes up to `count` occurrences of `value` from a list.
    async fn list_remove(&self, key: &str, count: isize, value: &str) -> Result<usize, KvError>;

    /// Runs an atomic server-side script and returns its integer reply.
    async fn eval(
        &self,
        script: &AtomicScript,
        keys: &[String],
        args: &[String],
    ) -> Result<i64, KvError>;

    /// Returns the name of this backend for logging/debugging.
    fn backend_name(&self) -> &'static str;
}
