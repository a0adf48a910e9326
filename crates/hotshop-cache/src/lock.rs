//! Distributed mutual exclusion over the key-value store.
//!
//! A lock is a single store entry `lock:{name}` whose value is the owner
//! token of the holder. Acquisition is one `SET NX PX`; release is one
//! atomic script that deletes the entry only when the stored token matches,
//! so a holder whose lock already expired can never delete its successor's
//! entry. Entries always carry a TTL, which frees locks of crashed holders.

use std::sync::LazyLock;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use hotshop_kv::script::arg;
use hotshop_kv::{
    AtomicScript, DynKvStore, KvError, LocalKeyspace, RetryPolicy, retry_idempotent,
};
use uuid::Uuid;

use crate::metrics;

/// Prefix of every lock key.
pub const LOCK_PREFIX: &str = "lock:";

static PROCESS_ID: LazyLock<String> = LazyLock::new(|| Uuid::new_v4().simple().to_string());
static NEXT_TOKEN: AtomicU64 = AtomicU64::new(1);

const RELEASE_LUA: &str = r"
local current = redis.call('GET', KEYS[1])
if not current then
    return 0
end
if current == ARGV[1] then
    redis.call('DEL', KEYS[1])
    return 1
end
return 2
";

fn release_local(ks: &mut LocalKeyspace, keys: &[String], args: &[String]) -> Result<i64, KvError> {
    let key = arg("lock_release", keys, 0)?;
    let token = arg("lock_release", args, 0)?;
    match ks.get_string(key)? {
        None => Ok(0),
        Some(current) if current == token => {
            ks.delete(key);
            Ok(1)
        }
        Some(_) => Ok(2),
    }
}

static RELEASE_SCRIPT: LazyLock<AtomicScript> =
    LazyLock::new(|| AtomicScript::new("lock_release", RELEASE_LUA, release_local));

/// Result of a release attempt. None of these is an error: under TTL races
/// a lock may legitimately be gone or owned by someone else.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReleaseOutcome {
    Released,
    /// The entry no longer exists (expired or never acquired).
    NotHeld,
    /// The entry is held by a different owner and was left in place.
    NotOwner,
    /// The store could not be reached; the entry will expire on its own.
    Failed(String),
}

impl ReleaseOutcome {
    fn from_code(code: i64) -> Self {
        match code {
            1 => ReleaseOutcome::Released,
            0 => ReleaseOutcome::NotHeld,
            2 => ReleaseOutcome::NotOwner,
            other => ReleaseOutcome::Failed(format!("unexpected release reply {other}")),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ReleaseOutcome::Released => "released",
            ReleaseOutcome::NotHeld => "not_held",
            ReleaseOutcome::NotOwner => "not_owner",
            ReleaseOutcome::Failed(_) => "failed",
        }
    }

    pub fn is_released(&self) -> bool {
        matches!(self, ReleaseOutcome::Released)
    }
}

/// Proof of a granted acquisition, needed to release the lock.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockHandle {
    name: String,
    token: String,
}

impl LockHandle {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn token(&self) -> &str {
        &self.token
    }
}

/// Owner-verified lock over a shared key-value store.
#[derive(Clone)]
pub struct DistributedLock {
    store: DynKvStore,
    retry: RetryPolicy,
}

impl DistributedLock {
    pub fn new(store: DynKvStore) -> Self {
        Self {
            store,
            retry: RetryPolicy::default(),
        }
    }

    #[must_use]
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Store key of the lock called `name`.
    pub fn key_for(name: &str) -> String {
        format!("{LOCK_PREFIX}{name}")
    }

    fn next_token() -> String {
        let seq = NEXT_TOKEN.fetch_add(1, Ordering::Relaxed);
        format!("{}-{seq}", *PROCESS_ID)
    }

    /// Attempts to take the lock without waiting.
    ///
    /// Returns `Ok(None)` when another owner holds it. Transient store errors
    /// are retried before being returned.
    pub async fn try_acquire(
        &self,
        name: &str,
        ttl: Duration,
    ) -> Result<Option<LockHandle>, KvError> {
        let key = Self::key_for(name);
        let token = Self::next_token();
        let store = &self.store;
        let granted = retry_idempotent(&self.retry, "lock_acquire", || {
            store.set_nx(&key, &token, ttl)
        })
        .await?;

        metrics::record_lock_acquire(granted);
        if granted {
            tracing::debug!(lock = %key, token = %token, ttl_ms = ttl.as_millis() as u64, "lock acquired");
            Ok(Some(LockHandle {
                name: name.to_string(),
                token,
            }))
        } else {
            tracing::debug!(lock = %key, "lock busy");
            Ok(None)
        }
    }

    /// Releases a lock acquired through [`DistributedLock::try_acquire`].
    pub async fn release(&self, handle: &LockHandle) -> ReleaseOutcome {
        self.release_token(&handle.name, &handle.token).await
    }

    /// Releases the lock `name` on behalf of the owner identified by `token`.
    pub async fn release_token(&self, name: &str, token: &str) -> ReleaseOutcome {
        let key = Self::key_for(name);
        let outcome = match self
            .store
            .eval(&RELEASE_SCRIPT, &[key.clone()], &[token.to_string()])
            .await
        {
            Ok(code) => ReleaseOutcome::from_code(code),
            Err(e) => ReleaseOutcome::Failed(e.to_string()),
        };

        metrics::record_lock_release(outcome.as_str());
        match &outcome {
            ReleaseOutcome::Released => tracing::debug!(lock = %key, "lock released"),
            ReleaseOutcome::NotHeld => {
                tracing::warn!(lock = %key, "lock expired before release")
            }
            ReleaseOutcome::NotOwner => {
                tracing::warn!(lock = %key, token = %token, "lock held by another owner, left in place")
            }
            ReleaseOutcome::Failed(message) => {
                tracing::warn!(lock = %key, error = %message, "lock release failed, relying on expiry")
            }
        }
        outcome
    }
}

impl std::fmt::Debug for DistributedLock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DistributedLock")
            .field("backend", &self.store.backend_name())
            .field("retry", &self.retry)
            .finish()
    }
}
