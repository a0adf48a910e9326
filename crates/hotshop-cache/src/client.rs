//! Read-through cache client.
//!
//! Every read goes to the key-value store first and falls back to a
//! caller-supplied loader on miss. Three strategies protect the system of
//! record:
//!
//! - **Pass-through**: misses for ids that do not exist are cached as an
//!   empty marker with a short TTL, so repeated lookups of unknown ids stop
//!   reaching the loader.
//! - **Mutex**: on top of negative caching, only the holder of the per-key
//!   lock runs the loader; everyone else polls the cache until it is filled.
//! - **Logical expiry**: entries are stored without a TTL inside an envelope
//!   carrying their own expiry. Stale entries are served immediately while a
//!   single background refresh rewrites them.
//!
//! Positive and negative TTLs are jittered so that entries written together
//! do not expire together.

use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use hotshop_kv::{DynKvStore, RetryPolicy, retry_idempotent};
use serde::Serialize;
use serde::de::{DeserializeOwned, IgnoredAny};

use crate::config::{CacheConfig, CacheStrategy};
use crate::envelope::LogicalExpiryEnvelope;
use crate::error::{BoxError, CacheError, CacheResult};
use crate::lock::{DistributedLock, LockHandle};
use crate::metrics;
use crate::refresher::RefreshPool;
use crate::ttl::{TtlPolicy, backoff};

/// Marker stored for ids the system of record does not know.
const NULL_MARKER: &str = "";

enum Lookup<T> {
    Hit(T),
    Negative,
    Miss,
}

/// Cache client bound to one key-value store and one refresh pool.
pub struct CacheClient {
    store: DynKvStore,
    lock: DistributedLock,
    ttl: TtlPolicy,
    refresher: Arc<RefreshPool>,
    config: CacheConfig,
}

impl CacheClient {
    /// Creates a client and starts its refresh pool. Must be called within a
    /// Tokio runtime.
    pub fn new(store: DynKvStore, config: CacheConfig) -> Self {
        let lock = DistributedLock::new(store.clone()).with_retry(config.retry);
        let refresher = Arc::new(RefreshPool::new(config.refresher.clone()));
        Self {
            ttl: TtlPolicy::from_config(&config),
            store,
            lock,
            refresher,
            config,
        }
    }

    pub fn strategy(&self) -> CacheStrategy {
        self.config.strategy
    }

    pub fn ttl_policy(&self) -> &TtlPolicy {
        &self.ttl
    }

    pub fn lock(&self) -> &DistributedLock {
        &self.lock
    }

    pub fn refresher(&self) -> &RefreshPool {
        &self.refresher
    }

    /// Reads `key` with the configured strategy.
    ///
    /// `ttl` is the base lifetime of a positive entry; with logical expiry
    /// it is the embedded lifetime instead.
    pub async fn get<T, F, Fut, E>(&self, key: &str, ttl: Duration, loader: F) -> CacheResult<Option<T>>
    where
        T: Serialize + DeserializeOwned + Send + Sync + 'static,
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<Option<T>, E>> + Send + 'static,
        E: Into<BoxError> + Send + 'static,
    {
        match self.config.strategy {
            CacheStrategy::PassThrough => self.query_with_pass_through(key, ttl, loader).await,
            CacheStrategy::Mutex => self.query_with_mutex(key, ttl, loader).await,
            CacheStrategy::LogicalExpire => self.query_with_logical_expire(key, ttl, loader).await,
        }
    }

    /// Writes `value` with a jittered TTL.
    pub async fn set<T: Serialize>(&self, key: &str, value: &T, ttl: Duration) -> CacheResult<()> {
        let payload = serde_json::to_string(value)?;
        self.store
            .set(key, &payload, Some(self.ttl.value_ttl(ttl)))
            .await?;
        Ok(())
    }

    /// Writes `value` as a logical-expiry entry, e.g. to pre-warm a hot key.
    pub async fn set_with_logical_expire<T: Serialize>(
        &self,
        key: &str,
        value: &T,
        ttl: Duration,
    ) -> CacheResult<()> {
        write_envelope(&self.store, key, value, ttl).await
    }

    /// Drops the cached entry for `key`. Returns `true` if one existed.
    pub async fn invalidate(&self, key: &str) -> CacheResult<bool> {
        let removed = self.store.delete(key).await?;
        tracing::debug!(key = %key, removed, "cache invalidated");
        Ok(removed)
    }

    /// Pass-through read with negative caching.
    pub async fn query_with_pass_through<T, F, Fut, E>(
        &self,
        key: &str,
        ttl: Duration,
        loader: F,
    ) -> CacheResult<Option<T>>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Option<T>, E>>,
        E: Into<BoxError>,
    {
        const STRATEGY: &str = "pass_through";
        match self.lookup(key, STRATEGY).await? {
            Lookup::Hit(value) => return Ok(Some(value)),
            Lookup::Negative => return Ok(None),
            Lookup::Miss => {}
        }
        self.load_and_fill(key, ttl, loader, STRATEGY).await
    }

    /// Mutex-guarded read: one loader call per key and fill.
    ///
    /// Callers that lose the lock poll the cache with a randomized backoff
    /// until the winner has filled it, giving up after `mutex_wait_ms`.
    /// A loader error reaches the caller that ran it, after the lock has
    /// been released.
    pub async fn query_with_mutex<T, F, Fut, E>(
        &self,
        key: &str,
        ttl: Duration,
        loader: F,
    ) -> CacheResult<Option<T>>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Option<T>, E>>,
        E: Into<BoxError>,
    {
        const STRATEGY: &str = "mutex";
        let started = Instant::now();
        let wait_ceiling = self.config.mutex_wait();
        let backoff_min = Duration::from_millis(self.config.lock_backoff_min_ms);
        let backoff_max = Duration::from_millis(self.config.lock_backoff_max_ms);

        loop {
            match self.lookup(key, STRATEGY).await? {
                Lookup::Hit(value) => return Ok(Some(value)),
                Lookup::Negative => return Ok(None),
                Lookup::Miss => {}
            }

            if let Some(handle) = self.lock.try_acquire(key, self.config.lock_ttl()).await? {
                let result = self.fill_under_lock(key, ttl, loader).await;
                self.lock.release(&handle).await;
                return result;
            }

            let waited = started.elapsed();
            if waited >= wait_ceiling {
                tracing::warn!(key = %key, waited_ms = waited.as_millis() as u64, "gave up waiting for cache fill");
                return Err(CacheError::LockWaitTimeout {
                    key: key.to_string(),
                    waited,
                });
            }
            tokio::time::sleep(backoff(backoff_min, backoff_max)).await;
        }
    }

    async fn fill_under_lock<T, F, Fut, E>(
        &self,
        key: &str,
        ttl: Duration,
        loader: F,
    ) -> CacheResult<Option<T>>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Option<T>, E>>,
        E: Into<BoxError>,
    {
        // Another holder may have filled the key between our miss and our grant.
        match self.lookup(key, "mutex").await? {
            Lookup::Hit(value) => Ok(Some(value)),
            Lookup::Negative => Ok(None),
            Lookup::Miss => self.load_and_fill(key, ttl, loader, "mutex").await,
        }
    }

    /// Logical-expiry read.
    ///
    /// Absent keys return `None` without consulting the loader, so hot keys
    /// must be pre-warmed with [`CacheClient::set_with_logical_expire`]. A
    /// stale entry is returned as is; at most one caller wins the refresh
    /// lock and hands the loader to the refresh pool.
    pub async fn query_with_logical_expire<T, F, Fut, E>(
        &self,
        key: &str,
        ttl: Duration,
        loader: F,
    ) -> CacheResult<Option<T>>
    where
        T: Serialize + DeserializeOwned + Send + Sync + 'static,
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<Option<T>, E>> + Send + 'static,
        E: Into<BoxError> + Send + 'static,
    {
        const STRATEGY: &str = "logical_expire";
        let Some(raw) = self.read(key).await? else {
            metrics::record_cache_miss(STRATEGY);
            tracing::debug!(key = %key, "logical cache miss, key not warmed");
            return Ok(None);
        };
        if raw == NULL_MARKER {
            metrics::record_cache_hit(STRATEGY, "negative");
            return Ok(None);
        }

        let envelope: LogicalExpiryEnvelope<T> = serde_json::from_str(&raw)?;
        if !envelope.is_expired() {
            metrics::record_cache_hit(STRATEGY, "value");
            return Ok(Some(envelope.data));
        }

        metrics::record_cache_hit(STRATEGY, "stale");
        match self.lock.try_acquire(key, self.config.lock_ttl()).await {
            Ok(Some(handle)) => self.schedule_refresh(key, ttl, loader, handle).await,
            Ok(None) => tracing::debug!(key = %key, "refresh already in progress"),
            Err(e) => tracing::warn!(key = %key, error = %e, "could not acquire refresh lock"),
        }
        Ok(Some(envelope.data))
    }

    async fn schedule_refresh<T, F, Fut, E>(
        &self,
        key: &str,
        ttl: Duration,
        loader: F,
        handle: LockHandle,
    ) where
        T: Serialize + Send + Sync + 'static,
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<Option<T>, E>> + Send + 'static,
        E: Into<BoxError> + Send + 'static,
    {
        let store = self.store.clone();
        let lock = self.lock.clone();
        let retry = self.config.retry;
        let task_key = key.to_string();
        let task_handle = handle.clone();
        let task = async move {
            match refresh_entry(&store, &retry, &task_key, ttl, loader).await {
                Ok(outcome) => {
                    tracing::debug!(key = %task_key, outcome, "logical cache refresh finished")
                }
                Err(e) => {
                    tracing::error!(key = %task_key, error = %e, "logical cache refresh failed, keeping stale entry")
                }
            }
            lock.release(&task_handle).await;
        };

        if let Err(e) = self.refresher.submit(task) {
            tracing::warn!(key = %key, error = %e, "refresh not scheduled");
            self.lock.release(&handle).await;
        }
    }

    /// Reads a cached list, loading and caching it on miss.
    ///
    /// An empty load is returned but not cached.
    pub async fn get_list<T, F, Fut, E>(
        &self,
        key: &str,
        ttl: Duration,
        loader: F,
    ) -> CacheResult<Vec<T>>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Vec<T>, E>>,
        E: Into<BoxError>,
    {
        const STRATEGY: &str = "list";
        let store = &self.store;
        let cached = retry_idempotent(&self.config.retry, "list_range", || {
            store.list_range(key, 0, -1)
        })
        .await?;
        if !cached.is_empty() {
            metrics::record_cache_hit(STRATEGY, "value");
            return cached
                .iter()
                .map(|item| serde_json::from_str(item).map_err(CacheError::from))
                .collect();
        }

        metrics::record_cache_miss(STRATEGY);
        let loaded = loader().await.map_err(CacheError::loader)?;
        if loaded.is_empty() {
            return Ok(loaded);
        }
        let encoded = loaded
            .iter()
            .map(serde_json::to_string)
            .collect::<Result<Vec<_>, _>>()?;
        self.store
            .replace_list(key, &encoded, self.ttl.value_ttl(ttl))
            .await?;
        metrics::record_cache_fill(STRATEGY, "value");
        Ok(loaded)
    }

    /// Stops the refresh pool after running queued refreshes.
    pub async fn shutdown(&self) {
        self.refresher.shutdown().await;
    }

    async fn read(&self, key: &str) -> CacheResult<Option<String>> {
        let store = &self.store;
        Ok(retry_idempotent(&self.config.retry, "cache_get", || store.get(key)).await?)
    }

    async fn lookup<T: DeserializeOwned>(
        &self,
        key: &str,
        strategy: &'static str,
    ) -> CacheResult<Lookup<T>> {
        match self.read(key).await? {
            Some(raw) if raw == NULL_MARKER => {
                metrics::record_cache_hit(strategy, "negative");
                tracing::debug!(key = %key, "negative cache hit");
                Ok(Lookup::Negative)
            }
            Some(raw) => {
                metrics::record_cache_hit(strategy, "value");
                Ok(Lookup::Hit(serde_json::from_str(&raw)?))
            }
            None => {
                metrics::record_cache_miss(strategy);
                Ok(Lookup::Miss)
            }
        }
    }

    async fn load_and_fill<T, F, Fut, E>(
        &self,
        key: &str,
        ttl: Duration,
        loader: F,
        strategy: &'static str,
    ) -> CacheResult<Option<T>>
    where
        T: Serialize,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Option<T>, E>>,
        E: Into<BoxError>,
    {
        let loaded = loader().await.map_err(CacheError::loader)?;
        match &loaded {
            Some(value) => {
                let payload = serde_json::to_string(value)?;
                let ttl = self.ttl.value_ttl(ttl);
                self.store.set(key, &payload, Some(ttl)).await?;
                metrics::record_cache_fill(strategy, "value");
                tracing::debug!(key = %key, ttl_secs = ttl.as_secs(), "cache filled");
            }
            None => {
                let ttl = self.ttl.null_ttl();
                self.store.set(key, NULL_MARKER, Some(ttl)).await?;
                metrics::record_cache_fill(strategy, "negative");
                tracing::debug!(key = %key, ttl_secs = ttl.as_secs(), "negative entry cached");
            }
        }
        Ok(loaded)
    }
}

impl std::fmt::Debug for CacheClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheClient")
            .field("backend", &self.store.backend_name())
            .field("strategy", &self.config.strategy)
            .field("refresher", &self.refresher)
            .finish()
    }
}

async fn write_envelope<T: Serialize>(
    store: &DynKvStore,
    key: &str,
    value: &T,
    ttl: Duration,
) -> CacheResult<()> {
    let envelope = LogicalExpiryEnvelope::new(value, ttl);
    let payload = serde_json::to_string(&envelope)?;
    store.set(key, &payload, None).await?;
    Ok(())
}

async fn refresh_entry<T, F, Fut, E>(
    store: &DynKvStore,
    retry: &RetryPolicy,
    key: &str,
    ttl: Duration,
    loader: F,
) -> CacheResult<&'static str>
where
    T: Serialize,
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<Option<T>, E>>,
    E: Into<BoxError>,
{
    let current = retry_idempotent(retry, "cache_get", || store.get(key)).await?;
    if let Some(raw) = current {
        let still_fresh = serde_json::from_str::<LogicalExpiryEnvelope<IgnoredAny>>(&raw)
            .map(|envelope| !envelope.is_expired())
            .unwrap_or(false);
        if still_fresh {
            return Ok("already_fresh");
        }
    }

    let loaded = loader().await.map_err(CacheError::loader)?;
    match loaded {
        Some(value) => {
            write_envelope(store, key, &value, ttl).await?;
            Ok("refreshed")
        }
        None => {
            store.delete(key).await?;
            Ok("removed")
        }
    }
}
