//! Redis-backed key-value store.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use deadpool_redis::{Connection, Pool};
use redis::AsyncCommands;
use serde::{Deserialize, Serialize};

use crate::error::KvError;
use crate::local::LocalKvStore;
use crate::script::AtomicScript;
use crate::traits::{KeyTtl, KeyValueStore};
use crate::DynKvStore;

/// Redis connection configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedisConfig {
    /// Use Redis. When disabled the process runs on the local in-memory
    /// store, which is only correct for a single instance.
    #[serde(default = "default_redis_enabled")]
    pub enabled: bool,

    /// Redis connection URL (e.g., "redis://localhost:6379")
    #[serde(default = "default_redis_url")]
    pub url: String,

    /// Connection pool size
    #[serde(default = "default_redis_pool_size")]
    pub pool_size: usize,

    /// Connection timeout in milliseconds
    #[serde(default = "default_redis_timeout_ms")]
    pub timeout_ms: u64,
}

fn default_redis_enabled() -> bool {
    true
}

fn default_redis_url() -> String {
    "redis://localhost:6379".to_string()
}

fn default_redis_pool_size() -> usize {
    16
}

fn default_redis_timeout_ms() -> u64 {
    2000
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            enabled: default_redis_enabled(),
            url: default_redis_url(),
            pool_size: default_redis_pool_size(),
            timeout_ms: default_redis_timeout_ms(),
        }
    }
}

/// Create the key-value store described by the configuration.
///
/// Unlike a pure cache, the store also carries locks and admission state, so
/// an unreachable Redis is an error rather than a silent fall back to the
/// local store.
pub async fn create_kv_store(config: &RedisConfig) -> Result<DynKvStore, KvError> {
    if !config.enabled {
        tracing::info!("Redis disabled, using local key-value store");
        return Ok(Arc::new(LocalKvStore::new()));
    }

    let store = RedisKvStore::connect(config).await?;
    Ok(Arc::new(store))
}

/// [`KeyValueStore`] backed by a pooled Redis connection.
#[derive(Clone)]
pub struct RedisKvStore {
    pool: Pool,
}

impl RedisKvStore {
    /// Wrap an existing pool.
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }

    /// Build a pool from configuration and verify connectivity.
    pub async fn connect(config: &RedisConfig) -> Result<Self, KvError> {
        tracing::info!(url = %config.url, pool_size = config.pool_size, "Connecting to Redis");

        let mut redis_config = deadpool_redis::Config::from_url(&config.url);
        let timeout = Duration::from_millis(config.timeout_ms);
        let mut pool_config = deadpool_redis::PoolConfig::new(config.pool_size);
        pool_config.timeouts.wait = Some(timeout);
        pool_config.timeouts.create = Some(timeout);
        pool_config.timeouts.recycle = Some(timeout);
        redis_config.pool = Some(pool_config);

        let pool = redis_config
            .create_pool(Some(deadpool_redis::Runtime::Tokio1))
            .map_err(|e| KvError::Config(e.to_string()))?;

        let mut conn = pool.get().await?;
        let pong: String = redis::cmd("PING").query_async(&mut conn).await?;
        tracing::info!(reply = %pong, "Connected to Redis");

        Ok(Self { pool })
    }

    /// The underlying pool.
    pub fn pool(&self) -> &Pool {
        &self.pool
    }

    async fn conn(&self) -> Result<Connection, KvError> {
        Ok(self.pool.get().await?)
    }
}

fn millis(ttl: Duration) -> u64 {
    (ttl.as_millis() as u64).max(1)
}

#[async_trait]
impl KeyValueStore for RedisKvStore {
    async fn get(&self, key: &str) -> Result<Option<String>, KvError> {
        let mut conn = self.conn().await?;
        let value: Option<String> = conn.get(key).await?;
        Ok(value)
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<(), KvError> {
        let mut conn = self.conn().await?;
        let mut cmd = redis::cmd("SET");
        cmd.arg(key).arg(value);
        if let Some(ttl) = ttl {
            cmd.arg("PX").arg(millis(ttl));
        }
        let _: () = cmd.query_async(&mut conn).await?;
        tracing::debug!(key = %key, ttl_ms = ?ttl.map(millis), "store set");
        Ok(())
    }

    async fn set_nx(&self, key: &str, value: &str, ttl: Duration) -> Result<bool, KvError> {
        let mut conn = self.conn().await?;
        let reply: Option<String> = redis::cmd("SET")
            .arg(key)
            .arg(value)
            .arg("NX")
            .arg("PX")
            .arg(millis(ttl))
            .query_async(&mut conn)
            .await?;
        Ok(reply.is_some())
    }

    async fn delete(&self, key: &str) -> Result<bool, KvError> {
        let mut conn = self.conn().await?;
        let removed: usize = conn.del(key).await?;
        Ok(removed > 0)
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool, KvError> {
        let mut conn = self.conn().await?;
        let applied: i64 = redis::cmd("PEXPIRE")
            .arg(key)
            .arg(millis(ttl))
            .query_async(&mut conn)
            .await?;
        Ok(applied == 1)
    }

    async fn ttl(&self, key: &str) -> Result<KeyTtl, KvError> {
        let mut conn = self.conn().await?;
        let pttl: i64 = redis::cmd("PTTL").arg(key).query_async(&mut conn).await?;
        Ok(KeyTtl::from_pttl(pttl))
    }

    async fn incr(&self, key: &str) -> Result<i64, KvError> {
        let mut conn = self.conn().await?;
        let value: i64 = conn.incr(key, 1).await?;
        Ok(value)
    }

    async fn list_push(&self, key: &str, values: &[String]) -> Result<usize, KvError> {
        if values.is_empty() {
            let mut conn = self.conn().await?;
            let len: usize = conn.llen(key).await?;
            return Ok(len);
        }
        let mut conn = self.conn().await?;
        let len: usize = conn.rpush(key, values).await?;
        Ok(len)
    }

    async fn list_range(
        &self,
        key: &str,
        start: isize,
        stop: isize,
    ) -> Result<Vec<String>, KvError> {
        let mut conn = self.conn().await?;
        let values: Vec<String> = conn.lrange(key, start, stop).await?;
        Ok(values)
    }

    async fn replace_list(
        &self,
        key: &str,
        values: &[String],
        ttl: Duration,
    ) -> Result<(), KvError> {
        let mut conn = self.conn().await?;
        let mut pipe = redis::pipe();
        pipe.atomic().cmd("DEL").arg(key).ignore();
        if !values.is_empty() {
            pipe.cmd("RPUSH").arg(key).arg(values).ignore();
            pipe.cmd("PEXPIRE").arg(key).arg(millis(ttl)).ignore();
        }
        let _: () = pipe.query_async(&mut conn).await?;
        Ok(())
    }

    async fn list_move(
        &self,
        source: &str,
        destination: &str,
        wait: Duration,
    ) -> Result<Option<String>, KvError> {
        let mut conn = self.conn().await?;
        let value: Option<String> = if wait.is_zero() {
            redis::cmd("LMOVE")
                .arg(source)
                .arg(destination)
                .arg("LEFT")
                .arg("RIGHT")
                .query_async(&mut conn)
                .await?
        } else {
            // Blocks this pooled connection for at most `wait`.
            redis::cmd("BLMOVE")
                .arg(source)
                .arg(destination)
                .arg("LEFT")
                .arg("RIGHT")
                .arg(wait.as_secs_f64())
                .query_async(&mut conn)
                .await?
        };
        Ok(value)
    }

    async fn list_remove(&self, key: &str, count: isize, value: &str) -> Result<usize, KvError> {
        let mut conn = self.conn().await?;
        let removed: usize = conn.lrem(key, count, value).await?;
        Ok(removed)
    }

    async fn eval(
        &self,
        script: &AtomicScript,
        keys: &[String],
        args: &[String],
    ) -> Result<i64, KvError> {
        let mut conn = self.conn().await?;
        let mut invocation = script.redis_script().prepare_invoke();
        for key in keys {
            invocation.key(key);
        }
        for arg in args {
            invocation.arg(arg);
        }
        let code: i64 = invocation.invoke_async(&mut conn).await.map_err(|e| {
            if e.is_io_error() || e.is_connection_dropped() || e.is_timeout() {
                KvError::Connection(e.to_string())
            } else {
                KvError::script(script.name(), e.to_string())
            }
        })?;
        Ok(code)
    }

    fn backend_name(&self) -> &'static str {
        "redis"
    }
}
