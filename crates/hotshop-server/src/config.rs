use std::time::Duration;

use hotshop_cache::CacheConfig;
use hotshop_core::ShopId;
use hotshop_db_postgres::PostgresConfig;
use hotshop_kv::RedisConfig;
use hotshop_seckill::SeckillConfig;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AppConfig {
    /// Shared key-value store (cache entries, locks, admission state, queue)
    #[serde(default)]
    pub redis: RedisConfig,
    /// System of record
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    /// Catalog TTLs and pre-warming
    #[serde(default)]
    pub catalog: CatalogConfig,
    /// Flash-sale admission and order pipeline
    #[serde(default)]
    pub seckill: SeckillConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
}

const LOG_LEVELS: [&str; 6] = ["trace", "debug", "info", "warn", "error", "off"];

impl AppConfig {
    /// Checks every section; the first problem found is reported.
    pub fn validate(&self) -> Result<(), String> {
        check_redis(&self.redis)?;
        self.storage.validate()?;
        self.cache.validate()?;
        self.catalog.validate()?;
        self.seckill.validate()?;
        self.logging.validate()?;
        self.metrics.validate()
    }
}

fn check_redis(redis: &RedisConfig) -> Result<(), String> {
    if redis.pool_size == 0 {
        return Err("redis.pool_size must be > 0".into());
    }
    if redis.enabled && redis.url.trim().is_empty() {
        return Err("redis.url is required while redis.enabled is set".into());
    }
    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    #[default]
    Postgres,
    /// Process-local, for development and tests.
    Memory,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct StorageConfig {
    #[serde(default)]
    pub backend: StorageBackend,
    /// Read only when `backend = "postgres"`.
    #[serde(default)]
    pub postgres: PostgresConfig,
}

impl StorageConfig {
    fn validate(&self) -> Result<(), String> {
        if self.backend != StorageBackend::Postgres {
            return Ok(());
        }
        let pg = &self.postgres;
        if pg.url.trim().is_empty() {
            Err("storage.postgres.url must not be empty".into())
        } else if pg.pool_size == 0 {
            Err("storage.postgres.pool_size must be > 0".into())
        } else {
            Ok(())
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogConfig {
    /// Base TTL of cached shops (jitter is added by the cache).
    #[serde(default = "default_shop_ttl_secs")]
    pub shop_ttl_secs: u64,
    /// Base TTL of the cached shop type list.
    #[serde(default = "default_shop_type_ttl_secs")]
    pub shop_type_ttl_secs: u64,
    /// Shops written as logical-expiry entries at startup.
    #[serde(default)]
    pub warm_shops: Vec<ShopId>,
}

fn default_shop_ttl_secs() -> u64 {
    30 * 60
}

fn default_shop_type_ttl_secs() -> u64 {
    30 * 60
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            shop_ttl_secs: default_shop_ttl_secs(),
            shop_type_ttl_secs: default_shop_type_ttl_secs(),
            warm_shops: Vec::new(),
        }
    }
}

impl CatalogConfig {
    pub fn shop_ttl(&self) -> Duration {
        Duration::from_secs(self.shop_ttl_secs)
    }

    pub fn shop_type_ttl(&self) -> Duration {
        Duration::from_secs(self.shop_type_ttl_secs)
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.shop_ttl_secs == 0 || self.shop_type_ttl_secs == 0 {
            return Err("catalog TTLs must be > 0".into());
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Colored output; turn off when logs go to a file or collector.
    #[serde(default = "default_true")]
    pub ansi: bool,
    /// Include the emitting module in each line.
    #[serde(default = "default_true")]
    pub with_target: bool,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_true() -> bool {
    true
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            ansi: true,
            with_target: true,
        }
    }
}

impl LoggingConfig {
    fn validate(&self) -> Result<(), String> {
        let level = self.level.to_ascii_lowercase();
        if LOG_LEVELS.contains(&level.as_str()) {
            Ok(())
        } else {
            Err(format!(
                "logging.level {:?} is not one of {}",
                self.level,
                LOG_LEVELS.join(", ")
            ))
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    #[serde(default = "default_metrics_enabled")]
    pub enabled: bool,
    /// Address of the Prometheus scrape endpoint, e.g. `0.0.0.0:9000`.
    /// Without it metrics are only recorded in-process.
    #[serde(default)]
    pub listen: Option<String>,
}

fn default_metrics_enabled() -> bool {
    true
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: default_metrics_enabled(),
            listen: None,
        }
    }
}

impl MetricsConfig {
    fn validate(&self) -> Result<(), String> {
        match self.listen.as_deref().map(str::parse::<std::net::SocketAddr>) {
            Some(Err(e)) => Err(format!("metrics.listen is not a socket address: {e}")),
            _ => Ok(()),
        }
    }
}

/// Layered loading: built-in defaults, then the TOML file when present,
/// then `HOTSHOP__SECTION__KEY` environment variables.
pub mod loader {
    use std::path::Path;

    use config::{Config, Environment, File, FileFormat};

    use super::AppConfig;

    pub const DEFAULT_CONFIG_PATH: &str = "hotshop.toml";

    const ENV_PREFIX: &str = "HOTSHOP";
    const ENV_SEPARATOR: &str = "__";

    pub fn load_config(path: Option<&str>) -> Result<AppConfig, String> {
        let path = path.unwrap_or(DEFAULT_CONFIG_PATH);
        let file = File::new(path, FileFormat::Toml).required(Path::new(path).exists());
        let env = Environment::with_prefix(ENV_PREFIX)
            .prefix_separator(ENV_SEPARATOR)
            .separator(ENV_SEPARATOR)
            .try_parsing(true);

        let config: AppConfig = Config::builder()
            .add_source(file)
            .add_source(env)
            .build()
            .and_then(|c| c.try_deserialize::<AppConfig>())
            .map_err(|e| format!("cannot read configuration: {e}"))?;
        config.validate()?;
        Ok(config)
    }
}
