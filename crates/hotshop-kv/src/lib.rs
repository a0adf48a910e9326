//! Key-value store abstraction for Hotshop.
//!
//! The store is the only synchronization substrate shared between instances:
//! cache entries, distributed locks, admission state and the order queue all
//! live here. Two backends implement [`KeyValueStore`]:
//!
//! - **Redis** ([`RedisKvStore`]): pooled via `deadpool-redis`, atomic scripts
//!   run as server-side Lua.
//! - **Local** ([`LocalKvStore`]): single-process keyspace behind one mutex,
//!   atomic scripts run as their native Rust rendition. Used for tests and
//!   single-instance development.
//!
//! ```ignore
//! let store = hotshop_kv::create_kv_store(&RedisConfig::default()).await?;
//! store.set("cache:shop:1", "{...}", Some(Duration::from_secs(60))).await?;
//! ```

pub mod error;
pub mod local;
pub mod redis_store;
pub mod retry;
pub mod script;
pub mod traits;

pub use error::KvError;
pub use local::{LocalKeyspace, LocalKvStore};
pub use redis_store::{RedisConfig, RedisKvStore, create_kv_store};
pub use retry::{RetryPolicy, retry_idempotent};
pub use script::AtomicScript;
pub use traits::{KeyTtl, KeyValueStore};

/// Type alias for a shareable store instance.
pub type DynKvStore = std::sync::Arc<dyn KeyValueStore>;
