//! Cache layer for Hotshop.
//!
//! Provides:
//! - [`CacheClient`]: read-through cache with pass-through, mutex and
//!   logical-expiry strategies plus a list cache
//! - [`DistributedLock`]: owner-verified lock with atomic release
//! - [`RefreshPool`]: bounded background worker pool used by logical expiry
//! - [`TtlPolicy`]: jittered entry lifetimes

pub mod client;
pub mod config;
pub mod envelope;
pub mod error;
pub mod lock;
pub mod metrics;
pub mod refresher;
pub mod ttl;

pub use client::CacheClient;
pub use config::{CacheConfig, CacheStrategy, RefresherConfig};
pub use envelope::LogicalExpiryEnvelope;
pub use error::{BoxError, CacheError, CacheResult};
pub use lock::{DistributedLock, LOCK_PREFIX, LockHandle, ReleaseOutcome};
pub use refresher::{RefreshPool, SubmitError};
pub use ttl::TtlPolicy;
