//! Hotshop service assembly.
//!
//! Loads configuration, initializes tracing and metrics, and wires the
//! cache-backed catalog and the flash-sale pipeline over the configured
//! key-value store and system of record.

pub mod bootstrap;
pub mod catalog;
pub mod config;
pub mod metrics;
pub mod observability;

pub use bootstrap::App;
pub use catalog::{CatalogError, CatalogResult, ShopService};
pub use config::AppConfig;
