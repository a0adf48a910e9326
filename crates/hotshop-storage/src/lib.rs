//! System-of-record abstraction for Hotshop.
//!
//! The catalog (shops, shop types) is read through the cache and written
//! directly; flash-sale orders are persisted through [`OrderTransaction`],
//! the authoritative guard against overselling and duplicate purchases.

pub mod error;
pub mod traits;

pub use error::{ErrorCategory, StorageError};
pub use traits::{CatalogStore, OrderStore, OrderTransaction};

/// Type alias for a shareable catalog store.
pub type DynCatalogStore = std::sync::Arc<dyn CatalogStore>;

/// Type alias for a shareable order store.
pub type DynOrderStore = std::sync::Arc<dyn OrderStore>;
