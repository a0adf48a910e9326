//! PostgreSQL system of record for Hotshop.
//!
//! Provides the catalog tables read through the cache and the flash-sale
//! order tables. Order creation runs in one transaction: the conditional
//! `stock > 0` decrement and the `(user_id, voucher_id)` unique constraint
//! are the authoritative guards against overselling and duplicates.

mod config;
mod error;
pub mod migrations;
mod pool;
mod storage;
mod transaction;

pub use config::PostgresConfig;
pub use error::{PostgresError, Result, is_unique_violation};
pub use pool::{PgPoolOptions, create_pool};
pub use storage::PostgresStorage;
pub use transaction::PostgresOrderTransaction;
