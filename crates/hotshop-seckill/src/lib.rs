//! Flash-sale admission control and order pipeline.
//!
//! A purchase goes through two guards:
//!
//! 1. [`InventoryAdmission`] decides it in one atomic store script (stock
//!    check, per-user duplicate check, decrement). Granted purchases get a
//!    time-ordered order id and their intent is queued by [`SeckillService`].
//! 2. [`OrderConsumer`] persists each intent in one transaction against the
//!    system of record, which re-checks both stock and uniqueness.
//!
//! The admission state is soft: losing it can over-admit, but the second
//! guard never persists more orders than the authoritative stock allows.

pub mod admission;
pub mod config;
pub mod consumer;
pub mod error;
pub mod id;
pub mod metrics;
pub mod queue;
pub mod service;

pub use admission::{AdmissionOutcome, InventoryAdmission, Rejection, order_key, stock_key};
pub use config::SeckillConfig;
pub use consumer::{ConsumerHandle, OrderConsumer, PersistOutcome};
pub use error::{QueueError, RETRY_LATER_MESSAGE, Result, SeckillError};
pub use id::{ID_EPOCH_SECS, OrderIdWorker, id_timestamp};
pub use queue::{Delivery, OrderQueue, StoreOrderQueue};
pub use service::SeckillService;
