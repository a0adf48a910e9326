//! Globally unique, time-ordered order ids.
//!
//! An id is `seconds since 2022-01-01T00:00:00Z` in the high 32 bits and a
//! per-day store counter (`icr:{prefix}:{yyyy:mm:dd}`) in the low 32 bits.
//! The counter lives in the shared store, so ids are unique across instances.

use hotshop_core::OrderId;
use hotshop_kv::{DynKvStore, KvError};
use time::OffsetDateTime;

/// 2022-01-01T00:00:00Z.
pub const ID_EPOCH_SECS: i64 = 1_640_995_200;

const COUNT_BITS: u32 = 32;

#[derive(Clone)]
pub struct OrderIdWorker {
    store: DynKvStore,
}

impl OrderIdWorker {
    pub fn new(store: DynKvStore) -> Self {
        Self { store }
    }

    /// Allocates the next id in the `prefix` sequence.
    ///
    /// Not retried: a replayed `INCR` would only skip a sequence number, but
    /// a failure here is reported so the caller can undo its reservation.
    pub async fn next_id(&self, prefix: &str) -> Result<OrderId, KvError> {
        let now = hotshop_core::now_utc();
        let count = self.store.incr(&counter_key(prefix, now)).await?;
        Ok(compose(now.unix_timestamp() - ID_EPOCH_SECS, count))
    }
}

impl std::fmt::Debug for OrderIdWorker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OrderIdWorker")
            .field("backend", &self.store.backend_name())
            .finish()
    }
}

fn counter_key(prefix: &str, at: OffsetDateTime) -> String {
    format!(
        "icr:{prefix}:{:04}:{:02}:{:02}",
        at.year(),
        u8::from(at.month()),
        at.day()
    )
}

fn compose(timestamp: i64, count: i64) -> OrderId {
    (timestamp << COUNT_BITS) | (count & 0xFFFF_FFFF)
}

/// Seconds since [`ID_EPOCH_SECS`] encoded in an id.
pub fn id_timestamp(id: OrderId) -> i64 {
    id >> COUNT_BITS
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use hotshop_kv::LocalKvStore;
    use time::macros::datetime;

    use super::*;

    #[test]
    fn test_counter_key_is_per_day() {
        let at = datetime!(2024-03-07 23:59:59 UTC);
        assert_eq!(counter_key("order", at), "icr:order:2024:03:07");
    }

    #[test]
    fn test_compose_layout() {
        let id = compose(86_400, 5);
        assert_eq!(id_timestamp(id), 86_400);
        assert_eq!(id & 0xFFFF_FFFF, 5);
    }

    #[tokio::test]
    async fn test_ids_are_unique_and_increasing() {
        let worker = OrderIdWorker::new(Arc::new(LocalKvStore::new()));
        let mut previous = 0;
        for _ in 0..100 {
            let id = worker.next_id("order").await.unwrap();
            assert!(id > previous);
            previous = id;
        }
        let elapsed = hotshop_core::now_utc().unix_timestamp() - ID_EPOCH_SECS;
        assert!((id_timestamp(previous) - elapsed).abs() <= 1);
    }

    #[tokio::test]
    async fn test_prefixes_have_separate_counters() {
        let worker = OrderIdWorker::new(Arc::new(LocalKvStore::new()));
        let a = worker.next_id("order").await.unwrap();
        let b = worker.next_id("refund").await.unwrap();
        assert_eq!(a & 0xFFFF_FFFF, 1);
        assert_eq!(b & 0xFFFF_FFFF, 1);
    }
}
