//! Durable queue of purchase intents.
//!
//! The queue contract is at-least-once: a received message stays in an
//! in-flight list until it is acknowledged, and in-flight messages left
//! behind by a crashed consumer are moved back by [`OrderQueue::recover`].
//! Consumers must therefore be idempotent.

use std::sync::LazyLock;
use std::time::Duration;

use async_trait::async_trait;
use hotshop_core::PurchaseIntent;
use hotshop_kv::script::arg;
use hotshop_kv::{AtomicScript, DynKvStore, KvError, LocalKeyspace};
use tracing::{debug, info};

use crate::error::QueueError;

/// A received message. The raw body is kept so that acknowledgement removes
/// exactly the bytes that were delivered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    payload: String,
}

impl Delivery {
    pub fn new(payload: impl Into<String>) -> Self {
        Self {
            payload: payload.into(),
        }
    }

    pub fn payload(&self) -> &str {
        &self.payload
    }

    /// Decodes the purchase intent carried by this delivery.
    pub fn intent(&self) -> Result<PurchaseIntent, QueueError> {
        PurchaseIntent::from_json(&self.payload).map_err(|source| QueueError::Malformed {
            payload: self.payload.clone(),
            source,
        })
    }
}

/// Order queue operations used by the producer and the consumer.
#[async_trait]
pub trait OrderQueue: Send + Sync {
    /// Enqueues one purchase intent.
    async fn publish(&self, intent: &PurchaseIntent) -> Result<(), QueueError>;

    /// Takes the oldest ready message into flight, waiting up to `wait`.
    async fn receive(&self, wait: Duration) -> Result<Option<Delivery>, QueueError>;

    /// Drops a processed message.
    async fn ack(&self, delivery: &Delivery) -> Result<(), QueueError>;

    /// Returns an in-flight message to the tail of the ready queue.
    async fn nack(&self, delivery: &Delivery) -> Result<(), QueueError>;

    /// Moves every in-flight message back to the ready queue. Returns how
    /// many were moved.
    async fn recover(&self) -> Result<usize, QueueError>;

    fn name(&self) -> &str;
}

const REQUEUE_LUA: &str = r"
if redis.call('LREM', KEYS[1], 1, ARGV[1]) == 0 then
    return 0
end
redis.call('RPUSH', KEYS[2], ARGV[1])
return 1
";

fn requeue_local(ks: &mut LocalKeyspace, keys: &[String], args: &[String]) -> Result<i64, KvError> {
    let processing = arg("queue_requeue", keys, 0)?;
    let ready = arg("queue_requeue", keys, 1)?;
    let payload = arg("queue_requeue", args, 0)?;
    if ks.list_remove(processing, 1, payload)? == 0 {
        return Ok(0);
    }
    ks.list_push(ready, &[payload.to_string()])?;
    Ok(1)
}

static REQUEUE_SCRIPT: LazyLock<AtomicScript> =
    LazyLock::new(|| AtomicScript::new("queue_requeue", REQUEUE_LUA, requeue_local));

/// Queue over two store lists: `{name}` (ready) and `{name}:processing`.
///
/// Runs on any [`hotshop_kv::KeyValueStore`]; with Redis the lists are
/// durable and shared by every instance.
#[derive(Clone)]
pub struct StoreOrderQueue {
    store: DynKvStore,
    ready: String,
    processing: String,
}

impl StoreOrderQueue {
    pub fn new(store: DynKvStore, name: impl Into<String>) -> Self {
        let ready = name.into();
        Self {
            processing: format!("{ready}:processing"),
            ready,
            store,
        }
    }

    pub fn processing_key(&self) -> &str {
        &self.processing
    }

    /// Ready messages, oldest first.
    pub async fn pending(&self) -> Result<Vec<String>, QueueError> {
        Ok(self.store.list_range(&self.ready, 0, -1).await?)
    }

    /// In-flight messages, oldest first.
    pub async fn in_flight(&self) -> Result<Vec<String>, QueueError> {
        Ok(self.store.list_range(&self.processing, 0, -1).await?)
    }
}

impl std::fmt::Debug for StoreOrderQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoreOrderQueue")
            .field("ready", &self.ready)
            .field("processing", &self.processing)
            .field("backend", &self.store.backend_name())
            .finish()
    }
}

#[async_trait]
impl OrderQueue for StoreOrderQueue {
    async fn publish(&self, intent: &PurchaseIntent) -> Result<(), QueueError> {
        let payload = intent.to_json().map_err(|source| QueueError::Malformed {
            payload: format!("{intent:?}"),
            source,
        })?;
        self.store.list_push(&self.ready, &[payload]).await?;
        debug!(queue = %self.ready, order_id = intent.order_id, "purchase intent published");
        Ok(())
    }

    async fn receive(&self, wait: Duration) -> Result<Option<Delivery>, QueueError> {
        let payload = self
            .store
            .list_move(&self.ready, &self.processing, wait)
            .await?;
        Ok(payload.map(Delivery::new))
    }

    async fn ack(&self, delivery: &Delivery) -> Result<(), QueueError> {
        self.store
            .list_remove(&self.processing, 1, delivery.payload())
            .await?;
        Ok(())
    }

    async fn nack(&self, delivery: &Delivery) -> Result<(), QueueError> {
        let keys = [self.processing.clone(), self.ready.clone()];
        let args = [delivery.payload.clone()];
        self.store.eval(&REQUEUE_SCRIPT, &keys, &args).await?;
        Ok(())
    }

    async fn recover(&self) -> Result<usize, QueueError> {
        let mut moved = 0;
        while self
            .store
            .list_move(&self.processing, &self.ready, Duration::ZERO)
            .await?
            .is_some()
        {
            moved += 1;
        }
        if moved > 0 {
            info!(queue = %self.ready, moved, "in-flight messages returned to the queue");
        }
        Ok(moved)
    }

    fn name(&self) -> &str {
        &self.ready
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use hotshop_kv::LocalKvStore;

    use super::*;

    fn queue() -> StoreOrderQueue {
        StoreOrderQueue::new(Arc::new(LocalKvStore::new()), "stream.orders")
    }

    #[tokio::test]
    async fn test_fifo_delivery_and_ack() {
        let queue = queue();
        queue.publish(&PurchaseIntent::new(1, 10, 100)).await.unwrap();
        queue.publish(&PurchaseIntent::new(2, 11, 100)).await.unwrap();

        let first = queue.receive(Duration::ZERO).await.unwrap().unwrap();
        assert_eq!(first.intent().unwrap().order_id, 1);
        assert_eq!(queue.in_flight().await.unwrap().len(), 1);

        queue.ack(&first).await.unwrap();
        assert!(queue.in_flight().await.unwrap().is_empty());

        let second = queue.receive(Duration::ZERO).await.unwrap().unwrap();
        assert_eq!(second.intent().unwrap().order_id, 2);
        assert!(queue.receive(Duration::ZERO).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_nack_requeues_at_tail() {
        let queue = queue();
        queue.publish(&PurchaseIntent::new(1, 10, 100)).await.unwrap();
        queue.publish(&PurchaseIntent::new(2, 11, 100)).await.unwrap();

        let first = queue.receive(Duration::ZERO).await.unwrap().unwrap();
        queue.nack(&first).await.unwrap();
        assert!(queue.in_flight().await.unwrap().is_empty());

        let pending = queue.pending().await.unwrap();
        assert_eq!(pending.len(), 2);
        assert_eq!(pending[1], first.payload());
    }

    #[tokio::test]
    async fn test_recover_returns_in_flight_messages() {
        let queue = queue();
        for id in 1..=3 {
            queue.publish(&PurchaseIntent::new(id, id, 100)).await.unwrap();
        }
        queue.receive(Duration::ZERO).await.unwrap().unwrap();
        queue.receive(Duration::ZERO).await.unwrap().unwrap();

        assert_eq!(queue.recover().await.unwrap(), 2);
        assert!(queue.in_flight().await.unwrap().is_empty());
        assert_eq!(queue.pending().await.unwrap().len(), 3);
        assert_eq!(queue.recover().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_receive_times_out_on_empty_queue() {
        let queue = queue();
        let started = std::time::Instant::now();
        assert!(queue.receive(Duration::from_millis(50)).await.unwrap().is_none());
        assert!(started.elapsed() >= Duration::from_millis(50));
    }

    #[test]
    fn test_malformed_delivery() {
        let delivery = Delivery::new("not json");
        assert!(matches!(delivery.intent(), Err(QueueError::Malformed { .. })));
    }
}
