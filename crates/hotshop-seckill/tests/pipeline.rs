//! Producer and consumer behavior against the local store and the in-memory
//! system of record.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use hotshop_core::PurchaseIntent;
use hotshop_db_memory::InMemoryStorage;
use hotshop_kv::{KeyValueStore, KvError, LocalKvStore};
use hotshop_seckill::{
    AdmissionOutcome, Delivery, InventoryAdmission, OrderConsumer, OrderQueue, PersistOutcome,
    QueueError, Rejection, SeckillError, SeckillService, StoreOrderQueue,
};
use hotshop_storage::{CatalogStore, OrderStore, StorageError};

const QUEUE: &str = "stream.orders";

struct Fixture {
    store: Arc<LocalKvStore>,
    db: Arc<InMemoryStorage>,
    queue: Arc<StoreOrderQueue>,
    service: SeckillService,
    consumer: Arc<OrderConsumer>,
}

async fn fixture(voucher_id: i64, stock: i32) -> Fixture {
    let store = Arc::new(LocalKvStore::new());
    let db = Arc::new(InMemoryStorage::new());
    db.set_stock(voucher_id, stock).await;

    let queue = Arc::new(StoreOrderQueue::new(store.clone(), QUEUE));
    let admission = InventoryAdmission::new(store.clone(), "order");
    admission
        .seed_stock(voucher_id, i64::from(stock))
        .await
        .unwrap();
    let service = SeckillService::new(admission, queue.clone());
    let consumer = Arc::new(
        OrderConsumer::new(db.clone(), queue.clone())
            .with_receive_timeout(Duration::from_millis(20)),
    );
    Fixture {
        store,
        db,
        queue,
        service,
        consumer,
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_flash_sale_end_to_end() {
    let f = fixture(10, 3).await;

    let tasks: Vec<_> = (1..=5)
        .map(|user_id| {
            let service = f.service.clone();
            tokio::spawn(async move { (user_id, service.purchase(10, user_id).await) })
        })
        .collect();

    let mut granted = HashSet::new();
    let mut out_of_stock = 0;
    for task in tasks {
        let (user_id, outcome) = task.await.unwrap();
        match outcome.unwrap() {
            AdmissionOutcome::Granted { order_id } => {
                granted.insert((user_id, order_id));
            }
            AdmissionOutcome::Rejected(Rejection::OutOfStock) => out_of_stock += 1,
            other => panic!("unexpected outcome {other:?}"),
        }
    }
    assert_eq!(granted.len(), 3);
    assert_eq!(out_of_stock, 2);

    let handle = f.consumer.clone().start(2).await.unwrap();
    let mut orders = Vec::new();
    for _ in 0..200 {
        orders = f.db.list_orders(10).await.unwrap();
        if orders.len() == 3 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    handle.shutdown().await;

    let persisted: HashSet<_> = orders.iter().map(|o| (o.user_id, o.id)).collect();
    assert_eq!(persisted, granted);
    assert!(orders.iter().all(|o| o.voucher_id == 10));
    assert_eq!(f.db.get_voucher_stock(10).await.unwrap().unwrap().stock, 0);
    assert!(f.queue.pending().await.unwrap().is_empty());
    assert!(f.queue.in_flight().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_redelivered_intent_persists_once() {
    let f = fixture(20, 5).await;
    let intent = PurchaseIntent::new(1_001, 7, 20);
    f.queue.publish(&intent).await.unwrap();
    f.queue.publish(&intent).await.unwrap();

    let first = f.consumer.process_next(Duration::ZERO).await.unwrap();
    let second = f.consumer.process_next(Duration::ZERO).await.unwrap();
    assert_eq!(first, Some(PersistOutcome::Persisted));
    assert_eq!(second, Some(PersistOutcome::Duplicate));

    let orders = f.db.list_orders(20).await.unwrap();
    assert_eq!(orders.len(), 1);
    assert_eq!(orders[0].id, 1_001);
    assert_eq!(f.db.get_voucher_stock(20).await.unwrap().unwrap().stock, 4);
    assert!(f.queue.in_flight().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_authoritative_stock_rejects_over_admission() {
    let f = fixture(30, 1).await;
    // Admission thinks there is more stock than the system of record.
    f.service.admission().seed_stock(30, 2).await.unwrap();

    assert!(f.service.purchase(30, 1).await.unwrap().is_granted());
    assert!(f.service.purchase(30, 2).await.unwrap().is_granted());

    assert_eq!(
        f.consumer.process_next(Duration::ZERO).await.unwrap(),
        Some(PersistOutcome::Persisted)
    );
    assert_eq!(
        f.consumer.process_next(Duration::ZERO).await.unwrap(),
        Some(PersistOutcome::OutOfStock)
    );
    assert_eq!(f.db.list_orders(30).await.unwrap().len(), 1);
    assert_eq!(f.db.get_voucher_stock(30).await.unwrap().unwrap().stock, 0);
}

#[tokio::test]
async fn test_start_recovers_orphaned_deliveries() {
    let f = fixture(40, 2).await;
    f.queue
        .publish(&PurchaseIntent::new(2_001, 1, 40))
        .await
        .unwrap();
    // A previous consumer took the message and died before acknowledging it.
    let orphan = f.queue.receive(Duration::ZERO).await.unwrap().unwrap();
    assert_eq!(f.queue.in_flight().await.unwrap(), vec![orphan.payload().to_string()]);

    let handle = f.consumer.clone().start(1).await.unwrap();
    for _ in 0..200 {
        if f.db.find_order(1, 40).await.unwrap().is_some() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    handle.shutdown().await;

    assert!(f.db.find_order(1, 40).await.unwrap().is_some());
    assert!(f.queue.in_flight().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_malformed_message_is_dropped() {
    let f = fixture(50, 1).await;
    f.store
        .list_push(QUEUE, &["{not json".to_string()])
        .await
        .unwrap();

    let err = f.consumer.process_next(Duration::ZERO).await.unwrap_err();
    assert!(matches!(err, SeckillError::Queue(QueueError::Malformed { .. })));
    assert!(f.queue.in_flight().await.unwrap().is_empty());
    assert!(f.queue.pending().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_unavailable_storage_requeues_intent() {
    let f = fixture(60, 2).await;
    let intent = PurchaseIntent::new(3_001, 9, 60);
    f.queue.publish(&intent).await.unwrap();
    f.db.fail_next_begin(StorageError::connection_error("db restarting"));

    let err = f.consumer.process_next(Duration::ZERO).await.unwrap_err();
    assert!(err.is_retryable());
    assert!(f.queue.in_flight().await.unwrap().is_empty());
    assert_eq!(f.queue.pending().await.unwrap().len(), 1);
    assert!(f.db.find_order(9, 60).await.unwrap().is_none());

    assert_eq!(
        f.consumer.process_next(Duration::ZERO).await.unwrap(),
        Some(PersistOutcome::Persisted)
    );
    assert_eq!(f.db.find_order(9, 60).await.unwrap().unwrap().id, 3_001);
    assert!(f.queue.pending().await.unwrap().is_empty());
    assert!(f.queue.in_flight().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_permanent_storage_failure_drops_intent() {
    let f = fixture(70, 2).await;
    f.queue
        .publish(&PurchaseIntent::new(4_001, 3, 70))
        .await
        .unwrap();
    f.db.fail_next_begin(StorageError::internal("corrupt page"));

    let err = f.consumer.process_next(Duration::ZERO).await.unwrap_err();
    assert!(!err.is_retryable());
    assert!(f.queue.pending().await.unwrap().is_empty());
    assert!(f.queue.in_flight().await.unwrap().is_empty());
    assert!(f.db.find_order(3, 70).await.unwrap().is_none());
    assert_eq!(f.db.get_voucher_stock(70).await.unwrap().unwrap().stock, 2);
}

struct BrokenQueue;

#[async_trait]
impl OrderQueue for BrokenQueue {
    async fn publish(&self, _: &PurchaseIntent) -> Result<(), QueueError> {
        Err(KvError::connection("broker unreachable").into())
    }

    async fn receive(&self, _: Duration) -> Result<Option<Delivery>, QueueError> {
        Ok(None)
    }

    async fn ack(&self, _: &Delivery) -> Result<(), QueueError> {
        Ok(())
    }

    async fn nack(&self, _: &Delivery) -> Result<(), QueueError> {
        Ok(())
    }

    async fn recover(&self) -> Result<usize, QueueError> {
        Ok(0)
    }

    fn name(&self) -> &str {
        "broken"
    }
}

#[tokio::test]
async fn test_publish_failure_releases_reservation() {
    let store = Arc::new(LocalKvStore::new());
    let admission = InventoryAdmission::new(store.clone(), "order");
    admission.seed_stock(60, 1).await.unwrap();
    let service = SeckillService::new(admission.clone(), Arc::new(BrokenQueue));

    let err = service.purchase(60, 5).await.unwrap_err();
    assert!(matches!(err, SeckillError::Publish { .. }));
    assert!(err.is_retryable());
    assert_eq!(admission.remaining_stock(60).await.unwrap(), Some(1));

    // The user is not marked as admitted, so a retry through a healthy
    // queue is granted.
    let healthy = SeckillService::new(admission.clone(), Arc::new(StoreOrderQueue::new(store, QUEUE)));
    assert!(healthy.purchase(60, 5).await.unwrap().is_granted());
}

#[tokio::test]
async fn test_publish_failure_without_compensation_keeps_reservation() {
    let admission = InventoryAdmission::new(Arc::new(LocalKvStore::new()), "order");
    admission.seed_stock(61, 1).await.unwrap();
    let service =
        SeckillService::new(admission.clone(), Arc::new(BrokenQueue)).with_compensation(false);

    assert!(service.purchase(61, 5).await.is_err());
    assert_eq!(admission.remaining_stock(61).await.unwrap(), Some(0));
    assert_eq!(
        admission.admit(61, 5).await.unwrap(),
        AdmissionOutcome::Rejected(Rejection::Duplicate)
    );
}
