//! Consumer side of the order pipeline.
//!
//! Each purchase intent is persisted in one order transaction that checks
//! for an existing order, decrements the authoritative stock where it is
//! still positive and inserts the order row. Redelivered intents therefore
//! never create a second order.

use std::sync::Arc;
use std::time::Duration;

use hotshop_core::{Order, PurchaseIntent};
use hotshop_storage::{DynOrderStore, OrderTransaction, StorageError};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument, warn};

use crate::error::Result;
use crate::metrics;
use crate::queue::{Delivery, OrderQueue};

/// What persisting one intent did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PersistOutcome {
    Persisted,
    /// An order for the same user and voucher already exists.
    Duplicate,
    /// The authoritative stock is exhausted.
    OutOfStock,
}

impl PersistOutcome {
    pub fn as_str(self) -> &'static str {
        match self {
            PersistOutcome::Persisted => "persisted",
            PersistOutcome::Duplicate => "duplicate",
            PersistOutcome::OutOfStock => "out_of_stock",
        }
    }
}

pub struct OrderConsumer {
    orders: DynOrderStore,
    queue: Arc<dyn OrderQueue>,
    receive_timeout: Duration,
}

impl OrderConsumer {
    pub fn new(orders: DynOrderStore, queue: Arc<dyn OrderQueue>) -> Self {
        Self {
            orders,
            queue,
            receive_timeout: Duration::from_secs(2),
        }
    }

    pub fn with_receive_timeout(mut self, timeout: Duration) -> Self {
        self.receive_timeout = timeout;
        self
    }

    /// Persists one intent as a single transaction.
    ///
    /// Duplicate and out-of-stock intents are rolled back and reported as
    /// outcomes; any storage failure rolls back and is returned.
    #[instrument(skip(self), fields(order_id = intent.order_id))]
    pub async fn create_order(
        &self,
        intent: &PurchaseIntent,
    ) -> std::result::Result<PersistOutcome, StorageError> {
        let mut tx = self.orders.begin_order_transaction().await?;
        match apply(tx.as_mut(), intent).await {
            Ok(PersistOutcome::Persisted) => {
                tx.commit().await?;
                debug!(
                    user_id = intent.user_id,
                    voucher_id = intent.voucher_id,
                    "order persisted"
                );
                Ok(PersistOutcome::Persisted)
            }
            Ok(outcome) => {
                rollback(tx).await;
                Ok(outcome)
            }
            Err(e) => {
                rollback(tx).await;
                Err(e)
            }
        }
    }

    /// Persists a delivered message and settles it with the queue.
    ///
    /// Successful outcomes and permanent failures are acknowledged;
    /// transient failures are returned to the queue for redelivery.
    pub async fn handle(&self, delivery: &Delivery) -> Result<PersistOutcome> {
        let intent = match delivery.intent() {
            Ok(intent) => intent,
            Err(e) => {
                error!(error = %e, "discarding malformed purchase intent");
                metrics::record_order("malformed");
                self.queue.ack(delivery).await?;
                return Err(e.into());
            }
        };

        match self.create_order(&intent).await {
            Ok(outcome) => {
                if outcome != PersistOutcome::Persisted {
                    warn!(
                        order_id = intent.order_id,
                        user_id = intent.user_id,
                        voucher_id = intent.voucher_id,
                        outcome = outcome.as_str(),
                        "purchase intent discarded"
                    );
                }
                metrics::record_order(outcome.as_str());
                self.queue.ack(delivery).await?;
                Ok(outcome)
            }
            Err(e) if e.is_retryable() => {
                warn!(order_id = intent.order_id, error = %e, "order persistence unavailable, requeueing");
                metrics::record_order("requeued");
                self.queue.nack(delivery).await?;
                Err(e.into())
            }
            Err(e) => {
                error!(
                    order_id = intent.order_id,
                    kind = %e.category(),
                    error = %e,
                    "order persistence failed, discarding intent"
                );
                metrics::record_order("failed");
                self.queue.ack(delivery).await?;
                Err(e.into())
            }
        }
    }

    /// Receives and handles at most one message.
    pub async fn process_next(&self, wait: Duration) -> Result<Option<PersistOutcome>> {
        match self.queue.receive(wait).await? {
            Some(delivery) => self.handle(&delivery).await.map(Some),
            None => Ok(None),
        }
    }

    /// Consumes until `shutdown` turns `true` or its sender is dropped.
    pub async fn run(self: Arc<Self>, worker: usize, mut shutdown: watch::Receiver<bool>) {
        debug!(worker, queue = self.queue.name(), "order consumer worker started");
        if *shutdown.borrow() {
            return;
        }

        loop {
            tokio::select! {
                biased;

                result = shutdown.changed() => {
                    match result {
                        Ok(()) if *shutdown.borrow() => break,
                        Ok(()) => {}
                        Err(_) => break,
                    }
                }
                received = self.queue.receive(self.receive_timeout) => {
                    match received {
                        Ok(Some(delivery)) => {
                            // Failures are logged and settled inside `handle`.
                            let _ = self.handle(&delivery).await;
                        }
                        Ok(None) => {}
                        Err(e) => {
                            warn!(worker, error = %e, "failed to receive from order queue");
                            tokio::time::sleep(self.receive_timeout).await;
                        }
                    }
                }
            }
        }
        debug!(worker, "order consumer worker stopped");
    }

    /// Returns orphaned in-flight messages to the queue, then spawns
    /// `workers` consumer tasks.
    pub async fn start(self: Arc<Self>, workers: usize) -> Result<ConsumerHandle> {
        let recovered = self.queue.recover().await?;
        metrics::record_redeliveries(recovered);

        let (shutdown, receiver) = watch::channel(false);
        let workers = workers.max(1);
        let handles = (0..workers)
            .map(|worker| {
                let consumer = Arc::clone(&self);
                let receiver = receiver.clone();
                tokio::spawn(consumer.run(worker, receiver))
            })
            .collect();
        info!(workers, recovered, queue = self.queue.name(), "order consumer started");
        Ok(ConsumerHandle { shutdown, handles })
    }
}

impl std::fmt::Debug for OrderConsumer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OrderConsumer")
            .field("orders", &self.orders.backend_name())
            .field("queue", &self.queue.name())
            .field("receive_timeout", &self.receive_timeout)
            .finish()
    }
}

async fn apply(
    tx: &mut dyn OrderTransaction,
    intent: &PurchaseIntent,
) -> std::result::Result<PersistOutcome, StorageError> {
    if tx.order_exists(intent.user_id, intent.voucher_id).await? {
        return Ok(PersistOutcome::Duplicate);
    }
    if !tx.decrement_stock(intent.voucher_id).await? {
        return Ok(PersistOutcome::OutOfStock);
    }
    match tx.insert_order(&Order::from_intent(intent)).await {
        Ok(()) => Ok(PersistOutcome::Persisted),
        Err(e) if e.is_already_exists() => Ok(PersistOutcome::Duplicate),
        Err(e) => Err(e),
    }
}

async fn rollback(tx: Box<dyn OrderTransaction>) {
    if let Err(e) = tx.rollback().await {
        warn!(error = %e, "order transaction rollback failed");
    }
}

/// Running consumer workers.
#[derive(Debug)]
pub struct ConsumerHandle {
    shutdown: watch::Sender<bool>,
    handles: Vec<JoinHandle<()>>,
}

impl ConsumerHandle {
    pub fn worker_count(&self) -> usize {
        self.handles.len()
    }

    /// Signals every worker and waits for them to finish the message in hand.
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        for handle in self.handles {
            if let Err(e) = handle.await {
                error!(error = %e, "order consumer worker panicked");
            }
        }
        info!("order consumer stopped");
    }
}
