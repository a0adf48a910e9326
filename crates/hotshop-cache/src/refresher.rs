//! Bounded worker pool for background cache refreshes.
//!
//! The pool keeps `core_workers` workers alive, grows up to `max_workers`
//! when its queue is full, and shrinks back once extra workers have been
//! idle for `keep_alive`. When both the queue and the workers are saturated,
//! new tasks are dropped: readers keep serving stale data instead of piling
//! more load onto the system of record.

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use futures_util::FutureExt;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::task::JoinHandle;

use crate::config::RefresherConfig;
use crate::metrics;

type RefreshTask = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;
type SharedReceiver = Arc<tokio::sync::Mutex<mpsc::Receiver<RefreshTask>>>;

/// Why a task was not accepted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum SubmitError {
    #[error("refresh pool saturated")]
    Saturated,
    #[error("refresh pool shut down")]
    ShutDown,
}

/// Owned pool of refresh workers. Dropping the pool without calling
/// [`RefreshPool::shutdown`] lets workers finish queued tasks in the
/// background.
pub struct RefreshPool {
    sender: Mutex<Option<mpsc::Sender<RefreshTask>>>,
    receiver: SharedReceiver,
    workers: Arc<AtomicUsize>,
    handles: Mutex<Vec<JoinHandle<()>>>,
    config: RefresherConfig,
}

impl RefreshPool {
    /// Starts the core workers. Must be called within a Tokio runtime.
    pub fn new(config: RefresherConfig) -> Self {
        let capacity = config.queue_capacity.max(1);
        let (sender, receiver) = mpsc::channel(capacity);
        let pool = Self {
            sender: Mutex::new(Some(sender)),
            receiver: Arc::new(tokio::sync::Mutex::new(receiver)),
            workers: Arc::new(AtomicUsize::new(0)),
            handles: Mutex::new(Vec::new()),
            config,
        };
        for _ in 0..pool.config.core_workers.max(1) {
            pool.workers.fetch_add(1, Ordering::SeqCst);
            pool.spawn_worker(None, None);
        }
        tracing::debug!(
            core_workers = pool.config.core_workers,
            max_workers = pool.config.max_workers,
            queue_capacity = capacity,
            "refresh pool started"
        );
        pool
    }

    /// Queues a task without waiting.
    pub fn submit<F>(&self, task: F) -> Result<(), SubmitError>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let sender = self.sender.lock().clone().ok_or(SubmitError::ShutDown)?;
        match sender.try_send(Box::pin(task)) {
            Ok(()) => {
                metrics::record_refresh("submitted");
                Ok(())
            }
            Err(TrySendError::Full(task)) => {
                if self.reserve_extra_worker() {
                    tracing::debug!(
                        workers = self.worker_count(),
                        "refresh queue full, adding worker"
                    );
                    self.spawn_worker(Some(task), Some(self.config.keep_alive()));
                    metrics::record_refresh("submitted");
                    Ok(())
                } else {
                    metrics::record_refresh("dropped");
                    tracing::warn!(
                        workers = self.worker_count(),
                        "refresh pool saturated, dropping task"
                    );
                    Err(SubmitError::Saturated)
                }
            }
            Err(TrySendError::Closed(_)) => Err(SubmitError::ShutDown),
        }
    }

    /// Live workers, including extra ones.
    pub fn worker_count(&self) -> usize {
        self.workers.load(Ordering::SeqCst)
    }

    /// Tasks waiting for a worker.
    pub fn queued(&self) -> usize {
        match self.sender.lock().as_ref() {
            Some(sender) => sender.max_capacity() - sender.capacity(),
            None => 0,
        }
    }

    /// Stops accepting tasks, runs everything already queued and waits for
    /// all workers to exit.
    pub async fn shutdown(&self) {
        let Some(sender) = self.sender.lock().take() else {
            return;
        };
        drop(sender);
        let handles = std::mem::take(&mut *self.handles.lock());
        for handle in handles {
            if let Err(e) = handle.await {
                tracing::error!(error = %e, "refresh worker terminated abnormally");
            }
        }
        tracing::debug!("refresh pool stopped");
    }

    fn reserve_extra_worker(&self) -> bool {
        let max = self.config.max_workers.max(self.config.core_workers);
        self.workers
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| {
                (n < max).then_some(n + 1)
            })
            .is_ok()
    }

    fn spawn_worker(&self, first: Option<RefreshTask>, keep_alive: Option<Duration>) {
        let receiver = self.receiver.clone();
        let workers = self.workers.clone();
        let handle = tokio::spawn(async move {
            if let Some(task) = first {
                run_task(task).await;
            }
            loop {
                let next = match keep_alive {
                    None => receiver.lock().await.recv().await,
                    Some(idle) => {
                        let recv = async { receiver.lock().await.recv().await };
                        match tokio::time::timeout(idle, recv).await {
                            Ok(next) => next,
                            Err(_) => {
                                tracing::debug!("idle refresh worker exiting");
                                break;
                            }
                        }
                    }
                };
                match next {
                    Some(task) => run_task(task).await,
                    None => break,
                }
            }
            workers.fetch_sub(1, Ordering::SeqCst);
        });

        let mut handles = self.handles.lock();
        handles.retain(|h| !h.is_finished());
        handles.push(handle);
    }
}

async fn run_task(task: RefreshTask) {
    match AssertUnwindSafe(task).catch_unwind().await {
        Ok(()) => metrics::record_refresh("executed"),
        Err(_) => {
            metrics::record_refresh("failed");
            tracing::error!("refresh task panicked");
        }
    }
}

impl std::fmt::Debug for RefreshPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RefreshPool")
            .field("workers", &self.worker_count())
            .field("queued", &self.queued())
            .field("config", &self.config)
            .finish()
    }
}
