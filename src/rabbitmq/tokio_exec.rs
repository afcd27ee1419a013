// src/rabbitmq/tokio_exec.rs
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use futures::future::BoxFuture;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// A delayed job handed to a [`RetryExecutor`].
pub type Job = BoxFuture<'static, ()>;

/// Sequential delayed-task runner used for reconnect attempts.
pub trait RetryExecutor: Send + Sync + 'static {
    /// Queues `job` to run once after `delay`. Returns `false` once the
    /// executor has been shut down.
    fn schedule(&self, delay: Duration, job: Job) -> bool;

    /// Drops every queued job and interrupts the one currently waiting or running.
    fn shutdown_now(&self);

    /// Jobs queued whose delay has not elapsed yet.
    fn pending(&self) -> usize;

    fn is_shutdown(&self) -> bool;
}

struct Scheduled {
    delay: Duration,
    job: Job,
}

/// Single Tokio worker task that runs scheduled jobs one at a time, in order.
///
/// Must be created from within a Tokio runtime.
pub struct TokioExecutor {
    sender: mpsc::UnboundedSender<Scheduled>,
    worker: Mutex<Option<JoinHandle<()>>>,
    pending: Arc<AtomicUsize>,
    shut_down: AtomicBool,
}

impl TokioExecutor {
    pub fn new() -> Self {
        let (sender, mut receiver) = mpsc::unbounded_channel::<Scheduled>();
        let pending = Arc::new(AtomicUsize::new(0));

        let worker_pending = Arc::clone(&pending);
        let worker = tokio::spawn(async move {
            while let Some(Scheduled { delay, job }) = receiver.recv().await {
                tokio::time::sleep(delay).await;
                worker_pending.fetch_sub(1, Ordering::SeqCst);
                job.await;
            }
            debug!("Retry executor queue closed");
        });

        Self {
            sender,
            worker: Mutex::new(Some(worker)),
            pending,
            shut_down: AtomicBool::new(false),
        }
    }
}

impl RetryExecutor for TokioExecutor {
    fn schedule(&self, delay: Duration, job: Job) -> bool {
        if self.shut_down.load(Ordering::SeqCst) {
            debug!("Retry executor is shut down, dropping job");
            return false;
        }

        self.pending.fetch_add(1, Ordering::SeqCst);
        if self.sender.send(Scheduled { delay, job }).is_err() {
            self.pending.fetch_sub(1, Ordering::SeqCst);
            warn!("Retry executor worker is gone, dropping job");
            return false;
        }
        true
    }

    fn shutdown_now(&self) {
        if self.shut_down.swap(true, Ordering::SeqCst) {
            return;
        }

        let worker = self.worker.lock().unwrap_or_else(PoisonError::into_inner).take();
        if let Some(worker) = worker {
            worker.abort();
        }
        self.pending.store(0, Ordering::SeqCst);
        debug!("Retry executor shut down");
    }

    fn pending(&self) -> usize {
        self.pending.load(Ordering::SeqCst)
    }

    fn is_shutdown(&self) -> bool {
        self.shut_down.load(Ordering::SeqCst)
    }
}

impl Drop for TokioExecutor {
    fn drop(&mut self) {
        self.shutdown_now();
    }
}
