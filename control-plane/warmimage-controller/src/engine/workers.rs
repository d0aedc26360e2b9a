use std::sync::Arc;

use async_trait::async_trait;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::queue::WorkQueue;

/// What the worker pool does with a key whose reconcile failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Transient failure: retry with backoff, indefinitely.
    Requeue,
    /// The key can never succeed: forget it.
    Drop,
}

pub trait Classify {
    fn disposition(&self) -> Disposition;
}

/// Per-key convergence logic driven by the worker pool.
#[async_trait]
pub trait Reconciler: Send + Sync + 'static {
    type Error: std::error::Error + Classify + Send + Sync + 'static;

    async fn reconcile(&self, key: &str) -> Result<(), Self::Error>;
}

/// Fixed set of workers draining one queue into one reconciler.
pub struct WorkerPool<R> {
    queue: Arc<WorkQueue>,
    reconciler: Arc<R>,
}

impl<R: Reconciler> WorkerPool<R> {
    pub fn new(queue: Arc<WorkQueue>, reconciler: Arc<R>) -> Self {
        Self { queue, reconciler }
    }

    /// Run `threads` workers until `shutdown` fires, then shut the queue
    /// down and wait for every in-flight key to finish.
    pub async fn run(&self, threads: usize, shutdown: CancellationToken) {
        let threads = threads.max(1);
        info!(queue = %self.queue.name(), threads, "starting workers");
        let mut workers = JoinSet::new();
        for id in 0..threads {
            let queue = self.queue.clone();
            let reconciler = self.reconciler.clone();
            workers.spawn(async move {
                while process_next_item(&queue, &reconciler).await {}
                debug!(worker = id, "worker exiting");
            });
        }

        shutdown.cancelled().await;
        info!(queue = %self.queue.name(), "shutting down workers");
        self.queue.shut_down();
        while let Some(res) = workers.join_next().await {
            if let Err(e) = res {
                error!(error = %e, "worker task failed");
            }
        }
        info!(queue = %self.queue.name(), "workers stopped");
    }
}

/// Take one key off the queue and reconcile it. Returns `false` once the
/// queue has shut down.
///
/// The reconcile runs on its own task so a panic surfaces as a `JoinError`
/// instead of unwinding through the worker.
pub async fn process_next_item<R: Reconciler>(queue: &Arc<WorkQueue>, reconciler: &Arc<R>) -> bool {
    let Some(key) = queue.get().await else {
        return false;
    };

    let task = {
        let reconciler = reconciler.clone();
        let key = key.clone();
        tokio::spawn(async move { reconciler.reconcile(&key).await })
    };

    match task.await {
        Ok(Ok(())) => {
            queue.forget(&key);
            queue.done(&key);
            debug!(%key, "reconcile succeeded");
        }
        Ok(Err(err)) => match err.disposition() {
            Disposition::Drop => {
                warn!(%key, error = %err, "dropping key from queue");
                queue.forget(&key);
                queue.done(&key);
            }
            Disposition::Requeue => {
                error!(%key, error = %err, requeues = queue.num_requeues(&key), "reconcile failed; requeuing");
                queue.done(&key);
                queue.add_rate_limited(key);
            }
        },
        Err(join_err) => {
            error!(%key, panicked = join_err.is_panic(), error = %join_err, "reconcile aborted; requeuing");
            queue.done(&key);
            queue.add_rate_limited(key);
        }
    }
    true
}
