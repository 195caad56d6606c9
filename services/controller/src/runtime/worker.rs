//! Per-kind worker draining one work queue.

use std::sync::Arc;

use cellmesh_reconcile::ObjectKey;
use tokio::sync::watch;
use tracing::{debug, info, instrument, warn};

use super::queue::WorkQueue;
use crate::controller::ParentReconciler;

/// Runs passes for keys of one parent kind, one at a time.
pub struct KindWorker {
    queue: WorkQueue,
    reconciler: Arc<dyn ParentReconciler>,
}

impl KindWorker {
    pub fn new(queue: WorkQueue, reconciler: Arc<dyn ParentReconciler>) -> Self {
        Self { queue, reconciler }
    }

    /// Run until shutdown is signaled or the queue is shut down. A pass in
    /// progress is always finished.
    #[instrument(skip_all, fields(kind = %self.reconciler.kind()))]
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!("Starting worker");

        loop {
            tokio::select! {
                biased;

                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        self.queue.shutdown();
                        break;
                    }
                }
                key = self.queue.next() => {
                    let Some(key) = key else {
                        break;
                    };
                    self.process(key).await;
                }
            }
        }

        info!("Worker shutting down");
    }

    /// Run one pass for `key`: a failure requeues it with backoff, a success
    /// resets its backoff.
    pub async fn process(&self, key: ObjectKey) {
        match self.reconciler.reconcile(&key).await {
            Ok(()) => {
                debug!(key = %key, "Reconciled");
                self.queue.forget(&key);
            }
            Err(e) => {
                warn!(
                    key = %key,
                    error = %e,
                    permanent = e.is_permanent(),
                    "Reconcile failed, requeueing"
                );
                self.queue.add_rate_limited(key.clone());
            }
        }
        self.queue.done(&key);
    }
}
