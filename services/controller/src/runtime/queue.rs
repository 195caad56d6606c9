//! De-duplicating work queue.
//!
//! A key is handed out to at most one worker at a time. A key added while it
//! is queued collapses into the queued entry; a key added while it is being
//! processed is queued once more when processing is done.

use std::collections::{HashSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use cellmesh_reconcile::{Backoff, ObjectKey};
use tokio::sync::Notify;
use tracing::debug;

#[derive(Clone)]
pub struct WorkQueue {
    inner: Arc<Inner>,
}

struct Inner {
    state: Mutex<QueueState>,
    notify: Notify,
}

#[derive(Default)]
struct QueueState {
    /// Keys waiting to be handed out, in order.
    queue: VecDeque<ObjectKey>,
    /// Keys that need processing: queued, or re-added while processing.
    dirty: HashSet<ObjectKey>,
    /// Keys currently handed out.
    processing: HashSet<ObjectKey>,
    backoff: Backoff,
    shutdown: bool,
}

impl WorkQueue {
    pub fn new() -> Self {
        Self::with_backoff(Backoff::default())
    }

    pub fn with_backoff(backoff: Backoff) -> Self {
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(QueueState {
                    backoff,
                    ..QueueState::default()
                }),
                notify: Notify::new(),
            }),
        }
    }

    fn state(&self) -> MutexGuard<'_, QueueState> {
        self.inner
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Mark `key` as needing processing.
    pub fn add(&self, key: ObjectKey) {
        let mut state = self.state();
        if state.shutdown || state.dirty.contains(&key) {
            return;
        }
        state.dirty.insert(key.clone());
        if state.processing.contains(&key) {
            return;
        }
        state.queue.push_back(key);
        drop(state);
        self.inner.notify.notify_one();
    }

    /// Add `key` once `delay` has passed.
    pub fn add_after(&self, key: ObjectKey, delay: Duration) {
        if delay.is_zero() {
            self.add(key);
            return;
        }
        let queue = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            queue.add(key);
        });
    }

    /// Add `key` after its next backoff delay.
    pub fn add_rate_limited(&self, key: ObjectKey) {
        let delay = self.state().backoff.next_delay(&key.to_string());
        debug!(key = %key, delay_ms = delay.as_millis() as u64, "Requeueing with backoff");
        self.add_after(key, delay);
    }

    /// Reset the backoff of `key` after a successful pass.
    pub fn forget(&self, key: &ObjectKey) {
        self.state().backoff.reset(&key.to_string());
    }

    /// Consecutive failures recorded for `key`.
    pub fn failures(&self, key: &ObjectKey) -> u32 {
        self.state().backoff.failures(&key.to_string())
    }

    /// Wait for the next key. Returns `None` once the queue is shut down.
    ///
    /// The key stays in flight until [`done`](Self::done) is called.
    pub async fn next(&self) -> Option<ObjectKey> {
        loop {
            {
                let mut state = self.state();
                if state.shutdown {
                    return None;
                }
                if let Some(key) = state.queue.pop_front() {
                    state.dirty.remove(&key);
                    state.processing.insert(key.clone());
                    return Some(key);
                }
            }
            self.inner.notify.notified().await;
        }
    }

    /// Finish processing `key`, queueing it again if it was re-added.
    pub fn done(&self, key: &ObjectKey) {
        let mut state = self.state();
        state.processing.remove(key);
        if state.dirty.contains(key) && !state.shutdown {
            state.queue.push_back(key.clone());
            drop(state);
            self.inner.notify.notify_one();
        }
    }

    /// Stop handing out keys. Keys in flight may still be marked done.
    pub fn shutdown(&self) {
        self.state().shutdown = true;
        self.inner.notify.notify_waiters();
        self.inner.notify.notify_one();
    }

    pub fn is_shutdown(&self) -> bool {
        self.state().shutdown
    }

    /// Number of keys waiting to be handed out.
    pub fn len(&self) -> usize {
        self.state().queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for WorkQueue {
    fn default() -> Self {
        Self::new()
    }
}
