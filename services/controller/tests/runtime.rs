//! Work queue and worker behavior with a scripted reconciler.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use cellmesh_controller::controller::ParentReconciler;
use cellmesh_controller::runtime::{KindWorker, WorkQueue};
use cellmesh_reconcile::{Backoff, ObjectKey, ReconcileError, ResourceKind, StoreError};
use tokio::sync::watch;

/// Fails each key a scripted number of times, then succeeds.
#[derive(Default)]
struct Scripted {
    failures: Mutex<HashMap<ObjectKey, u32>>,
    calls: Mutex<Vec<ObjectKey>>,
    delay: Duration,
}

impl Scripted {
    fn failing(key: &ObjectKey, times: u32) -> Self {
        let scripted = Self::default();
        scripted.failures.lock().unwrap().insert(key.clone(), times);
        scripted
    }

    fn calls(&self) -> Vec<ObjectKey> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl ParentReconciler for Scripted {
    fn kind(&self) -> ResourceKind {
        ResourceKind::Component
    }

    async fn reconcile(&self, key: &ObjectKey) -> Result<(), ReconcileError> {
        self.calls.lock().unwrap().push(key.clone());
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        let mut failures = self.failures.lock().unwrap();
        match failures.get_mut(key) {
            Some(remaining) if *remaining > 0 => {
                *remaining -= 1;
                Err(StoreError::Transient("apiserver unavailable".to_string()).into())
            }
            _ => Ok(()),
        }
    }
}

fn key(name: &str) -> ObjectKey {
    ObjectKey::new("default", name)
}

fn fast_queue() -> WorkQueue {
    WorkQueue::with_backoff(Backoff::new(Duration::from_millis(5), Duration::from_millis(20)))
}

async fn wait_for(mut check: impl FnMut() -> bool) {
    for _ in 0..200 {
        if check() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("condition not reached in time");
}

#[tokio::test]
async fn test_failed_pass_is_retried_until_success() {
    let queue = fast_queue();
    let reconciler = Arc::new(Scripted::failing(&key("hr"), 2));
    let worker = KindWorker::new(queue.clone(), reconciler.clone());
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let handle = tokio::spawn(async move { worker.run(shutdown_rx).await });

    queue.add(key("hr"));
    wait_for(|| reconciler.calls().len() == 3).await;
    wait_for(|| queue.failures(&key("hr")) == 0).await;

    shutdown_tx.send(true).unwrap();
    handle.await.unwrap();
    assert!(queue.is_shutdown());
}

#[tokio::test]
async fn test_key_added_in_flight_runs_once_more() {
    let queue = fast_queue();
    queue.add(key("hr"));
    let in_flight = queue.next().await.unwrap();

    queue.add(key("hr"));
    queue.add(key("hr"));
    assert!(queue.is_empty());

    queue.done(&in_flight);
    assert_eq!(queue.len(), 1);
    assert_eq!(queue.next().await, Some(key("hr")));
    queue.done(&key("hr"));
    assert!(queue.is_empty());
}

#[tokio::test]
async fn test_in_flight_key_is_not_handed_out_twice() {
    let queue = fast_queue();
    queue.add(key("hr"));
    queue.add(key("stock"));

    let first = queue.next().await.unwrap();
    queue.add(first.clone());
    let second = queue.next().await.unwrap();
    assert_ne!(first, second);

    let third = tokio::time::timeout(Duration::from_millis(20), queue.next()).await;
    assert!(third.is_err(), "in-flight key was handed out again");
}

#[tokio::test]
async fn test_shutdown_finishes_current_pass() {
    let queue = fast_queue();
    let reconciler = Arc::new(Scripted {
        delay: Duration::from_millis(30),
        ..Scripted::default()
    });
    let worker = KindWorker::new(queue.clone(), reconciler.clone());
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    queue.add(key("hr"));
    let handle = tokio::spawn(async move { worker.run(shutdown_rx).await });
    wait_for(|| !reconciler.calls().is_empty()).await;

    shutdown_tx.send(true).unwrap();
    queue.add(key("stock"));
    handle.await.unwrap();

    assert_eq!(reconciler.calls(), vec![key("hr")]);
}
