//! Cluster watches feeding the per-kind work queues.
//!
//! Parents enqueue themselves. Every other object enqueues the parent named
//! by its controlling owner reference, so a changed or deleted child brings
//! its parent back to a reconcile pass. A change to the mesh ConfigMap or
//! Secret reloads the shared mesh state and enqueues every parent.

use std::collections::HashMap;
use std::pin::pin;
use std::sync::Arc;
use std::time::Duration;

use cellmesh_reconcile::{ObjectKey, ResourceKind, Store};
use futures_util::StreamExt;
use kube::api::{Api, DynamicObject, ListParams};
use kube::runtime::{watcher, WatchStreamExt};
use kube::{Client, ResourceExt};
use tokio::sync::watch;
use tracing::{debug, info, instrument, warn};

use super::store::api_resource;
use crate::config::Config;
use crate::runtime::WorkQueue;
use crate::state::SharedMeshState;

/// Work queues by parent kind.
#[derive(Clone, Default)]
pub struct Queues {
    queues: HashMap<ResourceKind, WorkQueue>,
}

impl Queues {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the queue for a parent kind.
    pub fn insert(&mut self, kind: ResourceKind, queue: WorkQueue) {
        self.queues.insert(kind, queue);
    }

    pub fn get(&self, kind: ResourceKind) -> Option<&WorkQueue> {
        self.queues.get(&kind)
    }

    pub fn kinds(&self) -> impl Iterator<Item = ResourceKind> + '_ {
        self.queues.keys().copied()
    }

    /// Queue the parents an observed object of `kind` maps to.
    pub fn enqueue(&self, kind: ResourceKind, obj: &DynamicObject) {
        let namespace = obj.namespace().unwrap_or_default();

        if let Some(queue) = self.get(kind) {
            queue.add(ObjectKey::new(namespace.clone(), obj.name_any()));
        }

        let owner = obj
            .owner_references()
            .iter()
            .find(|r| r.controller == Some(true))
            .and_then(|r| Some((ResourceKind::from_api(&r.api_version, &r.kind)?, r)));
        if let Some((owner_kind, owner)) = owner {
            if let Some(queue) = self.get(owner_kind) {
                queue.add(ObjectKey::new(namespace, owner.name.clone()));
            }
        }
    }

    /// Shut down every queue.
    pub fn shutdown(&self) {
        for queue in self.queues.values() {
            queue.shutdown();
        }
    }
}

/// Watch every object of `kind` across namespaces until shutdown.
#[instrument(skip_all, fields(kind = %kind))]
pub async fn watch_kind(
    client: Client,
    kind: ResourceKind,
    queues: Arc<Queues>,
    mut shutdown: watch::Receiver<bool>,
) {
    let api: Api<DynamicObject> = Api::all_with(client, &api_resource(kind));
    let mut stream = pin!(watcher(api, watcher::Config::default())
        .default_backoff()
        .touched_objects());

    info!("Watching");
    loop {
        tokio::select! {
            item = stream.next() => match item {
                Some(Ok(obj)) => queues.enqueue(kind, &obj),
                Some(Err(e)) => warn!(error = %e, "Watch error"),
                None => break,
            },
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
        }
    }
    debug!("Watch stopped");
}

/// Periodically queue every parent, catching anything a watch missed.
#[instrument(skip_all)]
pub async fn resync(
    client: Client,
    queues: Arc<Queues>,
    period: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(period);
    // The first tick completes immediately and the watches already list.
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = ticker.tick() => enqueue_all(&client, &queues).await,
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
        }
    }
}

/// Watch the mesh ConfigMap and Secret. Each change reloads the shared mesh
/// state; if the content differs every parent is queued again.
#[instrument(skip_all, fields(namespace = %config.namespace))]
pub async fn watch_mesh(
    client: Client,
    store: Arc<dyn Store>,
    config: Config,
    state: SharedMeshState,
    queues: Arc<Queues>,
    mut shutdown: watch::Receiver<bool>,
) {
    let configs = mesh_watch(&client, &config, ResourceKind::ConfigMap, &config.config_name);
    let secrets = mesh_watch(&client, &config, ResourceKind::Secret, &config.secret_name);
    let mut stream = pin!(futures_util::stream::select(configs, secrets));

    info!("Watching mesh configuration");
    loop {
        tokio::select! {
            item = stream.next() => match item {
                Some(Ok(_)) => match state.reload(store.as_ref(), &config).await {
                    Ok(true) => enqueue_all(&client, &queues).await,
                    Ok(false) => debug!("Mesh configuration unchanged"),
                    Err(e) => warn!(error = %e, "Failed to reload mesh configuration"),
                },
                Some(Err(e)) => warn!(error = %e, "Mesh watch error"),
                None => break,
            },
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
        }
    }
    debug!("Mesh watch stopped");
}

fn mesh_watch(
    client: &Client,
    config: &Config,
    kind: ResourceKind,
    name: &str,
) -> impl futures_util::Stream<Item = Result<DynamicObject, watcher::Error>> + Send {
    let api: Api<DynamicObject> =
        Api::namespaced_with(client.clone(), &config.namespace, &api_resource(kind));
    let selector = watcher::Config::default().fields(&format!("metadata.name={name}"));
    watcher(api, selector).default_backoff().touched_objects()
}

/// List and queue every parent of every registered kind.
async fn enqueue_all(client: &Client, queues: &Queues) {
    for kind in queues.kinds() {
        let api: Api<DynamicObject> = Api::all_with(client.clone(), &api_resource(kind));
        match api.list(&ListParams::default()).await {
            Ok(list) => {
                debug!(kind = %kind, count = list.items.len(), "Queueing every parent");
                for obj in &list.items {
                    queues.enqueue(kind, obj);
                }
            }
            Err(e) => warn!(kind = %kind, error = %e, "Listing parents failed"),
        }
    }
}
