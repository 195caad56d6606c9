//! Cell mesh controller
//!
//! Watches cells, composites, components, gateways and token services and
//! converges the Kubernetes, Knative and Istio resources each one needs.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context as _, Result};
use cellmesh_controller::{
    config::{self, load_mesh},
    controller::{
        CellController, ComponentController, CompositeController, GatewayController,
        Orchestrator, ParentController, ParentReconciler, TokenServiceController,
    },
    kube::{resync, watch_kind, watch_mesh, KubeRecorder, KubeStore, Queues},
    routing::RoutingCompiler,
    runtime::{KindWorker, WorkQueue},
    state::{MeshState, SharedMeshState},
};
use cellmesh_events::{EventRecorder, Fanout, TracingRecorder};
use cellmesh_reconcile::{ResourceKind, Store};
use kube::Client;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration
    let config = config::Config::from_env()?;

    // Initialize tracing (prefer RUST_LOG, fallback to MESH_LOG_LEVEL)
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| config.log_level.clone().into());
    let registry = tracing_subscriber::registry().with(filter);
    if config.log_json {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }

    info!("Starting mesh controller");
    info!(namespace = %config.namespace, canary_lanes = config.canary_lanes, "Configuration loaded");

    let client = match Client::try_default().await {
        Ok(client) => client,
        Err(e) => {
            error!(error = %e, "Failed to create cluster client");
            return Err(e.into());
        }
    };

    let store: Arc<dyn Store> = Arc::new(KubeStore::new(client.clone()));
    let (mesh, secret) = load_mesh(store.as_ref(), &config)
        .await
        .context("loading mesh configuration")?;
    let state = SharedMeshState::new(MeshState::new(
        mesh,
        secret,
        RoutingCompiler::new(config.canary_lanes),
    ));

    let (kube_recorder, recorder_handle) = KubeRecorder::spawn(client.clone());
    let recorder: Arc<dyn EventRecorder> = Arc::new(Fanout::new(vec![
        Box::new(TracingRecorder),
        Box::new(kube_recorder),
    ]));

    // Create shutdown channel for graceful shutdown
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let reconcilers: Vec<Arc<dyn ParentReconciler>> = vec![
        orchestrator(CellController, &store, &recorder, &state),
        orchestrator(CompositeController, &store, &recorder, &state),
        orchestrator(ComponentController, &store, &recorder, &state),
        orchestrator(GatewayController, &store, &recorder, &state),
        orchestrator(TokenServiceController, &store, &recorder, &state),
    ];

    // Start one worker per parent kind
    let mut queues = Queues::new();
    let mut worker_handles: Vec<JoinHandle<()>> = Vec::new();
    for reconciler in reconcilers {
        let queue = WorkQueue::new();
        queues.insert(reconciler.kind(), queue.clone());
        let worker = KindWorker::new(queue, reconciler);
        let shutdown_rx = shutdown_rx.clone();
        worker_handles.push(tokio::spawn(async move { worker.run(shutdown_rx).await }));
    }
    let queues = Arc::new(queues);

    // Watch every kind; children map back to their parents
    let mut watch_handles: Vec<JoinHandle<()>> = ResourceKind::ALL
        .into_iter()
        .map(|kind| {
            tokio::spawn(watch_kind(
                client.clone(),
                kind,
                queues.clone(),
                shutdown_rx.clone(),
            ))
        })
        .collect();
    watch_handles.push(tokio::spawn(watch_mesh(
        client.clone(),
        store.clone(),
        config.clone(),
        state.clone(),
        queues.clone(),
        shutdown_rx.clone(),
    )));
    watch_handles.push(tokio::spawn(resync(
        client,
        queues.clone(),
        config.resync_interval,
        shutdown_rx,
    )));

    // Wait for shutdown signal (Ctrl+C)
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("Received shutdown signal"),
        Err(e) => error!(error = %e, "Failed to listen for shutdown signal"),
    }

    // Signal shutdown to all workers
    let _ = shutdown_tx.send(true);
    queues.shutdown();

    // Wait for workers to finish their current pass
    info!("Waiting for workers to shut down...");
    let shutdown_timeout = Duration::from_secs(10);
    for handle in worker_handles {
        if let Err(e) = tokio::time::timeout(shutdown_timeout, handle).await {
            warn!(error = %e, "Worker did not shut down in time");
        }
    }
    for handle in watch_handles {
        handle.abort();
    }
    recorder_handle.abort();

    info!("Mesh controller stopped");
    Ok(())
}

fn orchestrator<C: ParentController>(
    controller: C,
    store: &Arc<dyn Store>,
    recorder: &Arc<dyn EventRecorder>,
    state: &SharedMeshState,
) -> Arc<dyn ParentReconciler> {
    Arc::new(Orchestrator::new(
        controller,
        store.clone(),
        recorder.clone(),
        state.clone(),
    ))
}
