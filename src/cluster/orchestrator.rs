//! Orchestrator - runs the slice controller in the background
//!
//! Three kinds of tasks share one work queue:
//! - Workers that pull keys and reconcile them
//! - An event forwarder that enqueues keys published by the store
//! - A resync ticker that enqueues every workload, so missed events heal
//!
//! All of them stop when the returned shutdown sender is dropped or fires.

use std::sync::Arc;

use tokio::sync::{broadcast, watch};
use tokio::time::interval;
use tracing::{debug, error, info, warn};

use super::controller::SliceController;
use super::workqueue::WorkQueue;

/// Configuration for the orchestrator
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Reconcile workers
    pub workers: usize,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self { workers: 4 }
    }
}

/// Spawn the controller loops as background tasks
pub fn spawn_orchestrator(
    controller: Arc<SliceController>,
    events: broadcast::Receiver<String>,
    config: OrchestratorConfig,
) -> watch::Sender<()> {
    let (shutdown_tx, shutdown_rx) = watch::channel(());
    let queue = WorkQueue::new();

    for id in 0..config.workers.max(1) {
        tokio::spawn(run_worker(
            id,
            controller.clone(),
            queue.clone(),
            shutdown_rx.clone(),
        ));
    }
    tokio::spawn(forward_events(
        controller.clone(),
        events,
        queue.clone(),
        shutdown_rx.clone(),
    ));
    tokio::spawn(resync(controller.clone(), queue, shutdown_rx));

    info!(
        "Orchestrator started with {} workers, resync every {:?}",
        config.workers.max(1),
        controller.settings().resync_interval
    );

    shutdown_tx
}

async fn run_worker(
    id: usize,
    controller: Arc<SliceController>,
    queue: WorkQueue,
    mut shutdown_rx: watch::Receiver<()>,
) {
    loop {
        let key = tokio::select! {
            key = queue.next() => key,
            _ = shutdown_rx.changed() => break,
        };

        match controller.reconcile_key(&key).await {
            Ok(outcome) => {
                queue.forget(&key).await;
                if let Some(delay) = outcome.requeue_after {
                    queue.add_after(&key, delay);
                }
            }
            Err(e) => {
                let failures = queue.record_failure(&key).await;
                let delay = controller.settings().retry.backoff(failures);
                error!(worker = id, workload = %key, "reconcile failed, retrying in {:?}: {}", delay, e);
                queue.add_after(&key, delay);
            }
        }
        queue.done(&key).await;
    }
    debug!(worker = id, "worker stopped");
}

async fn forward_events(
    controller: Arc<SliceController>,
    mut events: broadcast::Receiver<String>,
    queue: WorkQueue,
    mut shutdown_rx: watch::Receiver<()>,
) {
    loop {
        tokio::select! {
            event = events.recv() => match event {
                Ok(key) => queue.add(&key).await,
                Err(broadcast::error::RecvError::Lagged(missed)) => {
                    warn!("missed {} store events, resyncing", missed);
                    enqueue_all(&controller, &queue).await;
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },
            _ = shutdown_rx.changed() => break,
        }
    }
    debug!("event forwarder stopped");
}

async fn resync(
    controller: Arc<SliceController>,
    queue: WorkQueue,
    mut shutdown_rx: watch::Receiver<()>,
) {
    let mut ticker = interval(controller.settings().resync_interval);
    loop {
        tokio::select! {
            _ = ticker.tick() => enqueue_all(&controller, &queue).await,
            _ = shutdown_rx.changed() => {
                info!("Orchestrator shutting down");
                break;
            }
        }
    }
}

async fn enqueue_all(controller: &SliceController, queue: &WorkQueue) {
    match controller.list_keys().await {
        Ok(keys) => {
            debug!("resync: {} workloads", keys.len());
            for key in keys {
                queue.add(&key).await;
            }
        }
        Err(e) => warn!("resync failed to list workloads: {}", e),
    }
}
