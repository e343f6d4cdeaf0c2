use metrics_exporter_prometheus::PrometheusHandle;
use salepath::error::AppError;
use salepath::workflows::sale::{
    DispatchError, PermissionMatrix, PhaseGraph, PhaseReachedEvent, SideEffectDispatcher,
};
use std::path::Path;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::info;

#[derive(Clone)]
pub(crate) struct AppState {
    pub(crate) readiness: Arc<AtomicBool>,
    pub(crate) metrics: Arc<PrometheusHandle>,
}

/// Default depth of the outbox between the engine and the delivery task.
pub(crate) const OUTBOX_CAPACITY: usize = 1024;

/// Hands phase-reached events to a bounded channel drained by [`deliver_outbox`].
#[derive(Clone)]
pub(crate) struct OutboxDispatcher {
    sender: mpsc::Sender<PhaseReachedEvent>,
}

impl OutboxDispatcher {
    pub(crate) fn channel(capacity: usize) -> (Self, mpsc::Receiver<PhaseReachedEvent>) {
        let (sender, receiver) = mpsc::channel(capacity);
        (Self { sender }, receiver)
    }
}

impl SideEffectDispatcher for OutboxDispatcher {
    fn notify_phase_reached(&self, event: &PhaseReachedEvent) -> Result<(), DispatchError> {
        self.sender
            .try_send(event.clone())
            .map_err(|error| match error {
                TrySendError::Full(_) => DispatchError::Transport("outbox is full".to_string()),
                TrySendError::Closed(_) => {
                    DispatchError::Transport("outbox consumer stopped".to_string())
                }
            })?;
        info!(
            transaction_id = %event.transaction_id,
            from = %event.from_phase,
            to = %event.to_phase,
            transition_id = %event.transition_id,
            "phase reached event queued"
        );
        Ok(())
    }
}

/// Drains the outbox until every sender is gone. Returns the number of events delivered.
pub(crate) async fn deliver_outbox(mut receiver: mpsc::Receiver<PhaseReachedEvent>) -> usize {
    let mut delivered = 0;
    while let Some(event) = receiver.recv().await {
        delivered += 1;
        info!(
            transaction_id = %event.transaction_id,
            to = %event.to_phase,
            transition_id = %event.transition_id,
            "phase reached event delivered"
        );
    }
    delivered
}

/// Rules file when configured, otherwise the built-in matrix.
pub(crate) fn load_permissions(
    path: Option<&Path>,
    graph: &PhaseGraph,
) -> Result<PermissionMatrix, AppError> {
    match path {
        Some(path) => {
            let matrix = PermissionMatrix::from_path(path, graph)?;
            info!(path = %path.display(), version = matrix.version(), "permission rules loaded");
            Ok(matrix)
        }
        None => Ok(PermissionMatrix::standard()),
    }
}
