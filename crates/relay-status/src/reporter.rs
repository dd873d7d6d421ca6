use metrics::counter;
use relay_deployment::DeploymentStatus;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::StatusSink;

pub const DEFAULT_QUEUE_CAPACITY: usize = 1024;

/// Non-blocking handle for emitting statuses.
///
/// Statuses go into a bounded queue drained by a forwarder task. When the
/// queue is full the status being reported is dropped and counted. The
/// forwarder stops once every handle is dropped and the queue is empty.
#[derive(Clone)]
pub struct StatusReporter {
    tx: mpsc::Sender<DeploymentStatus>,
}

impl StatusReporter {
    pub fn spawn(sink: Arc<dyn StatusSink>, capacity: usize) -> (Self, JoinHandle<()>) {
        let (tx, mut rx) = mpsc::channel::<DeploymentStatus>(capacity.max(1));

        let forwarder = tokio::spawn(async move {
            while let Some(status) = rx.recv().await {
                let delivery_id = status.delivery_id.clone();
                let state = status.state;
                match sink.deliver(status).await {
                    Ok(()) => debug!(%delivery_id, %state, "status delivered"),
                    Err(e) => warn!(%delivery_id, %state, error = %e, "status delivery failed"),
                }
            }
        });

        (Self { tx }, forwarder)
    }

    /// Queue `status` for delivery. Returns whether it was queued.
    pub fn report(&self, status: DeploymentStatus) -> bool {
        match self.tx.try_send(status) {
            Ok(()) => true,
            Err(TrySendError::Full(status)) => {
                counter!("relay_status_dropped_total").increment(1);
                warn!(
                    delivery_id = %status.delivery_id,
                    state = %status.state,
                    "status queue full, dropping status"
                );
                false
            }
            Err(TrySendError::Closed(status)) => {
                counter!("relay_status_dropped_total").increment(1);
                warn!(
                    delivery_id = %status.delivery_id,
                    state = %status.state,
                    "status forwarder gone, dropping status"
                );
                false
            }
        }
    }
}
