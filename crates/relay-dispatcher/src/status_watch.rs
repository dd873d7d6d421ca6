use futures::StreamExt;
use relay_deployment::{DeploymentState, DeploymentStatus};
use relay_events::{EventBus, EventBusError, Message, MessageStream, Topic};
use relay_status::MemoryStatusLog;
use std::sync::Arc;
use tracing::{error, info, warn};

/// Follows the status topic and records what agents report.
pub struct StatusWatcher {
    log: Arc<MemoryStatusLog>,
}

impl StatusWatcher {
    pub fn new(log: Arc<MemoryStatusLog>) -> Self {
        Self { log }
    }

    pub fn log(&self) -> &Arc<MemoryStatusLog> {
        &self.log
    }

    /// Runs until the subscription ends.
    pub async fn run(&self, bus: Arc<dyn EventBus>, topic: &Topic) -> Result<(), EventBusError> {
        let stream = bus.subscribe(topic).await?;
        info!(%topic, "watching deployment statuses");
        self.consume(stream).await;
        Ok(())
    }

    /// Record every status on an existing subscription until it ends.
    pub async fn consume(&self, mut stream: MessageStream) {
        while let Some(message) = stream.next().await {
            self.handle(message).await;
        }
    }

    pub async fn handle(&self, message: Message) {
        let status = match DeploymentStatus::from_bytes(&message.body) {
            Ok(status) => status,
            Err(e) => {
                warn!(source = %message.key_id, error = %e, "undecodable status message");
                return;
            }
        };

        match status.state {
            DeploymentState::InProgress | DeploymentState::Success => info!(
                delivery_id = %status.delivery_id,
                cluster = %status.cluster,
                repository = %status.repository,
                state = %status.state,
                "{}", status.description
            ),
            DeploymentState::Failure => warn!(
                delivery_id = %status.delivery_id,
                cluster = %status.cluster,
                repository = %status.repository,
                "deployment failed: {}", status.description
            ),
            DeploymentState::Error => error!(
                delivery_id = %status.delivery_id,
                cluster = %status.cluster,
                repository = %status.repository,
                "deployment errored: {}", status.description
            ),
        }

        self.log.record(status).await;
    }
}
