use async_trait::async_trait;
use relay_deployment::DeploymentStatus;
use relay_events::{EventBus, Message, Topic};
use std::sync::Arc;

use crate::{StatusSink, StatusSinkError};

/// Publishes statuses on a topic, tagged with the reporting cluster.
pub struct BusStatusSink {
    bus: Arc<dyn EventBus>,
    topic: Topic,
    source: String,
}

impl BusStatusSink {
    pub fn new(bus: Arc<dyn EventBus>, topic: Topic, source: impl Into<String>) -> Self {
        Self {
            bus,
            topic,
            source: source.into(),
        }
    }
}

#[async_trait]
impl StatusSink for BusStatusSink {
    async fn deliver(&self, status: DeploymentStatus) -> Result<(), StatusSinkError> {
        let body = status.to_bytes()?;
        self.bus
            .publish(&self.topic, Message::new(self.source.clone(), body))
            .await?;
        Ok(())
    }
}
