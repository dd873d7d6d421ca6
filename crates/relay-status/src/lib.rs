//! Status reporting from agents back to the dispatcher side.
//!
//! The executor hands statuses to a [`StatusReporter`], which queues them and
//! forwards them to a [`StatusSink`] on its own task. Reporting never waits on
//! the sink.

mod bus;
mod log;
mod reporter;

pub use bus::BusStatusSink;
pub use log::{MemoryStatusLog, StatusFilter, StatusRecord, StatusRecordId, DEFAULT_LOG_CAPACITY};
pub use reporter::{StatusReporter, DEFAULT_QUEUE_CAPACITY};

use async_trait::async_trait;
use relay_deployment::DeploymentStatus;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StatusSinkError {
    #[error("encoding status: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("transport error: {0}")]
    Transport(#[from] relay_events::EventBusError),
    #[error("status record not found: {0}")]
    NotFound(StatusRecordId),
}

/// Destination for deployment statuses. Delivery is best effort.
#[async_trait]
pub trait StatusSink: Send + Sync {
    async fn deliver(&self, status: DeploymentStatus) -> Result<(), StatusSinkError>;
}
