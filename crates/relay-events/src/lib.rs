//! Transport abstraction between the dispatcher and the agents.
//!
//! Delivery is broadcast: every subscriber of a topic sees every message and
//! decides for itself whether to act. Implementations may redeliver, so
//! consumers must tolerate duplicates.

use async_trait::async_trait;
use futures::Stream;
use serde::{Deserialize, Serialize};
use std::pin::Pin;
use thiserror::Error;

/// Logical channel name, e.g. `deployment-requests`.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Topic(pub String);

impl Topic {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Topic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Opaque bytes plus the identifier of the key that signed them.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub key_id: String,
    pub body: Vec<u8>,
}

impl Message {
    pub fn new(key_id: impl Into<String>, body: impl Into<Vec<u8>>) -> Self {
        Self {
            key_id: key_id.into(),
            body: body.into(),
        }
    }
}

#[derive(Debug, Error)]
pub enum EventBusError {
    #[error("backend error: {0}")]
    Backend(String),
}

pub type MessageStream = Pin<Box<dyn Stream<Item = Message> + Send>>;

#[async_trait]
pub trait EventBus: Send + Sync {
    /// Hand a message to every current subscriber of `topic`.
    ///
    /// Publishing with no subscribers is not an error.
    async fn publish(&self, topic: &Topic, message: Message) -> Result<(), EventBusError>;

    /// Stream of messages published to `topic` from now on, until dropped.
    async fn subscribe(&self, topic: &Topic) -> Result<MessageStream, EventBusError>;
}
