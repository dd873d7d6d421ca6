//! In-memory event bus using tokio broadcast channels.
//!
//! Suitable for a dispatcher and its agents living in one process, and for
//! tests. Messages never leave the process.

use async_trait::async_trait;
use dashmap::DashMap;
use relay_events::{EventBus, EventBusError, Message, MessageStream, Topic};
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::StreamExt;

const CHANNEL_CAPACITY: usize = 100;

pub struct MemoryEventBus {
    channels: Arc<DashMap<Topic, broadcast::Sender<Message>>>,
    capacity: usize,
}

impl MemoryEventBus {
    pub fn new() -> Self {
        Self::with_capacity(CHANNEL_CAPACITY)
    }

    /// Per-topic buffer size. Subscribers further behind than this lose messages.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            channels: Arc::new(DashMap::new()),
            capacity: capacity.max(1),
        }
    }

    fn get_or_create_channel(&self, topic: &Topic) -> broadcast::Sender<Message> {
        self.channels
            .entry(topic.clone())
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .clone()
    }
}

impl Default for MemoryEventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EventBus for MemoryEventBus {
    async fn publish(&self, topic: &Topic, message: Message) -> Result<(), EventBusError> {
        let tx = self.get_or_create_channel(topic);

        // No receivers is fine
        let _ = tx.send(message);

        Ok(())
    }

    async fn subscribe(&self, topic: &Topic) -> Result<MessageStream, EventBusError> {
        let rx = self.get_or_create_channel(topic).subscribe();
        let topic = topic.clone();

        let stream = BroadcastStream::new(rx).filter_map(move |result| match result {
            Ok(message) => Some(message),
            Err(BroadcastStreamRecvError::Lagged(skipped)) => {
                tracing::warn!(%topic, skipped, "subscriber lagged, messages lost");
                None
            }
        });

        Ok(Box::pin(stream))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    #[tokio::test]
    async fn publish_and_subscribe() {
        let bus = MemoryEventBus::new();
        let topic = Topic::new("requests");

        let mut stream = bus.subscribe(&topic).await.unwrap();
        bus.publish(&topic, Message::new("aura", b"hello".to_vec()))
            .await
            .unwrap();

        let got = stream.next().await.unwrap();
        assert_eq!(got.key_id, "aura");
        assert_eq!(got.body, b"hello");
    }

    #[tokio::test]
    async fn every_subscriber_sees_every_message() {
        let bus = MemoryEventBus::new();
        let topic = Topic::new("requests");

        let mut a = bus.subscribe(&topic).await.unwrap();
        let mut b = bus.subscribe(&topic).await.unwrap();

        for i in 0..3u8 {
            bus.publish(&topic, Message::new("aura", vec![i])).await.unwrap();
        }

        for stream in [&mut a, &mut b] {
            for i in 0..3u8 {
                assert_eq!(stream.next().await.unwrap().body, vec![i]);
            }
        }
    }

    #[tokio::test]
    async fn topics_are_isolated() {
        let bus = MemoryEventBus::new();
        let requests = Topic::new("requests");
        let statuses = Topic::new("statuses");

        let mut req_stream = bus.subscribe(&requests).await.unwrap();
        bus.publish(&statuses, Message::new("aura", vec![1])).await.unwrap();
        bus.publish(&requests, Message::new("aura", vec![2])).await.unwrap();

        assert_eq!(req_stream.next().await.unwrap().body, vec![2]);
    }

    #[tokio::test]
    async fn publish_without_subscribers_succeeds() {
        let bus = MemoryEventBus::new();
        bus.publish(&Topic::new("void"), Message::new("aura", vec![]))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn lagging_subscriber_skips_and_continues() {
        let bus = MemoryEventBus::with_capacity(2);
        let topic = Topic::new("requests");
        let mut stream = bus.subscribe(&topic).await.unwrap();

        for i in 0..5u8 {
            bus.publish(&topic, Message::new("aura", vec![i])).await.unwrap();
        }

        // The two newest survive.
        assert_eq!(stream.next().await.unwrap().body, vec![3]);
        assert_eq!(stream.next().await.unwrap().body, vec![4]);
    }
}
