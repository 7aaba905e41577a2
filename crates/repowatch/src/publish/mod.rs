//! Event publisher.
//!
//! A publisher delivers one encoded [`FetchEnvelope`] to a topic, at least
//! once, and reports failure to the caller. It never retries internally: the
//! walker aborts on error and the next tick resumes from the unadvanced
//! cursor.
//!
//! - [`envelope`] - wire shape and topic names
//! - [`ChannelPublisher`] - in-process delivery to the ingest task
//! - `kafka` - rdkafka producer (feature `kafka`)

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;

pub mod envelope;
#[cfg(feature = "kafka")]
pub mod kafka;

pub use envelope::{COMMITS_TOPIC, EXCHANGE, FetchEnvelope, REPOS_TOPIC};
#[cfg(feature = "kafka")]
pub use kafka::KafkaPublisher;

/// Channel buffer between the walkers and the in-process ingest task.
pub const DELIVERY_CHANNEL_BUFFER_SIZE: usize = 64;

#[derive(Debug, Error)]
pub enum PublishError {
    #[error("Failed to encode envelope: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("Invalid record: {0}")]
    InvalidRecord(String),

    /// The receiving side is gone.
    #[error("Publisher closed")]
    Closed,

    #[error("Broker error: {0}")]
    Broker(String),
}

/// One message handed to a publisher.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    pub topic: String,
    pub key: String,
    pub payload: Vec<u8>,
}

/// At-least-once publish of an opaque payload onto a topic.
///
/// Implementations are shared by concurrent walks and must serialize access
/// to any underlying connection themselves.
#[async_trait]
pub trait EventPublisher: Send + Sync {
    /// Publish `payload` on `topic`. Returns once the transport accepted it.
    async fn publish(&self, topic: &str, key: &str, payload: Vec<u8>)
    -> Result<(), PublishError>;

    /// Encode `envelope` and publish it on its own topic.
    async fn publish_envelope(&self, envelope: &FetchEnvelope) -> Result<(), PublishError> {
        let payload = envelope.encode()?;
        self.publish(envelope.topic(), &envelope.key(), payload)
            .await
    }
}

/// Publisher backed by a tokio mpsc channel.
#[derive(Debug, Clone)]
pub struct ChannelPublisher {
    tx: mpsc::Sender<Delivery>,
}

impl ChannelPublisher {
    pub fn new(tx: mpsc::Sender<Delivery>) -> Self {
        Self { tx }
    }

    /// Create a publisher and the receiver its deliveries arrive on.
    pub fn channel(buffer: usize) -> (Self, mpsc::Receiver<Delivery>) {
        let (tx, rx) = mpsc::channel(buffer);
        (Self::new(tx), rx)
    }
}

#[async_trait]
impl EventPublisher for ChannelPublisher {
    async fn publish(
        &self,
        topic: &str,
        key: &str,
        payload: Vec<u8>,
    ) -> Result<(), PublishError> {
        self.tx
            .send(Delivery {
                topic: topic.to_string(),
                key: key.to_string(),
                payload,
            })
            .await
            .map_err(|_| PublishError::Closed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use serde_json::json;

    use crate::source::FetchScope;

    #[tokio::test]
    async fn channel_publisher_delivers_envelope_on_its_topic() {
        let (publisher, mut rx) = ChannelPublisher::channel(4);
        let envelope = FetchEnvelope::page(
            &FetchScope::commits("tracker"),
            2,
            Utc::now(),
            vec![json!({"sha": "abc"})],
        );

        publisher
            .publish_envelope(&envelope)
            .await
            .expect("publish");

        let delivery = rx.recv().await.expect("delivery");
        assert_eq!(delivery.topic, COMMITS_TOPIC);
        assert_eq!(delivery.key, "tracker");
        assert_eq!(
            FetchEnvelope::decode(&delivery.payload).expect("decode"),
            envelope
        );
    }

    #[tokio::test]
    async fn channel_publisher_fails_when_receiver_is_dropped() {
        let (publisher, rx) = ChannelPublisher::channel(1);
        drop(rx);

        let err = publisher
            .publish(REPOS_TOPIC, "", b"{}".to_vec())
            .await
            .expect_err("closed channel");
        assert!(matches!(err, PublishError::Closed));
    }
}
