//! Kafka publisher.
//!
//! Envelopes are produced to a topic named after their routing key. The
//! producer runs idempotent with `acks=all`, and `publish` waits for the
//! delivery report, so an `Ok` means the broker has the message.

use std::time::Duration;

use async_trait::async_trait;
use rdkafka::ClientConfig;
use rdkafka::producer::{FutureProducer, FutureRecord};

use super::{EventPublisher, PublishError};

/// Default `message.timeout.ms`.
pub const DEFAULT_MESSAGE_TIMEOUT: Duration = Duration::from_secs(10);

/// Producer configuration for at-least-once delivery.
#[must_use]
pub fn producer_config(brokers: &str, message_timeout: Duration) -> ClientConfig {
    let mut config = ClientConfig::new();
    config
        .set("bootstrap.servers", brokers)
        .set("enable.idempotence", "true")
        .set("acks", "all")
        .set(
            "message.timeout.ms",
            message_timeout.as_millis().to_string(),
        );
    config
}

/// Kafka topic for a routing key.
///
/// Topics are namespaced by the exchange: `github_api_topics.github.REPOS`.
#[must_use]
pub fn kafka_topic(routing_key: &str) -> String {
    format!("{}.{}", super::EXCHANGE, routing_key)
}

/// [`EventPublisher`] over an rdkafka `FutureProducer`.
#[derive(Clone)]
pub struct KafkaPublisher {
    producer: FutureProducer,
    message_timeout: Duration,
}

impl KafkaPublisher {
    /// Connect a producer to `brokers`.
    pub fn connect(brokers: &str, message_timeout: Duration) -> Result<Self, PublishError> {
        let producer: FutureProducer = producer_config(brokers, message_timeout)
            .create()
            .map_err(|e| PublishError::Broker(e.to_string()))?;
        tracing::info!(brokers, "Connected Kafka producer");
        Ok(Self {
            producer,
            message_timeout,
        })
    }
}

#[async_trait]
impl EventPublisher for KafkaPublisher {
    async fn publish(
        &self,
        topic: &str,
        key: &str,
        payload: Vec<u8>,
    ) -> Result<(), PublishError> {
        let topic = kafka_topic(topic);
        let record = FutureRecord::to(&topic).key(key).payload(&payload);

        let (partition, offset) = self
            .producer
            .send(record, self.message_timeout)
            .await
            .map_err(|(e, _)| PublishError::Broker(e.to_string()))?;

        tracing::debug!(topic = %topic, partition, offset, "Delivered envelope");
        Ok(())
    }
}
