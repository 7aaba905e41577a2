//! Kafka consumer for published envelopes.
//!
//! Auto-commit is off. An offset is committed only after the envelope was
//! applied, or after it failed permanently (a poison message that would fail
//! the same way forever). A transient failure stops the consumer without
//! committing, so the envelope is redelivered on restart.

use std::sync::Arc;

use rdkafka::ClientConfig;
use rdkafka::Message;
use rdkafka::consumer::{CommitMode, Consumer, StreamConsumer};
use tokio::sync::watch;

use crate::publish::kafka::kafka_topic;
use crate::publish::{COMMITS_TOPIC, REPOS_TOPIC};
use crate::sync::{ProgressCallback, SyncProgress, emit};

use super::{IngestError, Ingestor, task::IngestTaskResult};

/// Default consumer group.
pub const DEFAULT_GROUP_ID: &str = "repowatch-ingest";

/// Consumer configuration with manual offset commits.
#[must_use]
pub fn consumer_config(brokers: &str, group_id: &str) -> ClientConfig {
    let mut config = ClientConfig::new();
    config
        .set("bootstrap.servers", brokers)
        .set("group.id", group_id)
        .set("enable.auto.commit", "false")
        .set("auto.offset.reset", "earliest");
    config
}

/// Consumes `repos` and `commits` topics and applies them with an [`Ingestor`].
pub struct KafkaEnvelopeConsumer {
    consumer: StreamConsumer,
    ingestor: Arc<Ingestor>,
    on_progress: Option<Arc<ProgressCallback>>,
}

impl KafkaEnvelopeConsumer {
    /// Create a consumer and subscribe it to the envelope topics.
    pub fn connect(
        brokers: &str,
        group_id: &str,
        ingestor: Arc<Ingestor>,
    ) -> Result<Self, IngestError> {
        let consumer: StreamConsumer = consumer_config(brokers, group_id)
            .create()
            .map_err(|e| IngestError::Broker(e.to_string()))?;

        let topics = [kafka_topic(REPOS_TOPIC), kafka_topic(COMMITS_TOPIC)];
        let topic_refs: Vec<&str> = topics.iter().map(String::as_str).collect();
        consumer
            .subscribe(&topic_refs)
            .map_err(|e| IngestError::Broker(e.to_string()))?;

        tracing::info!(brokers, group_id, topics = ?topics, "Subscribed Kafka consumer");
        Ok(Self {
            consumer,
            ingestor,
            on_progress: None,
        })
    }

    #[must_use]
    pub fn with_progress(mut self, on_progress: Arc<ProgressCallback>) -> Self {
        self.on_progress = Some(on_progress);
        self
    }

    /// Consume until shutdown or a transient failure.
    ///
    /// Returns the counts gathered so far together with the error that
    /// stopped the loop, if any.
    pub async fn run(
        &self,
        mut shutdown: watch::Receiver<bool>,
    ) -> (IngestTaskResult, Option<IngestError>) {
        let mut result = IngestTaskResult::default();
        let on_progress = self.on_progress.as_deref();

        loop {
            let message = tokio::select! {
                biased;
                _ = shutdown.wait_for(|stop| *stop) => break,
                message = self.consumer.recv() => message,
            };

            let message = match message {
                Ok(message) => message,
                Err(e) => return (result, Some(IngestError::Broker(e.to_string()))),
            };

            let topic = message.topic().to_string();
            let payload = message.payload().unwrap_or_default();

            match self.ingestor.apply_with_retry(payload).await {
                Ok(outcome) => {
                    result.applied += 1;
                    result.records += outcome.written;
                    if outcome.is_redelivery() {
                        result.duplicates += 1;
                    }
                    emit(
                        on_progress,
                        SyncProgress::Ingested {
                            kind: outcome.kind.to_string(),
                            count: outcome.written,
                            page: outcome.page,
                        },
                    );
                }
                Err(e) if e.is_permanent() => {
                    tracing::warn!(
                        topic = %topic,
                        offset = message.offset(),
                        error = %e,
                        "Skipping envelope that cannot be applied"
                    );
                    emit(
                        on_progress,
                        SyncProgress::IngestError {
                            error: e.to_string(),
                        },
                    );
                    result.errors.push((topic, e.to_string()));
                }
                Err(e) => {
                    tracing::error!(
                        topic = %topic,
                        offset = message.offset(),
                        error = %e,
                        "Stopping consumer, envelope will be redelivered"
                    );
                    return (result, Some(e));
                }
            }

            if let Err(e) = self.consumer.commit_message(&message, CommitMode::Async) {
                return (result, Some(IngestError::Broker(e.to_string())));
            }
        }

        tracing::debug!(applied = result.applied, "Kafka consumer stopped");
        (result, None)
    }
}
