//! `repowatch consume`: apply envelopes from Kafka to the database.

use std::error::Error;
use std::sync::Arc;

use repowatch::ingest::{Ingestor, KafkaEnvelopeConsumer};
use repowatch::retry::{RetryConfig, bootstrap};
use tokio::sync::watch;

use crate::commands::shared::{connect_database, report_ingest};
use crate::config::Config;
use crate::progress::LoggingReporter;

pub(crate) async fn handle_consume(
    config: &Config,
    database_url: &str,
    shutdown: watch::Receiver<bool>,
) -> Result<(), Box<dyn Error>> {
    let db = connect_database(database_url).await?;
    let ingestor = Arc::new(Ingestor::new(db));
    let brokers = config.publisher.brokers.as_str();
    let group_id = config.publisher.group_id.as_str();

    let consumer = bootstrap("kafka consumer", RetryConfig::default(), || async {
        KafkaEnvelopeConsumer::connect(brokers, group_id, Arc::clone(&ingestor))
    })
    .await?
    .with_progress(Arc::new(LoggingReporter::new()).as_callback());

    let (result, stopped_by) = consumer.run(shutdown).await;
    report_ingest(&result);

    match stopped_by {
        Some(e) => Err(e.into()),
        None => Ok(()),
    }
}
