//! Wiring shared by the commands: database bootstrap, source and publisher.

use std::error::Error;
use std::sync::Arc;

use repowatch::ingest::{IngestTaskResult, Ingestor, await_ingest_task, spawn_ingest_task};
use repowatch::publish::{ChannelPublisher, DELIVERY_CHANNEL_BUFFER_SIZE, EventPublisher};
use repowatch::retry::{RetryConfig, bootstrap};
use repowatch::sync::ProgressCallback;
use sea_orm::DatabaseConnection;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::config::{Config, PublisherBackend};

/// Create the parent directory of a file-backed SQLite database.
fn ensure_sqlite_dir(database_url: &str) -> std::io::Result<()> {
    let Some(db_path) = database_url.strip_prefix("sqlite://") else {
        return Ok(());
    };
    // Strip query parameters (e.g., ?mode=rwc) before path operations
    let db_path = db_path.split('?').next().unwrap_or(db_path);
    let db_path = std::path::Path::new(db_path);

    if db_path.is_relative() && !db_path.as_os_str().is_empty() {
        tracing::warn!(
            "Database path '{}' is relative - behavior depends on current directory. \
             Consider using an absolute path.",
            db_path.display()
        );
    }

    if let Some(parent) = db_path.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent)?;
    }
    Ok(())
}

/// Connect to the database and apply pending migrations, retrying startup
/// failures with bounded backoff.
pub(crate) async fn connect_database(
    database_url: &str,
) -> Result<Arc<DatabaseConnection>, Box<dyn Error>> {
    ensure_sqlite_dir(database_url)?;
    let db = bootstrap("database", RetryConfig::default(), || {
        repowatch::connect_and_migrate(database_url)
    })
    .await?;
    Ok(Arc::new(db))
}

/// The publisher walks write to, plus the local ingest task when there is one.
pub(crate) struct PublisherSetup {
    pub(crate) publisher: Arc<dyn EventPublisher>,
    ingest: Option<JoinHandle<IngestTaskResult>>,
}

impl PublisherSetup {
    /// Build the configured publisher.
    ///
    /// The local backend spawns an ingest task on `db`. It ends once every
    /// clone of the publisher has been dropped, so walks that are still
    /// publishing during shutdown are never cut off.
    pub(crate) async fn start(
        config: &Config,
        db: &Arc<DatabaseConnection>,
        on_progress: Option<Arc<ProgressCallback>>,
    ) -> Result<Self, Box<dyn Error>> {
        match config.publisher.backend {
            PublisherBackend::Local => {
                let (publisher, rx) = ChannelPublisher::channel(DELIVERY_CHANNEL_BUFFER_SIZE);
                let (_, never) = watch::channel(false);
                let ingest = spawn_ingest_task(
                    Arc::new(Ingestor::new(Arc::clone(db))),
                    rx,
                    never,
                    on_progress,
                );
                Ok(Self {
                    publisher: Arc::new(publisher),
                    ingest: Some(ingest),
                })
            }
            #[cfg(feature = "kafka")]
            PublisherBackend::Kafka => {
                use repowatch::publish::KafkaPublisher;
                use std::time::Duration;

                let _ = on_progress;
                let brokers = config.publisher.brokers.as_str();
                let timeout = Duration::from_millis(config.publisher.message_timeout_ms);
                let publisher = bootstrap("kafka producer", RetryConfig::default(), || async {
                    KafkaPublisher::connect(brokers, timeout)
                })
                .await?;
                Ok(Self {
                    publisher: Arc::new(publisher),
                    ingest: None,
                })
            }
            #[cfg(not(feature = "kafka"))]
            PublisherBackend::Kafka => {
                let _ = on_progress;
                Err("publisher.backend = \"kafka\" requires a build with the `kafka` feature".into())
            }
        }
    }

    /// Release the publisher and wait for the local ingest task to drain.
    ///
    /// Every walker holding a clone of the publisher must be dropped first.
    pub(crate) async fn finish(self) -> Option<IngestTaskResult> {
        drop(self.publisher);
        match self.ingest {
            Some(handle) => Some(await_ingest_task(handle).await),
            None => None,
        }
    }
}

/// Log an ingest task result.
pub(crate) fn report_ingest(result: &IngestTaskResult) {
    if let Some(panic) = &result.panic_info {
        tracing::error!(panic = %panic, "Ingest task failed");
    }
    for (topic, error) in &result.errors {
        tracing::error!(topic = %topic, error = %error, "Envelope not applied");
    }
    tracing::info!(
        applied = result.applied,
        records = result.records,
        duplicates = result.duplicates,
        failed = result.failed_count(),
        "Ingest finished"
    );
}

#[cfg(feature = "github")]
pub(crate) fn github_source(
    config: &Config,
) -> Result<Arc<repowatch::source::github::GitHubSource>, Box<dyn Error>> {
    use repowatch::source::github::{DateBounds, GitHubSource};

    let owner = config
        .github
        .owner
        .as_deref()
        .filter(|o| !o.is_empty())
        .ok_or("No GitHub owner configured. Set github.owner or REPOWATCH_GITHUB__OWNER.")?;
    let (since, until) = config.date_bounds()?;

    let mut source = GitHubSource::new(owner, config.github.token.clone(), DateBounds { since, until })?;
    if let Some(api_url) = config.github.api_url.as_deref() {
        source = source.with_api_url(api_url);
    }
    if config.github.token.is_none() {
        tracing::warn!("No GitHub token configured, requests are unauthenticated");
    }
    Ok(Arc::new(source))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sqlite_dir_is_created_for_file_databases() {
        let dir = std::env::temp_dir().join(format!("repowatch-dir-test-{}", std::process::id()));
        let url = format!("sqlite://{}/nested/repowatch.db?mode=rwc", dir.display());

        ensure_sqlite_dir(&url).expect("directory creation should succeed");
        assert!(dir.join("nested").is_dir());

        std::fs::remove_dir_all(&dir).expect("test directory should be removable");
    }

    #[test]
    fn non_sqlite_urls_are_left_alone() {
        ensure_sqlite_dir("postgres://localhost/repowatch").expect("no-op");
        ensure_sqlite_dir("sqlite::memory:").expect("no-op");
    }

    #[cfg(feature = "sqlite")]
    #[tokio::test]
    async fn local_publisher_drains_into_the_database() {
        let db = connect_database("sqlite::memory:").await.expect("db");
        let setup = PublisherSetup::start(&Config::default(), &db, None)
            .await
            .expect("local publisher");

        let envelope = repowatch::publish::FetchEnvelope::page(
            &repowatch::FetchScope::Repositories,
            1,
            chrono::Utc::now(),
            vec![serde_json::json!({"name": "tracker"})],
        );
        setup
            .publisher
            .publish_envelope(&envelope)
            .await
            .expect("publish");

        let result = setup.finish().await.expect("local ingest result");
        assert_eq!(result.applied, 1);
        assert!(!result.has_errors());
    }

    #[cfg(all(feature = "sqlite", not(feature = "kafka")))]
    #[tokio::test]
    async fn kafka_backend_requires_the_feature() {
        let db = connect_database("sqlite::memory:").await.expect("db");
        let mut config = Config::default();
        config.publisher.backend = PublisherBackend::Kafka;
        assert!(PublisherSetup::start(&config, &db, None).await.is_err());
    }
}
