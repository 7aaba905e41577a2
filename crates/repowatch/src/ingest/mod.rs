//! Downstream consumer: applies published envelopes to the database.
//!
//! Applying an envelope upserts its records by natural key (repository name,
//! commit SHA) and appends the page to `fetch_history` in one transaction.
//! Replaying the same envelope is harmless: upserts converge and the history
//! append is dropped by its unique index.
//!
//! A record that cannot be converted is logged and skipped; the rest of its
//! page is still stored and the page is still recorded. Redelivering the page
//! would fail the same record again.
//!
//! - [`convert`] - raw record normalisation
//! - [`task`] - background task draining a [`crate::publish::ChannelPublisher`]
//! - `kafka` - Kafka consumer with manual offset commits (feature `kafka`)

use std::sync::Arc;

use chrono::Utc;
use sea_orm::{
    DatabaseConnection, DbErr, EntityTrait, TransactionTrait, sea_query::OnConflict,
};
use serde::Deserialize;
use thiserror::Error;

use crate::entity::commit::{Column as CommitColumn, Entity as Commit};
use crate::entity::repository::{Column as RepositoryColumn, Entity as Repository};
use crate::position::{FetchHistoryEntry, PositionError, db::append_entry};
use crate::publish::FetchEnvelope;
use crate::publish::envelope::{CommitsPage, ReposPage, RepoSnapshot};
use crate::retry::{RetryConfig, is_transient_db_error, with_retry};
use crate::source::{FetchScope, RawRecord};

pub mod convert;
#[cfg(feature = "kafka")]
pub mod kafka;
pub mod task;

#[cfg(feature = "kafka")]
pub use kafka::KafkaEnvelopeConsumer;
pub use task::{IngestTaskResult, await_ingest_task, spawn_ingest_task};

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("Malformed envelope: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("Unknown envelope kind: {0}")]
    UnknownKind(String),

    #[error("Invalid record: {0}")]
    InvalidRecord(String),

    #[error("Database error: {0}")]
    Database(#[from] DbErr),

    #[error("Position store error: {0}")]
    Position(#[from] PositionError),

    #[error("Broker error: {0}")]
    Broker(String),
}

impl IngestError {
    /// Errors that will fail the same way on redelivery.
    #[must_use]
    pub fn is_permanent(&self) -> bool {
        matches!(
            self,
            Self::Decode(_) | Self::UnknownKind(_) | Self::InvalidRecord(_)
        )
    }

    fn is_transient(&self) -> bool {
        match self {
            Self::Database(e) => is_transient_db_error(e),
            Self::Position(PositionError::Database(e)) => is_transient_db_error(e),
            _ => false,
        }
    }
}

/// What applying one envelope did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IngestOutcome {
    /// Envelope kind.
    pub kind: &'static str,
    /// Page number carried by the envelope.
    pub page: u32,
    /// Records upserted.
    pub written: usize,
    /// Records dropped because they could not be converted.
    pub skipped: usize,
    /// Whether a new history row was appended. `false` for redeliveries,
    /// snapshots and empty envelopes.
    pub history_recorded: bool,
}

impl IngestOutcome {
    fn empty(kind: &'static str, page: u32) -> Self {
        Self {
            kind,
            page,
            written: 0,
            skipped: 0,
            history_recorded: false,
        }
    }

    /// A non-empty page whose history row already existed.
    #[must_use]
    pub fn is_redelivery(&self) -> bool {
        self.kind != "repo" && self.written + self.skipped > 0 && !self.history_recorded
    }
}

#[derive(Deserialize)]
struct EnvelopeHeader {
    name: String,
}

/// Convert every record, dropping the ones that cannot be stored.
fn convert_records<T>(
    records: &[RawRecord],
    convert: impl Fn(&RawRecord) -> Result<T, IngestError>,
) -> (Vec<T>, usize) {
    let mut models = Vec::with_capacity(records.len());
    let mut skipped = 0;
    for (index, record) in records.iter().enumerate() {
        match convert(record) {
            Ok(model) => models.push(model),
            Err(e) => {
                skipped += 1;
                tracing::warn!(index, error = %e, "Skipping record");
            }
        }
    }
    (models, skipped)
}

fn repository_upsert() -> OnConflict {
    OnConflict::column(RepositoryColumn::Name)
        .update_columns([
            RepositoryColumn::Description,
            RepositoryColumn::HtmlUrl,
            RepositoryColumn::Language,
            RepositoryColumn::ForksCount,
            RepositoryColumn::StargazersCount,
            RepositoryColumn::OpenIssuesCount,
            RepositoryColumn::WatchersCount,
            RepositoryColumn::CreatedAt,
            RepositoryColumn::UpdatedAt,
            RepositoryColumn::SyncedAt,
        ])
        .to_owned()
}

fn commit_upsert() -> OnConflict {
    OnConflict::column(CommitColumn::Sha)
        .update_columns([
            CommitColumn::RepositoryName,
            CommitColumn::Url,
            CommitColumn::Message,
            CommitColumn::AuthorName,
            CommitColumn::AuthoredAt,
            CommitColumn::CommittedAt,
            CommitColumn::SyncedAt,
        ])
        .to_owned()
}

/// Applies envelopes to the database.
#[derive(Debug, Clone)]
pub struct Ingestor {
    db: Arc<DatabaseConnection>,
}

impl Ingestor {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    /// Decode and apply one payload.
    pub async fn apply(&self, payload: &[u8]) -> Result<IngestOutcome, IngestError> {
        let header: EnvelopeHeader = serde_json::from_slice(payload)?;
        if !matches!(header.name.as_str(), "repos" | "repo" | "commits") {
            return Err(IngestError::UnknownKind(header.name));
        }

        match FetchEnvelope::decode(payload)? {
            FetchEnvelope::Repos(page) => self.apply_repos(page).await,
            FetchEnvelope::Commits(page) => self.apply_commits(page).await,
            FetchEnvelope::Repo(snapshot) => self.apply_repo(snapshot).await,
        }
    }

    /// [`Ingestor::apply`] with retries on transient database errors.
    pub async fn apply_with_retry(&self, payload: &[u8]) -> Result<IngestOutcome, IngestError> {
        with_retry(
            "ingest",
            RetryConfig::database_write(),
            || self.apply(payload),
            IngestError::is_transient,
        )
        .await
    }

    async fn apply_repos(&self, page: ReposPage) -> Result<IngestOutcome, IngestError> {
        let mut outcome = IngestOutcome::empty("repos", page.last_page);
        if page.repos.is_empty() {
            return Ok(outcome);
        }

        let synced_at = Utc::now();
        let (models, skipped) = convert_records(&page.repos, |record| {
            convert::repository_model(record, synced_at)
        });
        outcome.written = models.len();
        outcome.skipped = skipped;

        let txn = self.db.begin().await?;
        if !models.is_empty() {
            Repository::insert_many(models)
                .on_conflict(repository_upsert())
                .exec_without_returning(&txn)
                .await?;
        }
        outcome.history_recorded = append_entry(
            &txn,
            &FetchHistoryEntry {
                scope: FetchScope::Repositories,
                last_page: page.last_page,
                total_items_seen: page.repos.len() as u32,
                fetched_at: page.fetch_time,
            },
        )
        .await?;
        txn.commit().await?;

        tracing::debug!(
            page = outcome.page,
            count = outcome.written,
            skipped = outcome.skipped,
            new = outcome.history_recorded,
            "Ingested repos page"
        );
        Ok(outcome)
    }

    async fn apply_commits(&self, page: CommitsPage) -> Result<IngestOutcome, IngestError> {
        let mut outcome = IngestOutcome::empty("commits", page.last_page);
        if page.commits.is_empty() {
            return Ok(outcome);
        }

        let synced_at = Utc::now();
        let (models, skipped) = convert_records(&page.commits, |record| {
            convert::commit_model(record, &page.repository, synced_at)
        });
        outcome.written = models.len();
        outcome.skipped = skipped;

        let txn = self.db.begin().await?;
        if !models.is_empty() {
            Commit::insert_many(models)
                .on_conflict(commit_upsert())
                .exec_without_returning(&txn)
                .await?;
        }
        outcome.history_recorded = append_entry(
            &txn,
            &FetchHistoryEntry {
                scope: FetchScope::commits(page.repository.clone()),
                last_page: page.last_page,
                total_items_seen: page.commits.len() as u32,
                fetched_at: page.fetch_time,
            },
        )
        .await?;
        txn.commit().await?;

        tracing::debug!(
            repository = %page.repository,
            page = outcome.page,
            count = outcome.written,
            skipped = outcome.skipped,
            new = outcome.history_recorded,
            "Ingested commits page"
        );
        Ok(outcome)
    }

    async fn apply_repo(&self, snapshot: RepoSnapshot) -> Result<IngestOutcome, IngestError> {
        let record = serde_json::Value::Object(snapshot.record);
        let model = convert::repository_model(&record, Utc::now())?;

        Repository::insert(model)
            .on_conflict(repository_upsert())
            .exec_without_returning(self.db.as_ref())
            .await?;

        tracing::debug!("Ingested repository snapshot");
        Ok(IngestOutcome {
            written: 1,
            ..IngestOutcome::empty("repo", snapshot.last_page)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sea_orm::{DatabaseBackend, MockDatabase, MockExecResult, QueryTrait};

    #[tokio::test]
    async fn unknown_kind_is_reported_before_decoding() {
        let db = MockDatabase::new(DatabaseBackend::Sqlite).into_connection();
        let ingestor = Ingestor::new(Arc::new(db));

        let result = ingestor.apply(br#"{"name":"issues","data":{}}"#).await;
        match result {
            Err(IngestError::UnknownKind(kind)) => assert_eq!(kind, "issues"),
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[tokio::test]
    async fn malformed_payload_is_a_permanent_decode_error() {
        let db = MockDatabase::new(DatabaseBackend::Sqlite).into_connection();
        let ingestor = Ingestor::new(Arc::new(db));

        let err = ingestor.apply(b"not json").await.expect_err("decode");
        assert!(matches!(err, IngestError::Decode(_)));
        assert!(err.is_permanent());
    }

    #[tokio::test]
    async fn empty_page_writes_nothing() {
        // No exec results are queued: any write would fail.
        let db = MockDatabase::new(DatabaseBackend::Sqlite).into_connection();
        let ingestor = Ingestor::new(Arc::new(db));
        let payload = br#"{"name":"commits","data":{"LastPage":4,"Repository":"tracker","FetchTime":"2024-01-01T00:00:00Z","Commits":[]}}"#;

        let outcome = ingestor.apply(payload).await.expect("apply");
        assert_eq!(outcome.kind, "commits");
        assert_eq!(outcome.page, 4);
        assert_eq!(outcome.written, 0);
        assert!(!outcome.history_recorded);
    }

    #[tokio::test]
    async fn invalid_records_are_skipped_and_the_page_is_still_recorded() {
        let db = MockDatabase::new(DatabaseBackend::Sqlite)
            .append_exec_results((0..2).map(|_| MockExecResult {
                last_insert_id: 0,
                rows_affected: 1,
            }))
            .into_connection();
        let db = Arc::new(db);
        let ingestor = Ingestor::new(Arc::clone(&db));
        let payload = br#"{"name":"commits","data":{"LastPage":2,"Repository":"tracker","FetchTime":"2024-01-01T00:00:00Z","Commits":[{"sha":"a1"},{"commit":{"message":"no sha"}},{"sha":"a3"}]}}"#;

        let outcome = ingestor.apply(payload).await.expect("apply");
        assert_eq!(outcome.written, 2);
        assert_eq!(outcome.skipped, 1);
        assert!(outcome.history_recorded);
        assert!(!outcome.is_redelivery());

        drop(ingestor);
        let Ok(db) = Arc::try_unwrap(db) else {
            panic!("connection should not be shared after the ingestor is dropped");
        };
        let statements = format!("{:?}", db.into_transaction_log());
        assert!(statements.contains("a1") && statements.contains("a3"), "{statements}");
        assert!(!statements.contains("no sha"), "{statements}");
    }

    #[tokio::test]
    async fn page_with_only_invalid_records_still_records_history() {
        // One exec: the history append. No upsert runs.
        let db = MockDatabase::new(DatabaseBackend::Sqlite)
            .append_exec_results([MockExecResult {
                last_insert_id: 0,
                rows_affected: 1,
            }])
            .into_connection();
        let ingestor = Ingestor::new(Arc::new(db));
        let payload = br#"{"name":"repos","data":{"LastPage":5,"FetchTime":"2024-01-01T00:00:00Z","Repos":[{"description":"nameless"}]}}"#;

        let outcome = ingestor.apply(payload).await.expect("apply");
        assert_eq!(outcome.written, 0);
        assert_eq!(outcome.skipped, 1);
        assert!(outcome.history_recorded);
    }

    #[test]
    fn redelivery_is_a_seen_page_without_a_new_history_row() {
        let mut outcome = IngestOutcome::empty("commits", 3);
        outcome.written = 2;
        assert!(outcome.is_redelivery());
        outcome.history_recorded = true;
        assert!(!outcome.is_redelivery());
        assert!(!IngestOutcome::empty("commits", 3).is_redelivery());
        let snapshot = IngestOutcome {
            written: 1,
            ..IngestOutcome::empty("repo", 0)
        };
        assert!(!snapshot.is_redelivery());
    }

    #[test]
    fn repository_upsert_targets_name() {
        let model = convert::repository_model(&serde_json::json!({"name": "tracker"}), Utc::now())
            .expect("convert");
        let sql = Repository::insert(model)
            .on_conflict(repository_upsert())
            .build(DatabaseBackend::Postgres)
            .to_string();
        assert!(sql.contains(r#"ON CONFLICT ("name") DO UPDATE"#), "{sql}");
        assert!(sql.contains(r#""synced_at" = "excluded"."synced_at""#), "{sql}");
    }

    #[test]
    fn commit_upsert_targets_sha() {
        let model = convert::commit_model(&serde_json::json!({"sha": "abc"}), "tracker", Utc::now())
            .expect("convert");
        let sql = Commit::insert(model)
            .on_conflict(commit_upsert())
            .build(DatabaseBackend::Postgres)
            .to_string();
        assert!(sql.contains(r#"ON CONFLICT ("sha") DO UPDATE"#), "{sql}");
    }

    #[test]
    fn permanent_and_transient_errors() {
        assert!(IngestError::UnknownKind("x".to_string()).is_permanent());
        assert!(!IngestError::Broker("down".to_string()).is_permanent());
        assert!(
            IngestError::Database(DbErr::Conn(sea_orm::RuntimeErr::Internal(
                "refused".to_string()
            )))
            .is_transient()
        );
    }
}
