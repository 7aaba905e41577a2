//! Background task that applies deliveries from a [`ChannelPublisher`].
//!
//! ```text
//! Walker -> ChannelPublisher -> mpsc -> ingest task -> Database
//! ```
//!
//! The task runs until every sender is dropped or shutdown is signalled.
//! On shutdown the channel is closed and anything already buffered is still
//! applied, so a published page is never silently dropped in-process.
//!
//! A page that fails to apply holds back every later page of the same scope
//! until a page at or below it applies again. History therefore never jumps
//! past a gap, and the next walk fetches the failed page again.
//!
//! [`ChannelPublisher`]: crate::publish::ChannelPublisher

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use crate::publish::Delivery;
use crate::source::FetchScope;
use crate::sync::{ProgressCallback, SyncProgress, emit};

use super::Ingestor;

/// Maximum time to wait for the ingest task after its senders are gone.
pub const INGEST_TASK_TIMEOUT: Duration = Duration::from_secs(30);

/// Result of an ingest task run.
#[derive(Debug, Default)]
#[must_use = "IngestTaskResult may contain errors that should be checked"]
pub struct IngestTaskResult {
    /// Envelopes applied.
    pub applied: usize,
    /// Records written across all applied envelopes.
    pub records: usize,
    /// Pages whose history row already existed (redeliveries).
    pub duplicates: usize,
    /// Pages not applied because an earlier page of their scope failed.
    pub held_back: usize,
    /// Accumulated errors: (topic, error_message).
    pub errors: Vec<(String, String)>,
    /// Panic message if the task panicked.
    pub panic_info: Option<String>,
}

impl IngestTaskResult {
    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty() || self.panic_info.is_some()
    }

    pub fn failed_count(&self) -> usize {
        self.errors.len() + usize::from(self.panic_info.is_some())
    }
}

#[derive(Deserialize)]
struct PageHeader {
    name: String,
    data: PageHeaderData,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct PageHeaderData {
    last_page: u32,
    #[serde(default)]
    repository: Option<String>,
}

/// Scope and page of a `repos` or `commits` payload.
fn page_position(payload: &[u8]) -> Option<(FetchScope, u32)> {
    let header: PageHeader = serde_json::from_slice(payload).ok()?;
    let scope = match header.name.as_str() {
        "repos" => FetchScope::Repositories,
        "commits" => FetchScope::commits(header.data.repository?),
        _ => return None,
    };
    Some((scope, header.data.last_page))
}

/// Lowest failed page per scope.
type HeldScopes = HashMap<FetchScope, u32>;

async fn apply_delivery(
    ingestor: &Ingestor,
    delivery: Delivery,
    held: &mut HeldScopes,
    result: &mut IngestTaskResult,
    on_progress: Option<&ProgressCallback>,
) {
    let position = page_position(&delivery.payload);
    if let Some((scope, page)) = &position
        && let Some(&failed_page) = held.get(scope)
        && *page > failed_page
    {
        tracing::warn!(
            scope = %scope,
            page,
            failed_page,
            "Holding back page until the failed page is applied"
        );
        result.held_back += 1;
        return;
    }

    match ingestor.apply_with_retry(&delivery.payload).await {
        Ok(outcome) => {
            if let Some((scope, _)) = &position
                && held.remove(scope).is_some()
            {
                tracing::info!(scope = %scope, page = outcome.page, "Scope released");
            }
            result.applied += 1;
            result.records += outcome.written;
            if outcome.is_redelivery() {
                result.duplicates += 1;
                tracing::debug!(
                    topic = %delivery.topic,
                    key = %delivery.key,
                    page = outcome.page,
                    "Page already recorded"
                );
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
        Err(e) => {
            tracing::warn!(
                topic = %delivery.topic,
                key = %delivery.key,
                error = %e,
                "Failed to apply envelope"
            );
            if let Some((scope, page)) = position {
                held.entry(scope)
                    .and_modify(|failed| *failed = (*failed).min(page))
                    .or_insert(page);
            }
            let error = e.to_string();
            emit(
                on_progress,
                SyncProgress::IngestError {
                    error: error.clone(),
                },
            );
            result.errors.push((delivery.topic, error));
        }
    }
}

/// Spawn a task that applies deliveries from `rx` until the channel closes.
///
/// When `shutdown` flips to `true` the receiver is closed and the buffered
/// deliveries are drained before the task exits.
pub fn spawn_ingest_task(
    ingestor: Arc<Ingestor>,
    mut rx: mpsc::Receiver<Delivery>,
    mut shutdown: watch::Receiver<bool>,
    on_progress: Option<Arc<ProgressCallback>>,
) -> JoinHandle<IngestTaskResult> {
    tokio::spawn(async move {
        let mut result = IngestTaskResult::default();
        let mut held = HeldScopes::new();
        let mut watching = true;
        let task_start = std::time::Instant::now();

        tracing::debug!("Ingest task started");

        loop {
            tokio::select! {
                biased;

                stopped = async { shutdown.wait_for(|stop| *stop).await.is_ok() }, if watching => {
                    if stopped {
                        tracing::debug!("Shutdown requested, draining buffered deliveries");
                        rx.close();
                    }
                    watching = false;
                }

                delivery = rx.recv() => match delivery {
                    Some(delivery) => {
                        apply_delivery(
                            &ingestor,
                            delivery,
                            &mut held,
                            &mut result,
                            on_progress.as_deref(),
                        )
                        .await;
                    }
                    None => break,
                }
            }
        }

        tracing::debug!(
            applied = result.applied,
            duplicates = result.duplicates,
            held_back = result.held_back,
            errors = result.errors.len(),
            elapsed_ms = task_start.elapsed().as_millis(),
            "Ingest task completed"
        );
        result
    })
}

fn panic_message(e: tokio::task::JoinError) -> String {
    if e.is_panic() {
        let payload = e.into_panic();
        if let Some(s) = payload.downcast_ref::<&str>() {
            (*s).to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "Unknown panic".to_string()
        }
    } else if e.is_cancelled() {
        "Task was cancelled".to_string()
    } else {
        format!("Task failed: {}", e)
    }
}

/// Await the ingest task, capturing panics and aborting after
/// [`INGEST_TASK_TIMEOUT`].
pub async fn await_ingest_task(mut handle: JoinHandle<IngestTaskResult>) -> IngestTaskResult {
    tokio::select! {
        joined = &mut handle => match joined {
            Ok(result) => result,
            Err(e) => {
                let panic_info = panic_message(e);
                tracing::error!(panic_info = %panic_info, "Ingest task failed");
                IngestTaskResult {
                    panic_info: Some(panic_info),
                    ..Default::default()
                }
            }
        },
        _ = tokio::time::sleep(INGEST_TASK_TIMEOUT) => {
            handle.abort();
            tracing::error!(
                timeout_secs = INGEST_TASK_TIMEOUT.as_secs(),
                "Ingest task timed out, a delivery sender is still alive"
            );
            IngestTaskResult {
                panic_info: Some(format!(
                    "Ingest task timed out after {}s",
                    INGEST_TASK_TIMEOUT.as_secs()
                )),
                ..Default::default()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    use sea_orm::{DatabaseBackend, DbErr, MockDatabase, MockExecResult};

    fn mock_ingestor() -> Arc<Ingestor> {
        let db = MockDatabase::new(DatabaseBackend::Sqlite).into_connection();
        Arc::new(Ingestor::new(Arc::new(db)))
    }

    fn delivery(payload: &str) -> Delivery {
        Delivery {
            topic: "github.COMMITS".to_string(),
            key: "tracker".to_string(),
            payload: payload.as_bytes().to_vec(),
        }
    }

    fn commits_page(repository: &str, page: u32, sha: &str) -> Delivery {
        let payload = format!(
            r#"{{"name":"commits","data":{{"LastPage":{page},"Repository":"{repository}","FetchTime":"2024-01-01T00:00:00Z","Commits":[{{"sha":"{sha}"}}]}}}}"#
        );
        Delivery {
            topic: "github.COMMITS".to_string(),
            key: repository.to_string(),
            payload: payload.into_bytes(),
        }
    }

    const EMPTY_COMMITS: &str = r#"{"name":"commits","data":{"LastPage":1,"Repository":"tracker","FetchTime":"2024-01-01T00:00:00Z","Commits":[]}}"#;

    #[tokio::test]
    async fn exits_when_senders_are_dropped() {
        let (tx, rx) = mpsc::channel(4);
        let (_shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = spawn_ingest_task(mock_ingestor(), rx, shutdown_rx, None);

        tx.send(delivery(EMPTY_COMMITS)).await.expect("send");
        drop(tx);

        let result = await_ingest_task(handle).await;
        assert_eq!(result.applied, 1);
        assert!(!result.has_errors());
    }

    #[tokio::test]
    async fn errors_are_accumulated_and_reported() {
        let (tx, rx) = mpsc::channel(4);
        let (_shutdown_tx, shutdown_rx) = watch::channel(false);

        let events: Arc<Mutex<Vec<SyncProgress>>> = Arc::new(Mutex::new(Vec::new()));
        let events_capture = Arc::clone(&events);
        let callback: ProgressCallback = Box::new(move |event| {
            events_capture
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .push(event);
        });

        let handle = spawn_ingest_task(mock_ingestor(), rx, shutdown_rx, Some(Arc::new(callback)));
        tx.send(delivery("{broken")).await.expect("send");
        tx.send(delivery(r#"{"name":"issues","data":{}}"#))
            .await
            .expect("send");
        drop(tx);

        let result = await_ingest_task(handle).await;
        assert_eq!(result.applied, 0);
        assert_eq!(result.failed_count(), 2);
        assert_eq!(result.errors[0].0, "github.COMMITS");

        let events = events.lock().unwrap_or_else(|e| e.into_inner());
        assert_eq!(
            events
                .iter()
                .filter(|e| matches!(e, SyncProgress::IngestError { .. }))
                .count(),
            2
        );
    }

    #[tokio::test]
    async fn shutdown_drains_buffered_deliveries() {
        let (tx, rx) = mpsc::channel(4);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        tx.send(delivery(EMPTY_COMMITS)).await.expect("send");
        tx.send(delivery(EMPTY_COMMITS)).await.expect("send");
        shutdown_tx.send(true).expect("signal");

        // The sender is still alive: only the shutdown signal ends the task.
        let handle = spawn_ingest_task(mock_ingestor(), rx, shutdown_rx, None);
        let result = await_ingest_task(handle).await;
        assert_eq!(result.applied, 2);

        assert!(tx.send(delivery(EMPTY_COMMITS)).await.is_err());
    }

    #[test]
    fn page_position_reads_scope_and_page() {
        let delivery = commits_page("tracker", 3, "abc");
        assert_eq!(
            page_position(&delivery.payload),
            Some((FetchScope::commits("tracker"), 3))
        );
        assert_eq!(
            page_position(br#"{"name":"repos","data":{"LastPage":2,"FetchTime":"2024-01-01T00:00:00Z","Repos":[]}}"#),
            Some((FetchScope::Repositories, 2))
        );
        assert_eq!(page_position(b"{broken"), None);
    }

    #[tokio::test]
    async fn failed_page_holds_back_later_pages_of_its_scope() {
        // Each applied commits page runs two statements: the upsert and the
        // history append.
        let db = MockDatabase::new(DatabaseBackend::Sqlite)
            .append_exec_errors([DbErr::Custom("disk full".to_string())])
            .append_exec_results((0..6).map(|_| MockExecResult {
                last_insert_id: 0,
                rows_affected: 1,
            }))
            .into_connection();
        let ingestor = Arc::new(Ingestor::new(Arc::new(db)));

        let (tx, rx) = mpsc::channel(8);
        let (_shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = spawn_ingest_task(ingestor, rx, shutdown_rx, None);

        for delivery in [
            commits_page("tracker", 1, "a1"),
            commits_page("tracker", 2, "a2"),
            commits_page("other", 1, "o1"),
            // The next walk starts again at the failed page.
            commits_page("tracker", 1, "a1"),
            commits_page("tracker", 2, "a2"),
        ] {
            tx.send(delivery).await.expect("send");
        }
        drop(tx);

        let result = await_ingest_task(handle).await;
        assert_eq!(result.errors.len(), 1);
        assert_eq!(result.held_back, 1);
        assert_eq!(result.applied, 3);
        assert_eq!(result.records, 3);
    }

    #[tokio::test]
    async fn await_reports_panics() {
        let handle: JoinHandle<IngestTaskResult> = tokio::spawn(async { panic!("boom") });
        let result = await_ingest_task(handle).await;
        assert_eq!(result.panic_info.as_deref(), Some("boom"));
        assert_eq!(result.failed_count(), 1);
    }
}
