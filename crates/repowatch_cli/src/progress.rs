//! Progress reporting for walks, ticks and ingestion.
//!
//! The daemon runs unattended, so every event is rendered as a structured
//! tracing line.

use std::sync::Arc;

use repowatch::sync::{ProgressCallback, SyncProgress};

/// Logging reporter using tracing for structured output.
#[derive(Debug, Default)]
pub struct LoggingReporter;

impl LoggingReporter {
    pub fn new() -> Self {
        Self
    }

    pub fn handle(&self, event: SyncProgress) {
        match event {
            SyncProgress::WalkStarted { scope, cursor } => {
                tracing::debug!(scope = %scope, cursor = %cursor, "Walk started");
            }

            SyncProgress::PagePublished {
                scope,
                page,
                count,
                items_total,
            } => {
                tracing::debug!(scope = %scope, page, count, items_total, "Published page");
            }

            SyncProgress::WalkComplete {
                scope,
                pages,
                items_total,
            } => {
                if pages > 0 {
                    tracing::info!(scope = %scope, pages, items_total, "Walk complete");
                } else {
                    tracing::debug!(scope = %scope, "Nothing new");
                }
            }

            SyncProgress::WalkFailed { scope, page, error } => {
                tracing::warn!(scope = %scope, page, error = %error, "Walk failed");
            }

            SyncProgress::RepositoryRefreshed { name } => {
                tracing::info!(repository = %name, "Published repository snapshot");
            }

            SyncProgress::TickStarted { label, scopes } => {
                tracing::info!(scheduler = %label, scopes, "Tick started");
            }

            SyncProgress::TickComplete {
                label,
                succeeded,
                failed,
                panicked,
            } => {
                if failed > 0 || panicked > 0 {
                    tracing::warn!(scheduler = %label, succeeded, failed, panicked, "Tick finished with failures");
                } else {
                    tracing::info!(scheduler = %label, succeeded, "Tick complete");
                }
            }

            SyncProgress::Ingested { kind, count, page } => {
                tracing::debug!(kind = %kind, count, page, "Ingested envelope");
            }

            SyncProgress::IngestError { error } => {
                tracing::error!(error = %error, "Failed to ingest envelope");
            }

            SyncProgress::Warning { message } => {
                tracing::warn!(message = %message, "Warning");
            }

            _ => {}
        }
    }

    /// Convert to a ProgressCallback for the library.
    pub fn as_callback(self: &Arc<Self>) -> Arc<ProgressCallback> {
        let reporter = Arc::clone(self);
        Arc::new(Box::new(move |event| {
            reporter.handle(event);
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn callback_handles_every_event_kind() {
        let callback = Arc::new(LoggingReporter::new()).as_callback();
        for event in [
            SyncProgress::WalkStarted {
                scope: "repos".to_string(),
                cursor: "page 1".to_string(),
            },
            SyncProgress::WalkComplete {
                scope: "repos".to_string(),
                pages: 0,
                items_total: 0,
            },
            SyncProgress::TickComplete {
                label: "commits".to_string(),
                succeeded: 1,
                failed: 1,
                panicked: 0,
            },
            SyncProgress::IngestError {
                error: "boom".to_string(),
            },
        ] {
            callback(event);
        }
    }
}
