//! Pagination walker.
//!
//! A walk resumes a scope from its recorded position, requests pages in
//! increasing order until the source returns an empty page, and publishes
//! every non-empty page as its own envelope. The walker never writes the
//! position store: the position advances when the consumer ingests the
//! envelope, so any failure leaves the next walk starting at the same page.
//!
//! Watermark walks hold each page back until the next one has been fetched.
//! Every page except the last carries the watermark the walk started from;
//! only the last page, published once the source is exhausted, carries the
//! walk's start time. A walk that fails part way never moves the watermark.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::position::{FetchPosition, FetchPositionStore, PositionError, normalize_watermark};
use crate::publish::{EventPublisher, FetchEnvelope, PublishError};
use crate::source::{
    CursorDiscipline, FetchScope, PageCursor, PagedSource, RawRecord, SourceError,
};

use super::progress::{ProgressCallback, SyncProgress, emit};
use super::types::{WalkConfig, WalkSummary};

/// Errors that abort a walk.
#[derive(Debug, Error)]
pub enum WalkError {
    #[error("Source error: {0}")]
    Source(#[from] SourceError),

    /// The resume point could not be read; the walk does not guess one.
    #[error("Position store error: {0}")]
    Position(#[from] PositionError),

    #[error("Publish error: {0}")]
    Publish(#[from] PublishError),

    #[error("Timed out after {after:?} during {operation}")]
    Timeout {
        operation: &'static str,
        after: Duration,
    },

    #[error("Cursor discipline mismatch: walker uses {expected}, cursor is {found}")]
    MixedCursor {
        expected: CursorDiscipline,
        found: CursorDiscipline,
    },
}

/// Walks one scope at a time over a shared source, store and publisher.
///
/// Concurrent walks of different scopes are safe. Concurrent walks of the
/// same scope are not guarded here and must be avoided by the caller.
pub struct PaginationWalker<S: ?Sized, P: ?Sized, B: ?Sized> {
    source: Arc<S>,
    store: Arc<P>,
    publisher: Arc<B>,
    config: WalkConfig,
    on_progress: Option<Arc<ProgressCallback>>,
}

impl<S: ?Sized, P: ?Sized, B: ?Sized> Clone for PaginationWalker<S, P, B> {
    fn clone(&self) -> Self {
        Self {
            source: Arc::clone(&self.source),
            store: Arc::clone(&self.store),
            publisher: Arc::clone(&self.publisher),
            config: self.config,
            on_progress: self.on_progress.clone(),
        }
    }
}

impl<S, P, B> PaginationWalker<S, P, B>
where
    S: PagedSource + ?Sized,
    P: FetchPositionStore + ?Sized,
    B: EventPublisher + ?Sized,
{
    pub fn new(source: Arc<S>, store: Arc<P>, publisher: Arc<B>, config: WalkConfig) -> Self {
        Self {
            source,
            store,
            publisher,
            config,
            on_progress: None,
        }
    }

    #[must_use]
    pub fn with_progress(mut self, on_progress: Arc<ProgressCallback>) -> Self {
        self.on_progress = Some(on_progress);
        self
    }

    #[must_use]
    pub fn config(&self) -> &WalkConfig {
        &self.config
    }

    /// Starting cursor for a scope at `position`.
    ///
    /// Page-number walks resume after the highest recorded page. Watermark
    /// walks filter from the latest recorded fetch time and page from 1.
    #[must_use]
    pub fn resume_cursor(&self, position: &FetchPosition) -> PageCursor {
        match self.config.discipline {
            CursorDiscipline::PageNumber => PageCursor::PageNumber(position.next_page()),
            CursorDiscipline::Watermark => PageCursor::Watermark {
                since: normalize_watermark(position.last_fetched_at),
                page: 1,
            },
        }
    }

    /// Resume `scope` from the store and walk it to exhaustion.
    #[tracing::instrument(skip_all, fields(scope = %scope))]
    pub async fn walk(&self, scope: &FetchScope) -> Result<WalkSummary, WalkError> {
        let position = self
            .timed("position lookup", self.store.position(scope))
            .await
            .inspect_err(|e| self.report_failure(scope, 0, e))?;

        let cursor = self.resume_cursor(&position);
        tracing::debug!(
            last_page = position.last_page,
            unseen = position.is_unseen(),
            cursor = %cursor,
            "Resuming"
        );

        self.walk_from(scope, cursor).await
    }

    /// Walk `scope` starting at an explicit cursor.
    ///
    /// The cursor must use this walker's discipline.
    pub async fn walk_from(
        &self,
        scope: &FetchScope,
        start: PageCursor,
    ) -> Result<WalkSummary, WalkError> {
        if start.discipline() != self.config.discipline {
            return Err(WalkError::MixedCursor {
                expected: self.config.discipline,
                found: start.discipline(),
            });
        }

        let scope_label = scope.to_string();
        let fetch_time = Utc::now();
        let carried_watermark = start.since().unwrap_or(DateTime::<Utc>::UNIX_EPOCH);
        let mut cursor = start;
        let mut summary = WalkSummary::new(scope.clone(), cursor.page());
        let mut held: Option<(PageCursor, Vec<RawRecord>)> = None;

        emit(
            self.on_progress.as_deref(),
            SyncProgress::WalkStarted {
                scope: scope_label.clone(),
                cursor: cursor.to_string(),
            },
        );

        loop {
            let page = self
                .timed(
                    "page fetch",
                    self.source
                        .fetch_page(scope, &cursor, self.config.page_size),
                )
                .await
                .inspect_err(|e| self.report_failure(scope, cursor.page(), e))?;

            if page.is_empty() {
                tracing::debug!(page = cursor.page(), "Empty page, scope exhausted");
                break;
            }

            let ready = match cursor.discipline() {
                CursorDiscipline::PageNumber => Some((cursor, fetch_time, page.items)),
                CursorDiscipline::Watermark => held
                    .replace((cursor, page.items))
                    .map(|(previous, items)| (previous, carried_watermark, items)),
            };
            if let Some((page_cursor, stamp, items)) = ready {
                self.publish_page(scope, &page_cursor, stamp, items, &mut summary).await?;
            }

            cursor = cursor.advance();
        }

        if let Some((last, items)) = held.take() {
            self.publish_page(scope, &last, fetch_time, items, &mut summary).await?;
        }

        tracing::info!(
            pages = summary.pages_published,
            items_total = summary.items_total,
            "Walk complete"
        );
        emit(
            self.on_progress.as_deref(),
            SyncProgress::WalkComplete {
                scope: scope_label,
                pages: summary.pages_published,
                items_total: summary.items_total,
            },
        );

        Ok(summary)
    }

    /// Fetch one repository's metadata and publish it as a `repo` envelope.
    #[tracing::instrument(skip_all, fields(repository = %name))]
    pub async fn refresh_repository(&self, name: &str) -> Result<(), WalkError> {
        let record = self
            .timed("repository fetch", self.source.fetch_repository(name))
            .await?;
        let envelope = FetchEnvelope::repo(record, Utc::now())?;
        self.timed("publish", self.publisher.publish_envelope(&envelope))
            .await?;

        tracing::debug!("Published repository snapshot");
        emit(
            self.on_progress.as_deref(),
            SyncProgress::RepositoryRefreshed {
                name: name.to_string(),
            },
        );
        Ok(())
    }

    /// Publish one page stamped with `fetch_time` and count it.
    async fn publish_page(
        &self,
        scope: &FetchScope,
        cursor: &PageCursor,
        fetch_time: DateTime<Utc>,
        items: Vec<RawRecord>,
        summary: &mut WalkSummary,
    ) -> Result<(), WalkError> {
        let count = items.len();
        let envelope = FetchEnvelope::page(scope, cursor.page(), fetch_time, items);
        self.timed("publish", self.publisher.publish_envelope(&envelope))
            .await
            .inspect_err(|e| self.report_failure(scope, cursor.page(), e))?;

        summary.record_page(cursor.page(), count);
        tracing::debug!(
            page = cursor.page(),
            count,
            items_total = summary.items_total,
            "Published page"
        );
        emit(
            self.on_progress.as_deref(),
            SyncProgress::PagePublished {
                scope: scope.to_string(),
                page: cursor.page(),
                count,
                items_total: summary.items_total,
            },
        );
        Ok(())
    }

    async fn timed<T, E>(
        &self,
        operation: &'static str,
        call: impl Future<Output = Result<T, E>>,
    ) -> Result<T, WalkError>
    where
        WalkError: From<E>,
    {
        match tokio::time::timeout(self.config.call_timeout, call).await {
            Ok(result) => result.map_err(WalkError::from),
            Err(_) => Err(WalkError::Timeout {
                operation,
                after: self.config.call_timeout,
            }),
        }
    }

    fn report_failure(&self, scope: &FetchScope, page: u32, error: &WalkError) {
        tracing::debug!(page, error = %error, "Walk aborted");
        emit(
            self.on_progress.as_deref(),
            SyncProgress::WalkFailed {
                scope: scope.to_string(),
                page,
                error: error.to_string(),
            },
        );
    }
}
