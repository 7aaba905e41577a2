//! Fetch-position store.
//!
//! Answers "how far has this scope been fetched" and accepts the append of a
//! new [`FetchHistoryEntry`] once a published page has been ingested. The log
//! is append-only; the current position of a scope is its highest recorded
//! page.
//!
//! - [`db`] - `DbPositionStore`, backed by the `fetch_history` table
//! - [`memory`] - `MemoryPositionStore`, an in-process log

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sea_orm::DbErr;
use thiserror::Error;

use crate::source::FetchScope;

pub mod db;
pub mod memory;

pub use db::DbPositionStore;
pub use memory::MemoryPositionStore;

/// Errors from a fetch-position store.
#[derive(Debug, Error)]
pub enum PositionError {
    #[error("Database error: {0}")]
    Database(#[from] DbErr),

    /// A stored row carries a page number that cannot be a cursor.
    #[error("Invalid page {page} recorded for {scope}")]
    InvalidPage { scope: String, page: i64 },
}

/// Last known position of a scope.
///
/// The zero value (`last_page == 0`, no timestamp) means the scope has never
/// been fetched.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FetchPosition {
    /// Highest page recorded for the scope.
    pub last_page: u32,
    /// Latest fetch time recorded for the scope.
    pub last_fetched_at: Option<DateTime<Utc>>,
}

impl FetchPosition {
    #[must_use]
    pub fn is_unseen(&self) -> bool {
        self.last_page == 0 && normalize_watermark(self.last_fetched_at).is_none()
    }

    /// The page a resuming walk starts at.
    #[must_use]
    pub fn next_page(&self) -> u32 {
        self.last_page.saturating_add(1)
    }
}

/// One ingested page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchHistoryEntry {
    pub scope: FetchScope,
    pub last_page: u32,
    pub total_items_seen: u32,
    pub fetched_at: DateTime<Utc>,
}

/// Read/append contract for fetch positions.
///
/// Implementations must tolerate concurrent callers on different scopes.
#[async_trait]
pub trait FetchPositionStore: Send + Sync {
    /// Current position of `scope`, or the zero value if it was never fetched.
    async fn position(&self, scope: &FetchScope) -> Result<FetchPosition, PositionError>;

    /// Append a history row.
    ///
    /// Returns `false` when an identical `(scope, last_page, fetched_at)` row
    /// already exists.
    async fn record(&self, entry: &FetchHistoryEntry) -> Result<bool, PositionError>;
}

/// Drop sentinel timestamps (Unix epoch zero or earlier, e.g. year 1).
///
/// Stores return these for unseen scopes; they must never reach an upstream
/// `since` filter.
#[must_use]
pub fn normalize_watermark(ts: Option<DateTime<Utc>>) -> Option<DateTime<Utc>> {
    ts.filter(|t| t.timestamp() > 0)
}
