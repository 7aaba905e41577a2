//! Walk and schedule configuration, results and constants.

use std::time::Duration;

use crate::source::{CursorDiscipline, FetchScope};

/// Default records per upstream page.
pub const DEFAULT_PAGE_SIZE: u32 = 100;

/// Upper bound accepted by the GitHub list endpoints.
pub const MAX_PAGE_SIZE: u32 = 100;

/// Default bound on every source, store and publish call.
pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(10);

/// Repository listing interval.
pub const DEFAULT_REPOS_INTERVAL: Duration = Duration::from_secs(24 * 60 * 60);

/// Commit walk interval.
pub const DEFAULT_COMMITS_INTERVAL: Duration = Duration::from_secs(60 * 60);

/// Delay before the first commit tick, so the first repository listing has
/// a chance to populate the catalog.
pub const DEFAULT_COMMITS_INITIAL_DELAY: Duration = Duration::from_secs(60);

/// How a walker pages through one scope kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WalkConfig {
    /// Records requested per page.
    pub page_size: u32,
    /// Cursor discipline for every scope this walker handles.
    pub discipline: CursorDiscipline,
    /// Bound on each individual call.
    pub call_timeout: Duration,
}

impl Default for WalkConfig {
    fn default() -> Self {
        Self {
            page_size: DEFAULT_PAGE_SIZE,
            discipline: CursorDiscipline::default(),
            call_timeout: DEFAULT_CALL_TIMEOUT,
        }
    }
}

impl WalkConfig {
    #[must_use]
    pub fn with_discipline(mut self, discipline: CursorDiscipline) -> Self {
        self.discipline = discipline;
        self
    }

    /// Set the page size, clamped to `1..=MAX_PAGE_SIZE`.
    #[must_use]
    pub fn with_page_size(mut self, page_size: u32) -> Self {
        self.page_size = page_size.clamp(1, MAX_PAGE_SIZE);
        self
    }

    #[must_use]
    pub fn with_call_timeout(mut self, call_timeout: Duration) -> Self {
        self.call_timeout = call_timeout;
        self
    }
}

/// Outcome of one successful walk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WalkSummary {
    pub scope: FetchScope,
    /// Page the walk started at.
    pub first_page: u32,
    pub pages_published: u32,
    pub items_total: usize,
    /// Page number of the last published envelope.
    pub last_page: Option<u32>,
}

impl WalkSummary {
    pub(crate) fn new(scope: FetchScope, first_page: u32) -> Self {
        Self {
            scope,
            first_page,
            pages_published: 0,
            items_total: 0,
            last_page: None,
        }
    }

    pub(crate) fn record_page(&mut self, page: u32, count: usize) {
        self.pages_published += 1;
        self.items_total += count;
        self.last_page = Some(page);
    }

    /// True when the walk found nothing new.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.pages_published == 0
    }
}

/// Scheduler timing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScheduleConfig {
    pub interval: Duration,
    /// Wait before the first tick.
    pub initial_delay: Duration,
}

impl ScheduleConfig {
    /// Daily repository listing, first tick immediately.
    #[must_use]
    pub fn repos() -> Self {
        Self {
            interval: DEFAULT_REPOS_INTERVAL,
            initial_delay: Duration::ZERO,
        }
    }

    /// Hourly commit walks, first tick after a short delay.
    #[must_use]
    pub fn commits() -> Self {
        Self {
            interval: DEFAULT_COMMITS_INTERVAL,
            initial_delay: DEFAULT_COMMITS_INITIAL_DELAY,
        }
    }
}

/// Joined result of one scheduler tick.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
#[must_use = "TickReport carries per-scope failures that should be reported"]
pub struct TickReport {
    /// Walks that reached an empty page.
    pub succeeded: usize,
    /// Walks that returned an error.
    pub failed: usize,
    /// Walk tasks that panicked.
    pub panicked: usize,
    /// Scopes left alone because an earlier tick is still walking them.
    pub skipped: usize,
    /// Records published across all walks in the tick.
    pub items_total: usize,
    /// `(scope, error)` for every failed or panicked walk.
    pub errors: Vec<(String, String)>,
}

impl TickReport {
    pub fn has_errors(&self) -> bool {
        self.failed > 0 || self.panicked > 0
    }

    pub fn total(&self) -> usize {
        self.succeeded + self.failed + self.panicked
    }
}
