//! Paged source clients.
//!
//! A [`PagedSource`] returns one page of raw upstream records for a
//! [`FetchScope`] and a [`PageCursor`]. An empty page means the scope is
//! exhausted for now.
//!
//! - [`github`] - GitHub REST implementation over [`crate::http::HttpTransport`]
//! - [`error`] - `SourceError`

use std::fmt;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub mod error;
#[cfg(feature = "github")]
pub mod github;

pub use crate::entity::scope_kind::ScopeKind;
pub use error::SourceError;

/// A record exactly as the upstream API returned it.
///
/// Shaping happens downstream in [`crate::ingest`]; the fetch path only
/// cursors and delivers.
pub type RawRecord = serde_json::Value;

/// What a pagination walk tracks a cursor for.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum FetchScope {
    /// The global repository listing.
    Repositories,
    /// The commit history of one named repository.
    Commits { repository: String },
}

impl FetchScope {
    pub fn commits(repository: impl Into<String>) -> Self {
        Self::Commits {
            repository: repository.into(),
        }
    }

    #[must_use]
    pub fn kind(&self) -> ScopeKind {
        match self {
            Self::Repositories => ScopeKind::Repos,
            Self::Commits { .. } => ScopeKind::Commits,
        }
    }

    /// Scope name as stored in fetch history. Empty for the global scope.
    #[must_use]
    pub fn name(&self) -> &str {
        match self {
            Self::Repositories => "",
            Self::Commits { repository } => repository,
        }
    }

    /// Rebuild a scope from its stored `(kind, name)` pair.
    #[must_use]
    pub fn from_parts(kind: ScopeKind, name: &str) -> Self {
        match kind {
            ScopeKind::Repos => Self::Repositories,
            ScopeKind::Commits => Self::commits(name),
        }
    }
}

impl fmt::Display for FetchScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Repositories => write!(f, "repos"),
            Self::Commits { repository } => write!(f, "commits:{}", repository),
        }
    }
}

/// Which cursor discipline a resource is walked with.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CursorDiscipline {
    /// Resume at the last recorded page plus one.
    #[default]
    PageNumber,
    /// Filter by a persisted `since` timestamp and page from 1 within the walk.
    Watermark,
}

impl fmt::Display for CursorDiscipline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::PageNumber => write!(f, "page_number"),
            Self::Watermark => write!(f, "watermark"),
        }
    }
}

/// Resumable position within a paginated resource.
///
/// The variant is fixed for the lifetime of a walk; [`PageCursor::advance`]
/// never switches discipline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageCursor {
    /// 1-indexed page number.
    PageNumber(u32),
    /// `since` filter plus the page offset inside the current walk.
    Watermark {
        since: Option<DateTime<Utc>>,
        page: u32,
    },
}

impl PageCursor {
    /// Page number to request upstream.
    #[must_use]
    pub fn page(&self) -> u32 {
        match self {
            Self::PageNumber(page) => *page,
            Self::Watermark { page, .. } => *page,
        }
    }

    /// The `since` filter, if this is a watermark cursor with one.
    #[must_use]
    pub fn since(&self) -> Option<DateTime<Utc>> {
        match self {
            Self::PageNumber(_) => None,
            Self::Watermark { since, .. } => *since,
        }
    }

    #[must_use]
    pub fn discipline(&self) -> CursorDiscipline {
        match self {
            Self::PageNumber(_) => CursorDiscipline::PageNumber,
            Self::Watermark { .. } => CursorDiscipline::Watermark,
        }
    }

    /// The cursor for the next page, same discipline.
    #[must_use]
    pub fn advance(&self) -> Self {
        match *self {
            Self::PageNumber(page) => Self::PageNumber(page.saturating_add(1)),
            Self::Watermark { since, page } => Self::Watermark {
                since,
                page: page.saturating_add(1),
            },
        }
    }
}

impl fmt::Display for PageCursor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::PageNumber(page) => write!(f, "page {}", page),
            Self::Watermark {
                since: Some(since),
                page,
            } => write!(f, "page {} since {}", page, since.to_rfc3339()),
            Self::Watermark { since: None, page } => write!(f, "page {} (no watermark)", page),
        }
    }
}

/// One page of upstream records.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Page {
    pub items: Vec<RawRecord>,
}

impl Page {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.items.len()
    }
}

impl From<Vec<RawRecord>> for Page {
    fn from(items: Vec<RawRecord>) -> Self {
        Self { items }
    }
}

/// Rate limit state reported by upstream response headers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateLimitInfo {
    pub limit: usize,
    pub remaining: usize,
    pub reset_at: DateTime<Utc>,
}

/// Upstream paginated data source.
#[async_trait]
pub trait PagedSource: Send + Sync {
    /// Fetch one page for `scope` at `cursor`.
    ///
    /// Returns an empty page once the scope is exhausted.
    async fn fetch_page(
        &self,
        scope: &FetchScope,
        cursor: &PageCursor,
        page_size: u32,
    ) -> Result<Page, SourceError>;

    /// Fetch the current metadata record for one repository.
    async fn fetch_repository(&self, name: &str) -> Result<RawRecord, SourceError>;
}
