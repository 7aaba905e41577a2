//! Pagination walking and scheduling.
//!
//! # Module Structure
//!
//! - [`types`] - `WalkConfig`, `WalkSummary`, `ScheduleConfig`, `TickReport`, constants
//! - [`progress`] - Progress reporting: `SyncProgress`, `ProgressCallback`, `emit()`
//! - [`walker`] - `PaginationWalker`: resume, fetch, publish, advance
//! - [`scheduler`] - `Scheduler`: interval ticks with per-scope fan-out
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use repowatch::sync::{PaginationWalker, Scheduler, ScheduleConfig, StaticScopes, WalkConfig};
//!
//! let walker = PaginationWalker::new(source, store, publisher, WalkConfig::default());
//! let summary = walker.walk(&FetchScope::Repositories).await?;
//! println!("Published {} repositories", summary.items_total);
//!
//! let scheduler = Scheduler::new(
//!     "repos",
//!     walker,
//!     Arc::new(StaticScopes::repositories()),
//!     ScheduleConfig::repos(),
//! );
//! scheduler.run(shutdown_rx).await;
//! ```

mod progress;
pub mod scheduler;
#[cfg(test)]
pub(crate) mod testing;
mod types;
pub mod walker;

pub use types::{ScheduleConfig, TickReport, WalkConfig, WalkSummary};

pub use types::{
    DEFAULT_CALL_TIMEOUT, DEFAULT_COMMITS_INITIAL_DELAY, DEFAULT_COMMITS_INTERVAL,
    DEFAULT_PAGE_SIZE, DEFAULT_REPOS_INTERVAL, MAX_PAGE_SIZE,
};

pub use progress::{ProgressCallback, SyncProgress, emit};

pub use scheduler::{CatalogScopes, Scheduler, ScopeProvider, StaticScopes};
pub use walker::{PaginationWalker, WalkError};
