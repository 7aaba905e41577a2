//! Repowatch - incremental GitHub fetching with at-least-once delivery.
//!
//! Repository listings and per-repository commit histories are walked page by
//! page from the last recorded position. Every non-empty page is published as
//! a self-describing envelope; a downstream consumer applies it and appends
//! the page to the fetch history, which is what advances the cursor.
//!
//! ```text
//! PagedSource -> PaginationWalker -> EventPublisher -> Ingestor -> Database
//!                      ^                                              |
//!                      +------------- FetchPositionStore <------------+
//! ```
//!
//! # Features
//!
//! - `sqlite` / `postgres` - database backends
//! - `migrate` - schema migrations and [`connect_and_migrate`]
//! - `github` - the GitHub REST source over reqwest
//! - `kafka` - Kafka publisher and consumer
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use repowatch::{connect_and_migrate, position::DbPositionStore, publish::ChannelPublisher};
//! use repowatch::sync::{PaginationWalker, WalkConfig};
//!
//! let db = Arc::new(connect_and_migrate("sqlite://repowatch.db?mode=rwc").await?);
//! let (publisher, deliveries) = ChannelPublisher::channel(64);
//! let walker = PaginationWalker::new(
//!     Arc::new(source),
//!     Arc::new(DbPositionStore::new(Arc::clone(&db))),
//!     Arc::new(publisher),
//!     WalkConfig::default(),
//! );
//! let summary = walker.walk(&FetchScope::Repositories).await?;
//! ```

pub mod catalog;
pub mod db;
pub mod entity;
pub mod http;
pub mod ingest;
pub mod position;
pub mod publish;
pub mod retry;
pub mod source;
pub mod sync;

#[cfg(feature = "migrate")]
pub mod migration;

pub use db::connect;
#[cfg(feature = "migrate")]
pub use db::connect_and_migrate;
pub use entity::prelude::*;
pub use source::{CursorDiscipline, FetchScope, Page, PageCursor, PagedSource, SourceError};
