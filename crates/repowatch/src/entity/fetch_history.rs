//! FetchHistory entity - append-only log of published pages per scope.
//!
//! The current position of a scope is the row with the highest `last_page`.
//! Rows are never updated; a redelivered envelope collides on the unique
//! `(scope_kind, scope_name, last_page, fetched_at)` index and is dropped.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

use crate::entity::scope_kind::ScopeKind;

/// One successfully ingested page.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "fetch_history")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    /// Kind of scope (repos or commits).
    pub scope_kind: ScopeKind,
    /// Scope name: empty for the global listing, the repository name for commits.
    pub scope_name: String,

    /// Page number carried by the envelope.
    pub last_page: i32,
    /// Number of records on that page.
    pub total_items_seen: i32,
    /// Fetch time carried by the envelope.
    pub fetched_at: DateTimeWithTimeZone,
    /// When the row was appended.
    pub recorded_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
