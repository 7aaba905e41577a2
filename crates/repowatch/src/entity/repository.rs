//! Repository entity - normalized repository metadata keyed by name.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Repository model, written by the ingest side from `repos` and `repo` envelopes.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "repositories")]
pub struct Model {
    /// Internal UUID primary key.
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    /// Repository name, the natural key.
    #[sea_orm(unique)]
    pub name: String,

    // ─── Content ─────────────────────────────────────────────────────────────
    #[sea_orm(column_type = "Text", nullable)]
    pub description: Option<String>,
    pub html_url: String,
    pub language: Option<String>,

    // ─── Statistics ──────────────────────────────────────────────────────────
    pub forks_count: i32,
    pub stargazers_count: i32,
    pub open_issues_count: i32,
    pub watchers_count: i32,

    // ─── Timestamps ──────────────────────────────────────────────────────────
    /// Creation time on the platform.
    pub created_at: Option<DateTimeWithTimeZone>,
    /// Last update time on the platform.
    pub updated_at: Option<DateTimeWithTimeZone>,
    /// When this row was last written.
    pub synced_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
