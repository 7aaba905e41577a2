//! Commit entity - normalized commits keyed by SHA.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Commit model, written by the ingest side from `commits` envelopes.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "commits")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    /// Commit hash, the natural key.
    #[sea_orm(unique)]
    pub sha: String,

    /// Name of the repository the commit was fetched for.
    pub repository_name: String,

    pub url: String,
    #[sea_orm(column_type = "Text")]
    pub message: String,
    pub author_name: Option<String>,

    pub authored_at: Option<DateTimeWithTimeZone>,
    pub committed_at: Option<DateTimeWithTimeZone>,
    pub synced_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
