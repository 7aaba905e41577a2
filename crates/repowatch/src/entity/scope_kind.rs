//! Scope kind enum stored alongside fetch history rows.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Kind of resource a fetch scope paginates.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, EnumIter, DeriveActiveEnum,
    Serialize, Deserialize,
)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::None)")]
#[serde(rename_all = "lowercase")]
pub enum ScopeKind {
    /// The global repository listing.
    #[sea_orm(string_value = "repos")]
    Repos,
    /// One repository's commit history.
    #[sea_orm(string_value = "commits")]
    Commits,
}

impl std::fmt::Display for ScopeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ScopeKind::Repos => write!(f, "repos"),
            ScopeKind::Commits => write!(f, "commits"),
        }
    }
}

impl std::str::FromStr for ScopeKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "repos" | "repositories" => Ok(ScopeKind::Repos),
            "commits" => Ok(ScopeKind::Commits),
            _ => Err(format!("Unknown scope kind: {}", s)),
        }
    }
}
