//! `fetch_history`-backed position store.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use sea_orm::{
    ColumnTrait, ConnectionTrait, DatabaseConnection, EntityTrait, QueryFilter, QueryOrder,
    QuerySelect, Set, sea_query::OnConflict,
};
use uuid::Uuid;

use crate::entity::fetch_history::{ActiveModel, Column, Entity as FetchHistory};
use crate::entity::scope_kind::ScopeKind;
use crate::source::FetchScope;

use super::{FetchHistoryEntry, FetchPosition, FetchPositionStore, PositionError};

/// Position store over the `fetch_history` table.
#[derive(Debug, Clone)]
pub struct DbPositionStore {
    db: Arc<DatabaseConnection>,
}

impl DbPositionStore {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    /// Every scope with at least one history row, with its current position.
    pub async fn positions(&self) -> Result<Vec<(FetchScope, FetchPosition)>, PositionError> {
        let scopes = FetchHistory::find()
            .select_only()
            .column(Column::ScopeKind)
            .column(Column::ScopeName)
            .distinct()
            .order_by_asc(Column::ScopeKind)
            .order_by_asc(Column::ScopeName)
            .into_tuple::<(ScopeKind, String)>()
            .all(self.db.as_ref())
            .await?;

        let mut positions = Vec::with_capacity(scopes.len());
        for (kind, name) in scopes {
            let scope = FetchScope::from_parts(kind, &name);
            let position = self.position(&scope).await?;
            positions.push((scope, position));
        }
        Ok(positions)
    }
}

/// ON CONFLICT clause for history appends: redelivered pages are dropped.
pub(crate) fn build_append_on_conflict() -> OnConflict {
    OnConflict::columns([
        Column::ScopeKind,
        Column::ScopeName,
        Column::LastPage,
        Column::FetchedAt,
    ])
    .do_nothing()
    .to_owned()
}

/// Append one history row on any connection or transaction.
///
/// Returns `false` when the row already exists.
pub(crate) async fn append_entry<C: ConnectionTrait>(
    conn: &C,
    entry: &FetchHistoryEntry,
) -> Result<bool, PositionError> {
    let model = ActiveModel {
        id: Set(Uuid::new_v4()),
        scope_kind: Set(entry.scope.kind()),
        scope_name: Set(entry.scope.name().to_string()),
        last_page: Set(page_to_db(&entry.scope, entry.last_page)?),
        total_items_seen: Set(page_to_db(&entry.scope, entry.total_items_seen)?),
        fetched_at: Set(entry.fetched_at.fixed_offset()),
        recorded_at: Set(Utc::now().fixed_offset()),
    };

    let rows = FetchHistory::insert(model)
        .on_conflict(build_append_on_conflict())
        .exec_without_returning(conn)
        .await?;

    if rows == 0 {
        tracing::debug!(
            scope = %entry.scope,
            page = entry.last_page,
            "History row already recorded"
        );
    }

    Ok(rows > 0)
}

fn page_to_db(scope: &FetchScope, page: u32) -> Result<i32, PositionError> {
    i32::try_from(page).map_err(|_| PositionError::InvalidPage {
        scope: scope.to_string(),
        page: i64::from(page),
    })
}

#[async_trait]
impl FetchPositionStore for DbPositionStore {
    async fn position(&self, scope: &FetchScope) -> Result<FetchPosition, PositionError> {
        let filter = || {
            FetchHistory::find()
                .filter(Column::ScopeKind.eq(scope.kind()))
                .filter(Column::ScopeName.eq(scope.name()))
        };

        let Some(latest_page) = filter()
            .order_by_desc(Column::LastPage)
            .one(self.db.as_ref())
            .await?
        else {
            return Ok(FetchPosition::default());
        };

        let latest_fetch = filter()
            .order_by_desc(Column::FetchedAt)
            .one(self.db.as_ref())
            .await?;

        let last_page =
            u32::try_from(latest_page.last_page).map_err(|_| PositionError::InvalidPage {
                scope: scope.to_string(),
                page: i64::from(latest_page.last_page),
            })?;

        Ok(FetchPosition {
            last_page,
            last_fetched_at: latest_fetch.map(|row| row.fetched_at.with_timezone(&Utc)),
        })
    }

    async fn record(&self, entry: &FetchHistoryEntry) -> Result<bool, PositionError> {
        append_entry(self.db.as_ref(), entry).await
    }
}
