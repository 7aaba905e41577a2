//! In-process position store.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::source::FetchScope;

use super::{FetchHistoryEntry, FetchPosition, FetchPositionStore, PositionError};

/// Append-only history kept in memory, keyed by scope.
#[derive(Debug, Default)]
pub struct MemoryPositionStore {
    history: Mutex<HashMap<FetchScope, Vec<FetchHistoryEntry>>>,
}

impl MemoryPositionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// All rows recorded for `scope`, in append order.
    #[must_use]
    pub fn entries(&self, scope: &FetchScope) -> Vec<FetchHistoryEntry> {
        let history = self.history.lock().unwrap_or_else(|e| e.into_inner());
        history.get(scope).cloned().unwrap_or_default()
    }
}

#[async_trait]
impl FetchPositionStore for MemoryPositionStore {
    async fn position(&self, scope: &FetchScope) -> Result<FetchPosition, PositionError> {
        let history = self.history.lock().unwrap_or_else(|e| e.into_inner());
        let Some(rows) = history.get(scope) else {
            return Ok(FetchPosition::default());
        };

        Ok(FetchPosition {
            last_page: rows.iter().map(|r| r.last_page).max().unwrap_or(0),
            last_fetched_at: rows.iter().map(|r| r.fetched_at).max(),
        })
    }

    async fn record(&self, entry: &FetchHistoryEntry) -> Result<bool, PositionError> {
        let mut history = self.history.lock().unwrap_or_else(|e| e.into_inner());
        let rows = history.entry(entry.scope.clone()).or_default();

        let duplicate = rows
            .iter()
            .any(|r| r.last_page == entry.last_page && r.fetched_at == entry.fetched_at);
        if duplicate {
            return Ok(false);
        }

        rows.push(entry.clone());
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone, Utc};

    fn entry(scope: FetchScope, page: u32, minutes: i64) -> FetchHistoryEntry {
        FetchHistoryEntry {
            scope,
            last_page: page,
            total_items_seen: 2,
            fetched_at: Utc.with_ymd_and_hms(2024, 5, 1, 8, 0, 0).unwrap()
                + Duration::minutes(minutes),
        }
    }

    #[tokio::test]
    async fn unseen_scope_has_zero_position() {
        let store = MemoryPositionStore::new();
        let position = store
            .position(&FetchScope::Repositories)
            .await
            .expect("position");
        assert!(position.is_unseen());
    }

    #[tokio::test]
    async fn position_is_max_page_across_rows() {
        let store = MemoryPositionStore::new();
        let scope = FetchScope::commits("tracker");
        store.record(&entry(scope.clone(), 1, 0)).await.expect("record");
        store.record(&entry(scope.clone(), 3, 1)).await.expect("record");
        store.record(&entry(scope.clone(), 2, 2)).await.expect("record");

        let position = store.position(&scope).await.expect("position");
        assert_eq!(position.last_page, 3);
        assert_eq!(position.last_fetched_at, Some(entry(scope, 0, 2).fetched_at));
    }

    #[tokio::test]
    async fn duplicate_rows_are_dropped() {
        let store = MemoryPositionStore::new();
        let scope = FetchScope::Repositories;
        let row = entry(scope.clone(), 1, 0);

        assert!(store.record(&row).await.expect("record"));
        assert!(!store.record(&row).await.expect("record"));
        assert_eq!(store.entries(&scope).len(), 1);
    }

    #[tokio::test]
    async fn scopes_do_not_share_positions() {
        let store = MemoryPositionStore::new();
        store
            .record(&entry(FetchScope::commits("a"), 5, 0))
            .await
            .expect("record");

        let b = store
            .position(&FetchScope::commits("b"))
            .await
            .expect("position");
        assert!(b.is_unseen());
    }
}
