//! Test doubles for walker and scheduler tests.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use crate::publish::{Delivery, EventPublisher, FetchEnvelope, PublishError};
use crate::source::{FetchScope, Page, PageCursor, PagedSource, RawRecord, SourceError};

#[derive(Default)]
struct ScriptedInner {
    pages: HashMap<FetchScope, VecDeque<Result<Page, SourceError>>>,
    repositories: HashMap<String, RawRecord>,
    panics: HashSet<FetchScope>,
    requests: Vec<(FetchScope, u32, PageCursor)>,
}

/// Source that replays queued pages per scope, then reports exhaustion.
#[derive(Clone, Default)]
pub struct ScriptedSource {
    inner: Arc<Mutex<ScriptedInner>>,
}

impl ScriptedSource {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, ScriptedInner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn push_page(&self, scope: &FetchScope, items: Vec<RawRecord>) {
        self.lock()
            .pages
            .entry(scope.clone())
            .or_default()
            .push_back(Ok(Page::from(items)));
    }

    pub fn push_error(&self, scope: &FetchScope, error: SourceError) {
        self.lock()
            .pages
            .entry(scope.clone())
            .or_default()
            .push_back(Err(error));
    }

    pub fn panic_on(&self, scope: &FetchScope) {
        self.lock().panics.insert(scope.clone());
    }

    pub fn set_repository(&self, name: &str, record: RawRecord) {
        self.lock().repositories.insert(name.to_string(), record);
    }

    /// `(page_size, cursor)` for every page request, across all scopes.
    pub fn requests(&self) -> Vec<(u32, PageCursor)> {
        self.lock()
            .requests
            .iter()
            .map(|(_, size, cursor)| (*size, *cursor))
            .collect()
    }

    /// Cursors requested for one scope.
    pub fn requests_for(&self, scope: &FetchScope) -> Vec<PageCursor> {
        self.lock()
            .requests
            .iter()
            .filter(|(s, _, _)| s == scope)
            .map(|(_, _, cursor)| *cursor)
            .collect()
    }
}

#[async_trait]
impl PagedSource for ScriptedSource {
    async fn fetch_page(
        &self,
        scope: &FetchScope,
        cursor: &PageCursor,
        page_size: u32,
    ) -> Result<Page, SourceError> {
        let next = {
            let mut inner = self.lock();
            inner.requests.push((scope.clone(), page_size, *cursor));
            if inner.panics.contains(scope) {
                None
            } else {
                Some(
                    inner
                        .pages
                        .get_mut(scope)
                        .and_then(VecDeque::pop_front)
                        .unwrap_or_else(|| Ok(Page::default())),
                )
            }
        };

        // Let sibling walks interleave.
        tokio::task::yield_now().await;

        match next {
            Some(result) => result,
            None => panic!("scripted panic for {scope}"),
        }
    }

    async fn fetch_repository(&self, name: &str) -> Result<RawRecord, SourceError> {
        self.lock()
            .repositories
            .get(name)
            .cloned()
            .ok_or_else(|| SourceError::NotFound(name.to_string()))
    }
}

/// Source whose every call takes `delay`.
pub struct SlowSource {
    delay: Duration,
}

impl SlowSource {
    pub fn new(delay: Duration) -> Self {
        Self { delay }
    }
}

#[async_trait]
impl PagedSource for SlowSource {
    async fn fetch_page(
        &self,
        _scope: &FetchScope,
        _cursor: &PageCursor,
        _page_size: u32,
    ) -> Result<Page, SourceError> {
        tokio::time::sleep(self.delay).await;
        Ok(Page::default())
    }

    async fn fetch_repository(&self, name: &str) -> Result<RawRecord, SourceError> {
        tokio::time::sleep(self.delay).await;
        Err(SourceError::NotFound(name.to_string()))
    }
}

/// Publisher that keeps every delivery and can start failing.
#[derive(Default)]
pub struct RecordingPublisher {
    deliveries: Mutex<Vec<Delivery>>,
    fail_after: Option<usize>,
}

impl RecordingPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Accept `n` deliveries, then fail every publish.
    pub fn failing_after(n: usize) -> Self {
        Self {
            deliveries: Mutex::new(Vec::new()),
            fail_after: Some(n),
        }
    }

    pub fn deliveries(&self) -> Vec<Delivery> {
        self.deliveries
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn envelopes(&self) -> Vec<FetchEnvelope> {
        self.deliveries()
            .iter()
            .map(|d| FetchEnvelope::decode(&d.payload).expect("recorded payload decodes"))
            .collect()
    }
}

#[async_trait]
impl EventPublisher for RecordingPublisher {
    async fn publish(
        &self,
        topic: &str,
        key: &str,
        payload: Vec<u8>,
    ) -> Result<(), PublishError> {
        let mut deliveries = self.deliveries.lock().unwrap_or_else(|e| e.into_inner());
        if self.fail_after.is_some_and(|n| deliveries.len() >= n) {
            return Err(PublishError::Broker("broker unavailable".to_string()));
        }
        deliveries.push(Delivery {
            topic: topic.to_string(),
            key: key.to_string(),
            payload,
        });
        Ok(())
    }
}
