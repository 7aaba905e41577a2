//! Scheduler and per-tick fan-out.
//!
//! Every tick asks a [`ScopeProvider`] for the current scope set and spawns
//! one walk per scope, then waits for all of them. Ticks are themselves
//! spawned, so a tick that outlasts the interval does not delay the next one;
//! a scope still being walked by an earlier tick is skipped instead of walked
//! twice.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{MissedTickBehavior, interval};

use crate::catalog::{CatalogError, RepositoryCatalog};
use crate::position::FetchPositionStore;
use crate::publish::EventPublisher;
use crate::source::{FetchScope, PagedSource};

use super::progress::{ProgressCallback, SyncProgress, emit};
use super::types::{ScheduleConfig, TickReport};
use super::walker::PaginationWalker;

/// Supplies the scopes to walk on each tick.
#[async_trait]
pub trait ScopeProvider: Send + Sync {
    async fn scopes(&self) -> Result<Vec<FetchScope>, CatalogError>;
}

/// A fixed scope list.
#[derive(Debug, Clone)]
pub struct StaticScopes(pub Vec<FetchScope>);

impl StaticScopes {
    /// Just the global repository listing.
    pub fn repositories() -> Self {
        Self(vec![FetchScope::Repositories])
    }
}

#[async_trait]
impl ScopeProvider for StaticScopes {
    async fn scopes(&self) -> Result<Vec<FetchScope>, CatalogError> {
        Ok(self.0.clone())
    }
}

/// One commit scope per repository known to the read model.
pub struct CatalogScopes<C: ?Sized> {
    catalog: Arc<C>,
}

impl<C: ?Sized> CatalogScopes<C> {
    pub fn new(catalog: Arc<C>) -> Self {
        Self { catalog }
    }
}

#[async_trait]
impl<C: RepositoryCatalog + ?Sized> ScopeProvider for CatalogScopes<C> {
    async fn scopes(&self) -> Result<Vec<FetchScope>, CatalogError> {
        let names = self.catalog.repository_names().await?;
        Ok(names.into_iter().map(FetchScope::commits).collect())
    }
}

/// Releases a scope's in-flight slot when its walk task ends, panics included.
struct InFlightGuard {
    in_flight: Arc<Mutex<HashSet<FetchScope>>>,
    scope: FetchScope,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.in_flight
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&self.scope);
    }
}

/// Drives a walker over a provider's scopes on a fixed interval.
pub struct Scheduler<S: ?Sized, P: ?Sized, B: ?Sized, Q: ?Sized> {
    label: String,
    walker: PaginationWalker<S, P, B>,
    provider: Arc<Q>,
    config: ScheduleConfig,
    in_flight: Arc<Mutex<HashSet<FetchScope>>>,
    on_progress: Option<Arc<ProgressCallback>>,
}

impl<S: ?Sized, P: ?Sized, B: ?Sized, Q: ?Sized> Clone for Scheduler<S, P, B, Q> {
    fn clone(&self) -> Self {
        Self {
            label: self.label.clone(),
            walker: self.walker.clone(),
            provider: Arc::clone(&self.provider),
            config: self.config,
            in_flight: Arc::clone(&self.in_flight),
            on_progress: self.on_progress.clone(),
        }
    }
}

impl<S, P, B, Q> Scheduler<S, P, B, Q>
where
    S: PagedSource + ?Sized + 'static,
    P: FetchPositionStore + ?Sized + 'static,
    B: EventPublisher + ?Sized + 'static,
    Q: ScopeProvider + ?Sized + 'static,
{
    pub fn new(
        label: impl Into<String>,
        walker: PaginationWalker<S, P, B>,
        provider: Arc<Q>,
        config: ScheduleConfig,
    ) -> Self {
        Self {
            label: label.into(),
            walker,
            provider,
            config,
            in_flight: Arc::new(Mutex::new(HashSet::new())),
            on_progress: None,
        }
    }

    #[must_use]
    pub fn with_progress(mut self, on_progress: Arc<ProgressCallback>) -> Self {
        self.on_progress = Some(on_progress);
        self
    }

    #[must_use]
    pub fn label(&self) -> &str {
        &self.label
    }

    /// Claim `scope` for a walk, or `None` if it is already being walked.
    fn claim(&self, scope: &FetchScope) -> Option<InFlightGuard> {
        let mut in_flight = self.in_flight.lock().unwrap_or_else(|e| e.into_inner());
        if !in_flight.insert(scope.clone()) {
            return None;
        }
        Some(InFlightGuard {
            in_flight: Arc::clone(&self.in_flight),
            scope: scope.clone(),
        })
    }

    /// Run one tick: fan out a walk per scope and join them all.
    ///
    /// Per-scope failures are logged and counted, never propagated. Only a
    /// failure to list scopes is returned.
    #[tracing::instrument(skip_all, fields(scheduler = %self.label))]
    pub async fn run_tick(&self) -> Result<TickReport, CatalogError> {
        let scopes = self.provider.scopes().await?;

        emit(
            self.on_progress.as_deref(),
            SyncProgress::TickStarted {
                label: self.label.clone(),
                scopes: scopes.len(),
            },
        );

        let mut report = TickReport::default();
        let mut handles = Vec::with_capacity(scopes.len());
        for scope in scopes {
            let Some(guard) = self.claim(&scope) else {
                tracing::debug!(scope = %scope, "Walk still running from an earlier tick, skipping");
                report.skipped += 1;
                continue;
            };

            let walker = self.walker.clone();
            let task_scope = scope.clone();
            let handle = tokio::spawn(async move {
                let _guard = guard;
                walker.walk(&task_scope).await
            });
            handles.push((scope, handle));
        }

        for (scope, handle) in handles {
            match handle.await {
                Ok(Ok(summary)) => {
                    report.succeeded += 1;
                    report.items_total += summary.items_total;
                }
                Ok(Err(e)) => {
                    tracing::warn!(scope = %scope, error = %e, "Walk failed");
                    report.failed += 1;
                    report.errors.push((scope.to_string(), e.to_string()));
                }
                Err(e) => {
                    tracing::warn!(scope = %scope, error = %e, "Walk task panicked");
                    report.panicked += 1;
                    report
                        .errors
                        .push((scope.to_string(), format!("Task panic: {}", e)));
                }
            }
        }

        tracing::info!(
            succeeded = report.succeeded,
            failed = report.failed,
            panicked = report.panicked,
            skipped = report.skipped,
            items_total = report.items_total,
            "Tick complete"
        );
        emit(
            self.on_progress.as_deref(),
            SyncProgress::TickComplete {
                label: self.label.clone(),
                succeeded: report.succeeded,
                failed: report.failed,
                panicked: report.panicked,
            },
        );

        Ok(report)
    }

    async fn tick_and_log(&self) {
        if let Err(e) = self.run_tick().await {
            tracing::warn!(scheduler = %self.label, error = %e, "Could not list scopes, skipping tick");
            emit(
                self.on_progress.as_deref(),
                SyncProgress::Warning {
                    message: format!("{} tick skipped: {}", self.label, e),
                },
            );
        }
    }

    /// Tick until `shutdown` becomes `true`, then wait for in-flight ticks.
    ///
    /// The first tick fires after `initial_delay`; later ticks follow the
    /// interval, delayed rather than bunched if the runtime falls behind.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        if *shutdown.borrow() {
            return;
        }

        if !self.config.initial_delay.is_zero() {
            tracing::debug!(
                scheduler = %self.label,
                delay = ?self.config.initial_delay,
                "Waiting before first tick"
            );
            tokio::select! {
                _ = tokio::time::sleep(self.config.initial_delay) => {}
                _ = wait_for_shutdown(&mut shutdown) => return,
            }
        }

        let mut ticker = interval(self.config.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let mut ticks: Vec<JoinHandle<()>> = Vec::new();
        loop {
            tokio::select! {
                biased;

                _ = wait_for_shutdown(&mut shutdown) => break,

                _ = ticker.tick() => {
                    ticks.retain(|handle| !handle.is_finished());
                    let scheduler = self.clone();
                    ticks.push(tokio::spawn(async move {
                        scheduler.tick_and_log().await;
                    }));
                }
            }
        }

        tracing::info!(
            scheduler = %self.label,
            in_flight = ticks.len(),
            "Shutting down, waiting for in-flight ticks"
        );
        for handle in ticks {
            if let Err(e) = handle.await {
                tracing::warn!(scheduler = %self.label, error = %e, "Tick task failed");
            }
        }
    }
}

/// Resolve once the shutdown flag is set or its sender is gone.
async fn wait_for_shutdown(shutdown: &mut watch::Receiver<bool>) {
    // `wait_for` errors only when the sender was dropped, which also means stop.
    let _ = shutdown.wait_for(|stop| *stop).await;
}
