//! Bounded exponential-backoff retry.
//!
//! Used once at startup to reach the database and the broker, and by the
//! ingest side for transient write failures. The walk loop itself never
//! retries: a failed walk is retried by the next scheduler tick.

use std::fmt::Display;
use std::future::Future;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use backon::{ExponentialBuilder, Retryable};
use sea_orm::DbErr;

/// Default first delay for bootstrap retries.
pub const BOOTSTRAP_MIN_DELAY: Duration = Duration::from_secs(1);
/// Default delay cap for bootstrap retries.
pub const BOOTSTRAP_MAX_DELAY: Duration = Duration::from_secs(30);
/// Default retry budget for bootstrap.
pub const BOOTSTRAP_MAX_RETRIES: usize = 5;

/// Configuration for retry operations.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Minimum delay between retries.
    pub min_delay: Duration,
    /// Maximum delay between retries.
    pub max_delay: Duration,
    /// Maximum number of retry attempts.
    pub max_retries: usize,
    /// Whether to add jitter to delays.
    pub with_jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            min_delay: BOOTSTRAP_MIN_DELAY,
            max_delay: BOOTSTRAP_MAX_DELAY,
            max_retries: BOOTSTRAP_MAX_RETRIES,
            with_jitter: true,
        }
    }
}

impl RetryConfig {
    /// Create a new retry configuration with custom values.
    #[must_use]
    pub fn new(min_delay: Duration, max_delay: Duration, max_retries: usize) -> Self {
        Self {
            min_delay,
            max_delay,
            max_retries,
            with_jitter: true,
        }
    }

    /// Short retries for database writes on the ingest side.
    #[must_use]
    pub fn database_write() -> Self {
        Self::new(Duration::from_millis(100), Duration::from_secs(2), 3)
    }

    /// Set whether to use jitter.
    #[must_use]
    pub fn with_jitter(mut self, jitter: bool) -> Self {
        self.with_jitter = jitter;
        self
    }

    /// Build an exponential backoff strategy from this configuration.
    #[must_use]
    pub fn into_backoff(self) -> ExponentialBuilder {
        let mut builder = ExponentialBuilder::default()
            .with_min_delay(self.min_delay)
            .with_max_delay(self.max_delay)
            .with_max_times(self.max_retries);

        if self.with_jitter {
            builder = builder.with_jitter();
        }

        builder
    }
}

/// Run `operation`, retrying errors accepted by `is_retryable`.
///
/// Each retry is logged at warn level with its attempt number. The attempt
/// counter lives in this call only.
pub async fn with_retry<T, E, F, Fut, IsRetryable>(
    label: &str,
    config: RetryConfig,
    mut operation: F,
    is_retryable: IsRetryable,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Display,
    IsRetryable: FnMut(&E) -> bool,
{
    let attempt = AtomicU32::new(0);

    let retry_op = || {
        attempt.fetch_add(1, Ordering::SeqCst);
        operation()
    };

    retry_op
        .retry(config.into_backoff())
        .notify(|err, dur| {
            tracing::warn!(
                operation = label,
                attempt = attempt.load(Ordering::SeqCst),
                retry_in = ?dur,
                error = %err,
                "Retrying"
            );
        })
        .when(is_retryable)
        .await
}

/// Connect to an infrastructure dependency with a bounded retry budget.
///
/// Every error is retried until the budget runs out; the last error is
/// returned and is meant to be fatal for the process.
pub async fn bootstrap<T, E, F, Fut>(label: &str, config: RetryConfig, connect: F) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Display,
{
    let result = with_retry(label, config, connect, |_| true).await;
    match &result {
        Ok(_) => tracing::info!(operation = label, "Connected"),
        Err(e) => tracing::error!(operation = label, error = %e, "Giving up after retry budget"),
    }
    result
}

/// Whether a database error is worth retrying.
///
/// Connection problems and lock contention are transient; constraint and
/// decoding errors are not.
#[must_use]
pub fn is_transient_db_error(err: &DbErr) -> bool {
    match err {
        DbErr::ConnectionAcquire(_) | DbErr::Conn(_) => true,
        DbErr::Exec(_) | DbErr::Query(_) => {
            let err_str = err.to_string().to_lowercase();
            // SQLite: database is locked, busy
            // PostgreSQL: connection refused, too many connections
            err_str.contains("locked")
                || err_str.contains("busy")
                || err_str.contains("timeout")
                || err_str.contains("connection")
                || err_str.contains("temporarily unavailable")
        }
        _ => false,
    }
}
