//! Source client error types.

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::http::HttpError;

/// Errors that can occur when fetching from an upstream source.
#[derive(Debug, Error)]
pub enum SourceError {
    /// Transport failure (connection, timeout, TLS).
    #[error("HTTP error: {0}")]
    Http(#[from] HttpError),

    /// Response body could not be decoded.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Upstream returned a non-success status.
    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },

    /// Rate limit exhausted.
    #[error("Rate limit exceeded. Resets at {reset_at}")]
    RateLimited { reset_at: DateTime<Utc> },

    /// Token missing, invalid or lacking scope.
    #[error("Authentication failed: {0}")]
    Auth(String),

    /// Requested resource does not exist.
    #[error("Not found: {0}")]
    NotFound(String),

    /// The request could not be built.
    #[error("Invalid request: {0}")]
    InvalidRequest(String),
}

impl SourceError {
    /// Check if this error is a rate limit error.
    #[inline]
    pub fn is_rate_limited(&self) -> bool {
        matches!(self, Self::RateLimited { .. })
    }
}

/// Extract a short error message suitable for log lines.
///
/// Takes the first line of an error message; upstream error bodies are
/// sometimes multi-line JSON.
#[inline]
pub fn short_error_message(e: &impl std::error::Error) -> String {
    let full = e.to_string();
    full.lines().next().unwrap_or(&full).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rate_limited_is_detected() {
        let err = SourceError::RateLimited {
            reset_at: Utc::now(),
        };
        assert!(err.is_rate_limited());
        assert!(!SourceError::NotFound("x".to_string()).is_rate_limited());
    }

    #[test]
    fn api_error_display_includes_status() {
        let err = SourceError::Api {
            status: 502,
            message: "bad gateway".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("502"));
        assert!(msg.contains("bad gateway"));
    }

    #[test]
    fn short_error_message_takes_first_line() {
        let err = SourceError::Api {
            status: 500,
            message: "line one\nline two".to_string(),
        };
        assert_eq!(short_error_message(&err), "API error (500): line one");
    }
}
