//! Error taxonomy for the synchronization engine
//!
//! Page and record level failures are always recovered locally (skipped and
//! counted in the run summary); only discovery failure, budget exhaustion
//! and external cancellation surface as run-level non-success statuses.

use std::time::Duration;

use thiserror::Error;

/// Typed failure of a single page fetch
#[derive(Error, Debug, Clone)]
pub enum FetchError {
    #[error("request to {url} timed out")]
    Timeout { url: String },

    #[error("HTTP {status} from {url}")]
    Status { status: u16, url: String },

    #[error("rate limited by {url} (retry-after: {retry_after:?})")]
    RateLimited {
        url: String,
        retry_after: Option<Duration>,
    },

    #[error("network error for {url}: {message}")]
    Network { url: String, message: String },

    #[error("fetch cancelled")]
    Cancelled,
}

impl FetchError {
    /// Transient errors are retried with backoff; permanent ones are
    /// recorded and the page is skipped for this run.
    pub fn is_transient(&self) -> bool {
        match self {
            FetchError::Timeout { .. } => true,
            FetchError::RateLimited { .. } => true,
            FetchError::Network { .. } => true,
            FetchError::Status { status, .. } => *status >= 500,
            FetchError::Cancelled => false,
        }
    }

    /// Server-advertised cooldown, if any
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            FetchError::RateLimited { retry_after, .. } => *retry_after,
            _ => None,
        }
    }
}

/// Run-fatal conditions of the orchestrator
#[derive(Error, Debug)]
pub enum SyncError {
    #[error("pagination discovery failed: {reason}")]
    DiscoveryFailed { reason: String },

    #[error("run budget of {budget_seconds}s exceeded")]
    BudgetExceeded { budget_seconds: u64 },

    #[error("run cancelled by shutdown signal")]
    Cancelled,

    #[error("another sync run is already active")]
    AlreadyRunning,

    #[error("store operation failed: {0}")]
    Store(#[from] anyhow::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        let timeout = FetchError::Timeout {
            url: "https://example.com".into(),
        };
        assert!(timeout.is_transient());

        let server_error = FetchError::Status {
            status: 503,
            url: "https://example.com".into(),
        };
        assert!(server_error.is_transient());

        let not_found = FetchError::Status {
            status: 404,
            url: "https://example.com".into(),
        };
        assert!(!not_found.is_transient());

        let rate_limited = FetchError::RateLimited {
            url: "https://example.com".into(),
            retry_after: Some(Duration::from_secs(5)),
        };
        assert!(rate_limited.is_transient());
        assert_eq!(rate_limited.retry_after(), Some(Duration::from_secs(5)));
    }
}
