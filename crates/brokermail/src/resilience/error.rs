//! Failure taxonomy for calls to external dependencies.

use std::time::Duration;

use thiserror::Error;

/// Why a call to an external dependency did not produce a value.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DependencyError {
    /// Connection refused, reset, DNS failure and similar.
    #[error("Network error: {0}")]
    Network(String),

    #[error("Request timed out: {0}")]
    Timeout(String),

    /// The dependency answered with a non-success HTTP status.
    #[error("HTTP {status}: {message}")]
    Http { status: u16, message: String },

    /// The dependency answered, but the payload could not be understood.
    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    /// Authentication or validation rejection. Never retried.
    #[error("Request rejected: {0}")]
    Rejected(String),

    /// The circuit breaker is open; the call was not attempted.
    #[error("{dependency} is unavailable, not attempted (retry in {retry_after:?})")]
    Unavailable {
        dependency: String,
        retry_after: Duration,
    },

    /// The caller gave up while waiting between attempts.
    #[error("Call to {dependency} aborted after {attempts} attempt(s)")]
    Aborted { dependency: String, attempts: u32 },

    #[error("Request queue for {0} is closed")]
    QueueClosed(String),
}

impl DependencyError {
    /// Default retry condition: network failures, timeouts, HTTP 5xx, 408 and 429.
    pub fn is_retryable(&self) -> bool {
        match self {
            DependencyError::Network(_) | DependencyError::Timeout(_) => true,
            DependencyError::Http { status, .. } => {
                *status >= 500 || *status == 408 || *status == 429
            }
            _ => false,
        }
    }

    /// True for the circuit-open outcome.
    pub fn is_unavailable(&self) -> bool {
        matches!(self, DependencyError::Unavailable { .. })
    }

    pub fn is_aborted(&self) -> bool {
        matches!(self, DependencyError::Aborted { .. })
    }

    pub fn http(status: u16, message: impl Into<String>) -> Self {
        DependencyError::Http {
            status,
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        assert!(DependencyError::Network("reset".into()).is_retryable());
        assert!(DependencyError::Timeout("30s".into()).is_retryable());
        assert!(DependencyError::http(500, "").is_retryable());
        assert!(DependencyError::http(503, "").is_retryable());
        assert!(DependencyError::http(408, "").is_retryable());
        assert!(DependencyError::http(429, "").is_retryable());

        assert!(!DependencyError::http(400, "").is_retryable());
        assert!(!DependencyError::http(401, "").is_retryable());
        assert!(!DependencyError::http(404, "").is_retryable());
        assert!(!DependencyError::Rejected("bad key".into()).is_retryable());
        assert!(!DependencyError::InvalidResponse("not json".into()).is_retryable());
    }

    #[test]
    fn test_unavailable_is_not_retried() {
        let err = DependencyError::Unavailable {
            dependency: "classifier".into(),
            retry_after: Duration::from_secs(5),
        };
        assert!(err.is_unavailable());
        assert!(!err.is_retryable());
        assert!(!err.is_aborted());
    }
}
