//! Error kinds shared across the HTTP clients, and the retry classifier
//! that decides which of them are worth waiting out.

use std::time::Duration;
use thiserror::Error;

/// The four client error kinds.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("API error: status={status} body={body}")]
    ApiError { status: u16, body: String },

    #[error("validation error: {issues:?}")]
    ValidationError { issues: Vec<String> },

    #[error("network error (timeout={is_timeout})")]
    NetworkError { is_timeout: bool },

    #[error("rate limited, retry after {retry_after:?}")]
    RateLimitError {
        retry_after: Option<Duration>,
        reset_at: Option<chrono::DateTime<chrono::Utc>>,
    },
}

impl ClientError {
    /// Retryability table:
    /// RATE_LIMIT_ERROR -> yes with wait; NETWORK_ERROR -> yes;
    /// API_ERROR -> yes iff status in 5xx ∪ {408, 429}; VALIDATION_ERROR -> no.
    pub fn is_retryable(&self) -> bool {
        match self {
            ClientError::RateLimitError { .. } => true,
            ClientError::NetworkError { .. } => true,
            ClientError::ApiError { status, .. } => {
                (500..600).contains(status) || *status == 408 || *status == 429
            }
            ClientError::ValidationError { .. } => false,
        }
    }

    /// Suggested wait before retrying, if any is implied by the error itself.
    pub fn retry_delay(&self) -> Option<Duration> {
        match self {
            ClientError::RateLimitError { retry_after, .. } => *retry_after,
            _ => None,
        }
    }

    /// Classify a raw reqwest error into a `ClientError`.
    pub fn from_reqwest(err: &reqwest::Error) -> Self {
        ClientError::NetworkError {
            is_timeout: err.is_timeout(),
        }
    }
}

/// Errors surfaced by a sync manager tick.
#[derive(Debug, Error)]
pub enum ManagerError {
    #[error("database error: {0}")]
    Db(#[from] crate::db::DbError),

    #[error("client error: {0}")]
    Client(#[from] ClientError),

    #[error("lock already held for entity {0}")]
    LockHeld(String),

    #[error("websocket error: {0}")]
    WebSocket(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn api_error_retryable_for_5xx_and_408_429() {
        assert!(ClientError::ApiError { status: 500, body: String::new() }.is_retryable());
        assert!(ClientError::ApiError { status: 503, body: String::new() }.is_retryable());
        assert!(ClientError::ApiError { status: 408, body: String::new() }.is_retryable());
        assert!(ClientError::ApiError { status: 429, body: String::new() }.is_retryable());
    }

    #[test]
    fn api_error_not_retryable_for_4xx_other_than_408_429() {
        assert!(!ClientError::ApiError { status: 400, body: String::new() }.is_retryable());
        assert!(!ClientError::ApiError { status: 404, body: String::new() }.is_retryable());
    }

    #[test]
    fn validation_error_never_retryable() {
        assert!(!ClientError::ValidationError { issues: vec!["bad".into()] }.is_retryable());
    }

    #[test]
    fn network_and_rate_limit_always_retryable() {
        assert!(ClientError::NetworkError { is_timeout: true }.is_retryable());
        assert!(ClientError::NetworkError { is_timeout: false }.is_retryable());
        assert!(ClientError::RateLimitError { retry_after: None, reset_at: None }.is_retryable());
    }
}
