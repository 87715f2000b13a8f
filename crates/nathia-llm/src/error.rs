//! Typed provider errors.
//!
//! `Display` strings are for logs only. Nothing here is ever returned to an
//! end user verbatim; the API layer maps every variant to a generic message.

use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum LlmError {
    /// Missing or rejected API key.
    #[error("authentication failed: {0}")]
    Authentication(String),

    #[error("rate limited by provider (retry after {retry_after:?}s)")]
    RateLimited { retry_after: Option<u64> },

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// The provider's own safety filter refused the prompt.
    #[error("content filtered: {0}")]
    ContentFiltered(String),

    /// Model name has no entry in the alias table.
    #[error("unknown model: {0}")]
    UnknownModel(String),

    #[error("network error: {0}")]
    Network(String),

    #[error("request timed out")]
    Timeout,

    #[error("provider unavailable (status {status})")]
    ServiceUnavailable { status: u16 },

    #[error("invalid response: {0}")]
    InvalidResponse(String),

    #[error("configuration error: {0}")]
    Configuration(String),
}

impl LlmError {
    /// Transient failures worth another attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            LlmError::RateLimited { .. }
                | LlmError::Network(_)
                | LlmError::Timeout
                | LlmError::ServiceUnavailable { .. }
        )
    }

    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            LlmError::RateLimited { retry_after } => retry_after.map(Duration::from_secs),
            _ => None,
        }
    }

    /// Classify a non-success HTTP status.
    pub fn from_status(status: u16, retry_after: Option<u64>, detail: &str) -> Self {
        match status {
            400 => LlmError::InvalidRequest(detail.to_string()),
            401 | 403 => LlmError::Authentication(format!("status {}", status)),
            404 => LlmError::InvalidRequest(format!("model or endpoint not found: {}", detail)),
            408 => LlmError::Timeout,
            429 => LlmError::RateLimited { retry_after },
            s if s >= 500 => LlmError::ServiceUnavailable { status: s },
            s => LlmError::InvalidResponse(format!("unexpected status {}", s)),
        }
    }
}

impl From<reqwest::Error> for LlmError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            LlmError::Timeout
        } else if err.is_decode() {
            LlmError::InvalidResponse(err.to_string())
        } else {
            // Strip the URL: Gemini carries the API key in the query string.
            LlmError::Network(err.without_url().to_string())
        }
    }
}

impl From<serde_json::Error> for LlmError {
    fn from(err: serde_json::Error) -> Self {
        LlmError::InvalidResponse(format!("JSON parse error: {}", err))
    }
}
