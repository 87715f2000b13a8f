//! HTTP error mapping.
//!
//! Internal and upstream failures are logged with detail; clients only ever
//! see a generic message for them.

use axum::Json;
use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::http::{HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use chrono::{DateTime, Utc};
use thiserror::Error;
use tracing::error;

use nathia_llm::LlmError;
use nathia_types::api::{ErrorBody, RateLimitedBody};

pub const RATE_LIMIT_REMAINING_HEADER: &str = "x-ratelimit-remaining";
pub const RATE_LIMIT_RESET_HEADER: &str = "x-ratelimit-reset";

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("missing or invalid bearer token")]
    Unauthorized,

    #[error("forbidden: {0}")]
    Forbidden(String),

    #[error("rate limit exceeded")]
    RateLimited { remaining: u32, reset_at: DateTime<Utc> },

    #[error("upstream provider failed: {0}")]
    Upstream(#[from] LlmError),

    #[error("internal error: {0}")]
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code, message) = match &self {
            ApiError::Validation(m) => (StatusCode::BAD_REQUEST, "validation_error", m.clone()),
            ApiError::Unauthorized => (
                StatusCode::UNAUTHORIZED,
                "unauthorized",
                "Missing or invalid bearer token".to_owned(),
            ),
            ApiError::Forbidden(m) => (StatusCode::FORBIDDEN, "forbidden", m.clone()),
            ApiError::RateLimited { remaining, reset_at } => {
                return rate_limited_response(*remaining, *reset_at);
            }
            ApiError::Upstream(e) => {
                error!(error = %e, "upstream provider error");
                (
                    StatusCode::BAD_GATEWAY,
                    "upstream_error",
                    "Não consegui responder agora. Tente novamente em alguns instantes.".to_owned(),
                )
            }
            ApiError::Internal(m) => {
                error!(message = %m, "internal server error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal_error",
                    "internal server error".to_owned(),
                )
            }
        };

        let body = ErrorBody { error: code.to_owned(), message };
        (status, Json(body)).into_response()
    }
}

fn rate_limited_response(remaining: u32, reset_at: DateTime<Utc>) -> Response {
    let body = RateLimitedBody {
        error: "rate_limited".to_owned(),
        message: "Você atingiu o limite de mensagens. Tente novamente mais tarde.".to_owned(),
        remaining,
        reset_at,
    };
    let mut response = (StatusCode::TOO_MANY_REQUESTS, Json(body)).into_response();
    insert_rate_limit_headers(&mut response, remaining, reset_at);
    response
}

pub fn insert_rate_limit_headers(response: &mut Response, remaining: u32, reset_at: DateTime<Utc>) {
    let headers = response.headers_mut();
    headers.insert(RATE_LIMIT_REMAINING_HEADER, HeaderValue::from(remaining));
    if let Ok(value) = HeaderValue::from_str(&reset_at.to_rfc3339()) {
        headers.insert(RATE_LIMIT_RESET_HEADER, value);
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::Validation(rejection.body_text())
    }
}

impl From<QueryRejection> for ApiError {
    fn from(rejection: QueryRejection) -> Self {
        ApiError::Validation(rejection.body_text())
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(e: anyhow::Error) -> Self {
        error!(error = ?e, "converting anyhow error to ApiError::Internal");
        ApiError::Internal(e.to_string())
    }
}

impl From<tokio::task::JoinError> for ApiError {
    fn from(e: tokio::task::JoinError) -> Self {
        ApiError::Internal(format!("task join error: {}", e))
    }
}
