use axum::{
    Extension, Json,
    extract::{State, rejection::JsonRejection},
    response::{IntoResponse, Response},
};
use chrono::Utc;
use tracing::debug;

use nathia_types::api::{ChatRequest, Claims, MAX_MESSAGE_CHARS};

use crate::error::{ApiError, insert_rate_limit_headers};
use crate::pipeline::TurnOutcome;
use crate::state::AppState;

fn validate_message(message: &str) -> Result<(), ApiError> {
    if message.trim().is_empty() {
        return Err(ApiError::Validation("message must not be empty".into()));
    }
    if message.chars().count() > MAX_MESSAGE_CHARS {
        return Err(ApiError::Validation(format!(
            "message must be at most {} characters",
            MAX_MESSAGE_CHARS
        )));
    }
    Ok(())
}

/// `POST /chat`. Validation happens here, before the rate limiter can record
/// anything. The turn itself runs on its own task so that a client hanging up
/// does not cancel provider calls or the audit write.
pub async fn send_chat(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    payload: Result<Json<ChatRequest>, JsonRejection>,
) -> Result<Response, ApiError> {
    let Json(req) = payload?;
    validate_message(&req.message)?;

    if req.user_id != claims.sub {
        debug!(user_id = %claims.sub, "userId does not match token subject");
        return Err(ApiError::Forbidden("userId does not match the authenticated user".into()));
    }

    let pipeline = state.pipeline.clone();
    let user_id = claims.sub;
    let message = req.message;
    let outcome = tokio::spawn(async move { pipeline.run(user_id, &message, Utc::now()).await }).await?;

    match outcome {
        TurnOutcome::Success(body) | TurnOutcome::Crisis(body) => {
            let (remaining, reset_at) = (body.rate_limit.remaining, body.rate_limit.reset_at);
            let mut response = Json(body).into_response();
            insert_rate_limit_headers(&mut response, remaining, reset_at);
            Ok(response)
        }
        TurnOutcome::RateLimited(decision) => Err(ApiError::RateLimited {
            remaining: decision.remaining,
            reset_at: decision.reset_at,
        }),
        TurnOutcome::UpstreamError(e) => Err(ApiError::Upstream(e)),
    }
}
