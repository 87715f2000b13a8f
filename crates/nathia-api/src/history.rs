use axum::{
    Extension, Json,
    extract::{Query, State, rejection::QueryRejection},
};
use serde::Deserialize;

use nathia_types::api::{Claims, HistoryEntry};
use nathia_types::models::ChatMessage;

use crate::error::ApiError;
use crate::state::AppState;

const MAX_HISTORY_LIMIT: u32 = 100;

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    #[serde(default = "default_limit")]
    pub limit: u32,
}

fn default_limit() -> u32 {
    50
}

fn to_entry(msg: ChatMessage) -> HistoryEntry {
    HistoryEntry {
        id: msg.id,
        message: msg.message,
        response: msg.response,
        risk_level: msg.risk_level,
        risk_flags: msg.risk_flags.into_iter().collect(),
        requires_intervention: msg.requires_intervention,
        moderation: msg.moderation,
        reply_source: msg.reply_source,
        created_at: msg.created_at,
    }
}

/// `GET /chat/history`: the caller's own turns, oldest first.
pub async fn get_history(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    query: Result<Query<HistoryQuery>, QueryRejection>,
) -> Result<Json<Vec<HistoryEntry>>, ApiError> {
    let Query(query) = query?;
    let limit = query.limit.clamp(1, MAX_HISTORY_LIMIT);

    let scope = state.db.scoped(claims.sub);
    let messages = tokio::task::spawn_blocking(move || scope.recent_messages(limit)).await??;

    Ok(Json(messages.into_iter().map(to_entry).collect()))
}
