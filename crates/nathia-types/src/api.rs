use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::{MotherType, ReplySource, SubscriptionTier};
use crate::risk::{ModerationAction, Resource, RiskFlag};

// -- JWT Claims --

/// Bearer token claims. Tokens are minted by the identity provider with the
/// shared HS256 secret; this service only verifies them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: Uuid,
    pub exp: usize,
}

// -- Chat --

pub const MAX_MESSAGE_CHARS: usize = 2000;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ChatRequest {
    pub message: String,
    pub user_id: Uuid,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RateLimitInfo {
    pub remaining: u32,
    pub reset_at: DateTime<Utc>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatResponse {
    pub response: String,
    pub rate_limit: RateLimitInfo,
    pub requires_intervention: bool,
    pub resources: Vec<Resource>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RateLimitedBody {
    pub error: String,
    pub message: String,
    pub remaining: u32,
    pub reset_at: DateTime<Utc>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
    pub message: String,
}

// -- History --

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryEntry {
    pub id: Uuid,
    pub message: String,
    pub response: String,
    pub risk_level: u8,
    pub risk_flags: Vec<RiskFlag>,
    pub requires_intervention: bool,
    pub moderation: ModerationAction,
    pub reply_source: ReplySource,
    pub created_at: DateTime<Utc>,
}

// -- Profile --

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct UpdateProfileRequest {
    pub display_name: Option<String>,
    pub mother_type: Option<MotherType>,
    pub pregnancy_week: Option<u8>,
    pub baby_name: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfileResponse {
    pub user_id: Uuid,
    pub display_name: Option<String>,
    pub mother_type: Option<MotherType>,
    pub pregnancy_week: Option<u8>,
    pub baby_name: Option<String>,
    pub subscription_tier: SubscriptionTier,
    pub risk_level: u8,
    pub updated_at: DateTime<Utc>,
}
