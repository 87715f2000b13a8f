use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::risk::{INTERVENTION_THRESHOLD, ModerationAction, RiskAnalysis, RiskFlag, UnknownTag};

/// Which path produced the reply delivered to the user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReplySource {
    Generated,
    Refusal,
    Crisis,
}

impl ReplySource {
    pub fn as_str(self) -> &'static str {
        match self {
            ReplySource::Generated => "generated",
            ReplySource::Refusal => "refusal",
            ReplySource::Crisis => "crisis",
        }
    }
}

impl FromStr for ReplySource {
    type Err = UnknownTag;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "generated" => Ok(ReplySource::Generated),
            "refusal" => Ok(ReplySource::Refusal),
            "crisis" => Ok(ReplySource::Crisis),
            other => Err(UnknownTag(other.to_string())),
        }
    }
}

/// One chat turn: the user's message, the reply and the risk signal that
/// accompanied it. Written once per turn and never updated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub id: Uuid,
    pub user_id: Uuid,
    pub message: String,
    pub response: String,
    pub risk_level: u8,
    pub risk_flags: BTreeSet<RiskFlag>,
    pub requires_intervention: bool,
    pub moderation: ModerationAction,
    pub reply_source: ReplySource,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum InvariantViolation {
    #[error("risk level {0} is out of range")]
    LevelOutOfRange(u8),
    #[error("message {0} carries crisis signals but requires_intervention is false")]
    InterventionSuppressed(Uuid),
}

impl ChatMessage {
    /// Build the row for a finished turn. The intervention bit is copied from
    /// the analysis, which already enforces the threshold/crisis rule.
    pub fn record(
        user_id: Uuid,
        message: &str,
        response: &str,
        analysis: &RiskAnalysis,
        moderation: ModerationAction,
        reply_source: ReplySource,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id,
            message: message.to_string(),
            response: response.to_string(),
            risk_level: analysis.level(),
            risk_flags: analysis.flags().clone(),
            requires_intervention: analysis.requires_intervention(),
            moderation,
            reply_source,
            created_at,
        }
    }

    /// Re-check the intervention invariant on a row that came back from
    /// storage.
    pub fn check_invariants(&self) -> Result<(), InvariantViolation> {
        if self.risk_level > crate::risk::MAX_RISK_LEVEL {
            return Err(InvariantViolation::LevelOutOfRange(self.risk_level));
        }
        if RiskAnalysis::intervention_required(self.risk_level, &self.risk_flags) && !self.requires_intervention {
            return Err(InvariantViolation::InterventionSuppressed(self.id));
        }
        Ok(())
    }
}

// -- Profiles --

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MotherType {
    Gestante,
    Mae,
    Tentante,
}

impl MotherType {
    pub fn as_str(self) -> &'static str {
        match self {
            MotherType::Gestante => "gestante",
            MotherType::Mae => "mae",
            MotherType::Tentante => "tentante",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            MotherType::Gestante => "Gestante",
            MotherType::Mae => "Mãe",
            MotherType::Tentante => "Tentante",
        }
    }
}

impl FromStr for MotherType {
    type Err = UnknownTag;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "gestante" => Ok(MotherType::Gestante),
            "mae" => Ok(MotherType::Mae),
            "tentante" => Ok(MotherType::Tentante),
            other => Err(UnknownTag(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionTier {
    #[default]
    Free,
    Premium,
}

impl SubscriptionTier {
    pub fn as_str(self) -> &'static str {
        match self {
            SubscriptionTier::Free => "free",
            SubscriptionTier::Premium => "premium",
        }
    }

    /// Turns allowed per UTC day. `None` means unlimited.
    pub fn daily_quota(self, free_quota: u32) -> Option<u32> {
        match self {
            SubscriptionTier::Free => Some(free_quota),
            SubscriptionTier::Premium => None,
        }
    }
}

impl fmt::Display for SubscriptionTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SubscriptionTier {
    type Err = UnknownTag;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "free" => Ok(SubscriptionTier::Free),
            "premium" => Ok(SubscriptionTier::Premium),
            other => Err(UnknownTag(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserProfile {
    pub user_id: Uuid,
    pub display_name: Option<String>,
    pub mother_type: Option<MotherType>,
    pub pregnancy_week: Option<u8>,
    pub baby_name: Option<String>,
    pub subscription_tier: SubscriptionTier,
    /// Rolling indicator, see [`UserProfile::rolled_risk`].
    pub risk_level: u8,
    pub updated_at: DateTime<Utc>,
}

impl UserProfile {
    pub fn new(user_id: Uuid) -> Self {
        Self {
            user_id,
            display_name: None,
            mother_type: None,
            pregnancy_week: None,
            baby_name: None,
            subscription_tier: SubscriptionTier::Free,
            risk_level: 0,
            updated_at: Utc::now(),
        }
    }

    /// Fold a new turn's level into the rolling indicator. Weighted toward
    /// history, except that a turn at or above the intervention threshold
    /// lifts the indicator to at least that level immediately.
    pub fn rolled_risk(previous: u8, level: u8) -> u8 {
        let blended = ((2 * previous as u32 + level as u32) as f64 / 3.0).round() as u8;
        if level >= INTERVENTION_THRESHOLD {
            blended.max(level)
        } else {
            blended
        }
    }
}
