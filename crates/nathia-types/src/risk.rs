use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Level at or above which a turn always requires intervention.
pub const INTERVENTION_THRESHOLD: u8 = 7;

/// Level at or above which a persisted turn raises a team alert.
pub const ALERT_THRESHOLD: u8 = 8;

pub const MAX_RISK_LEVEL: u8 = 10;

pub const MAX_REASONING_CHARS: usize = 500;

// -- Flags --

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskFlag {
    SuicidalIdeation,
    HarmToBaby,
    Psychosis,
    SelfHarm,
    SevereDepression,
    Ppd,
    Burnout,
    NormalStress,
}

impl RiskFlag {
    pub const ALL: [RiskFlag; 8] = [
        RiskFlag::SuicidalIdeation,
        RiskFlag::HarmToBaby,
        RiskFlag::Psychosis,
        RiskFlag::SelfHarm,
        RiskFlag::SevereDepression,
        RiskFlag::Ppd,
        RiskFlag::Burnout,
        RiskFlag::NormalStress,
    ];

    /// Crisis tags force intervention regardless of the numeric level.
    pub fn is_crisis(self) -> bool {
        matches!(
            self,
            RiskFlag::SuicidalIdeation | RiskFlag::HarmToBaby | RiskFlag::Psychosis | RiskFlag::SelfHarm
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            RiskFlag::SuicidalIdeation => "suicidal_ideation",
            RiskFlag::HarmToBaby => "harm_to_baby",
            RiskFlag::Psychosis => "psychosis",
            RiskFlag::SelfHarm => "self_harm",
            RiskFlag::SevereDepression => "severe_depression",
            RiskFlag::Ppd => "ppd",
            RiskFlag::Burnout => "burnout",
            RiskFlag::NormalStress => "normal_stress",
        }
    }
}

impl fmt::Display for RiskFlag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown tag: {0}")]
pub struct UnknownTag(pub String);

impl FromStr for RiskFlag {
    type Err = UnknownTag;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        RiskFlag::ALL
            .into_iter()
            .find(|flag| flag.as_str() == s.trim())
            .ok_or_else(|| UnknownTag(s.to_string()))
    }
}

// -- Resources --

/// Support resources surfaced to the user alongside a crisis reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Resource {
    /// Centro de Valorização da Vida, phone 188.
    Cvv,
    /// Centro de Atenção Psicossocial.
    Caps,
    /// SAMU, phone 192.
    Emergency,
    Therapy,
}

impl Resource {
    pub const ALL: [Resource; 4] = [Resource::Cvv, Resource::Caps, Resource::Emergency, Resource::Therapy];

    pub fn as_str(self) -> &'static str {
        match self {
            Resource::Cvv => "cvv",
            Resource::Caps => "caps",
            Resource::Emergency => "emergency",
            Resource::Therapy => "therapy",
        }
    }
}

impl FromStr for Resource {
    type Err = UnknownTag;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Resource::ALL
            .into_iter()
            .find(|r| r.as_str() == s.trim())
            .ok_or_else(|| UnknownTag(s.to_string()))
    }
}

// -- Risk analysis --

/// Outcome of risk classification for a single message.
///
/// Fields are private: every value is built through [`RiskAnalysis::new`]
/// (deserialization included), which clamps the level, truncates the
/// reasoning and derives `requires_intervention`. Once built it cannot be
/// changed, so the intervention signal cannot be dropped further down.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "RawRiskAnalysis")]
pub struct RiskAnalysis {
    level: u8,
    flags: BTreeSet<RiskFlag>,
    requires_intervention: bool,
    suggested_resources: BTreeSet<Resource>,
    reasoning: String,
}

impl RiskAnalysis {
    pub fn new(
        level: i64,
        flags: impl IntoIterator<Item = RiskFlag>,
        suggested_resources: impl IntoIterator<Item = Resource>,
        requested_intervention: bool,
        reasoning: &str,
    ) -> Self {
        let level = level.clamp(0, MAX_RISK_LEVEL as i64) as u8;
        let flags: BTreeSet<RiskFlag> = flags.into_iter().collect();
        let requires_intervention = requested_intervention || Self::intervention_required(level, &flags);

        Self {
            level,
            flags,
            requires_intervention,
            suggested_resources: suggested_resources.into_iter().collect(),
            reasoning: reasoning.chars().take(MAX_REASONING_CHARS).collect(),
        }
    }

    /// The intervention rule shared by construction and read-back checks.
    pub fn intervention_required(level: u8, flags: &BTreeSet<RiskFlag>) -> bool {
        level >= INTERVENTION_THRESHOLD || flags.iter().any(|f| f.is_crisis())
    }

    pub fn level(&self) -> u8 {
        self.level
    }

    pub fn flags(&self) -> &BTreeSet<RiskFlag> {
        &self.flags
    }

    pub fn requires_intervention(&self) -> bool {
        self.requires_intervention
    }

    pub fn suggested_resources(&self) -> &BTreeSet<Resource> {
        &self.suggested_resources
    }

    pub fn reasoning(&self) -> &str {
        &self.reasoning
    }

    pub fn has_crisis_flag(&self) -> bool {
        self.flags.iter().any(|f| f.is_crisis())
    }
}

/// Lenient wire shape accepted from classifiers and storage. Unknown tags
/// are dropped rather than failing the whole analysis.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawRiskAnalysis {
    level: serde_json::Value,
    flags: Vec<String>,
    requires_intervention: bool,
    suggested_resources: Vec<String>,
    reasoning: String,
}

impl From<RawRiskAnalysis> for RiskAnalysis {
    fn from(raw: RawRiskAnalysis) -> Self {
        let level = match &raw.level {
            serde_json::Value::Number(n) => n
                .as_i64()
                .or_else(|| n.as_f64().map(|f| f.round() as i64))
                .unwrap_or(0),
            serde_json::Value::String(s) => s.trim().parse().unwrap_or(0),
            _ => 0,
        };

        RiskAnalysis::new(
            level,
            raw.flags.iter().filter_map(|f| f.parse().ok()),
            raw.suggested_resources.iter().filter_map(|r| r.parse().ok()),
            raw.requires_intervention,
            &raw.reasoning,
        )
    }
}

// -- Moderation --

/// Ordered from most to least permissive so `max` picks the stricter verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModerationAction {
    #[serde(alias = "allow")]
    Pass,
    Flag,
    Block,
}

impl ModerationAction {
    pub fn as_str(self) -> &'static str {
        match self {
            ModerationAction::Pass => "pass",
            ModerationAction::Flag => "flag",
            ModerationAction::Block => "block",
        }
    }
}

impl FromStr for ModerationAction {
    type Err = UnknownTag;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "pass" | "allow" => Ok(ModerationAction::Pass),
            "flag" => Ok(ModerationAction::Flag),
            "block" => Ok(ModerationAction::Block),
            other => Err(UnknownTag(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModerationVerdict {
    pub action: ModerationAction,
    pub category: String,
    /// 0 for clean messages, 1-5 otherwise.
    pub severity: u8,
    pub reason: Option<String>,
}

impl ModerationVerdict {
    pub fn pass() -> Self {
        Self {
            action: ModerationAction::Pass,
            category: "safe".into(),
            severity: 0,
            reason: None,
        }
    }

    /// Combine two independent verdicts; the stricter action wins and ties
    /// keep the higher severity.
    pub fn merge(self, other: ModerationVerdict) -> ModerationVerdict {
        if (other.action, other.severity) > (self.action, self.severity) {
            other
        } else {
            self
        }
    }

    pub fn is_blocked(&self) -> bool {
        self.action == ModerationAction::Block
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn crisis_flag_forces_intervention_at_low_level() {
        let analysis = RiskAnalysis::new(2, [RiskFlag::SuicidalIdeation], [], false, "llm said 2");
        assert!(analysis.requires_intervention());
        assert_eq!(analysis.level(), 2);
    }

    #[test]
    fn level_threshold_forces_intervention() {
        let analysis = RiskAnalysis::new(INTERVENTION_THRESHOLD as i64, [RiskFlag::Burnout], [], false, "");
        assert!(analysis.requires_intervention());

        let below = RiskAnalysis::new(INTERVENTION_THRESHOLD as i64 - 1, [RiskFlag::Burnout], [], false, "");
        assert!(!below.requires_intervention());
    }

    #[test]
    fn level_is_clamped_and_reasoning_truncated() {
        let long = "x".repeat(MAX_REASONING_CHARS + 120);
        let analysis = RiskAnalysis::new(42, [], [], false, &long);
        assert_eq!(analysis.level(), MAX_RISK_LEVEL);
        assert_eq!(analysis.reasoning().chars().count(), MAX_REASONING_CHARS);

        let negative = RiskAnalysis::new(-3, [], [], false, "");
        assert_eq!(negative.level(), 0);
    }

    #[test]
    fn deserialize_drops_unknown_tags_and_keeps_invariant() {
        let json = r#"{
            "level": 4,
            "flags": ["suicidal_ideation", "etc"],
            "requires_intervention": false,
            "suggested_resources": ["cvv", "hotline"],
            "reasoning": "mentions wanting to die"
        }"#;
        let analysis: RiskAnalysis = serde_json::from_str(json).unwrap();
        assert_eq!(analysis.flags().len(), 1);
        assert!(analysis.flags().contains(&RiskFlag::SuicidalIdeation));
        assert_eq!(analysis.suggested_resources().len(), 1);
        assert!(analysis.requires_intervention());
    }

    #[test]
    fn deserialize_accepts_fractional_and_string_levels() {
        let a: RiskAnalysis = serde_json::from_str(r#"{"level": 6.6}"#).unwrap();
        assert_eq!(a.level(), 7);
        let b: RiskAnalysis = serde_json::from_str(r#"{"level": "3"}"#).unwrap();
        assert_eq!(b.level(), 3);
    }

    #[test]
    fn flag_names_round_trip_through_from_str() {
        for flag in RiskFlag::ALL {
            assert_eq!(flag.as_str().parse::<RiskFlag>().unwrap(), flag);
        }
        assert!("panic".parse::<RiskFlag>().is_err());
    }

    #[test]
    fn merge_prefers_stricter_action() {
        let flag = ModerationVerdict {
            action: ModerationAction::Flag,
            category: "spam".into(),
            severity: 5,
            reason: None,
        };
        let block = ModerationVerdict {
            action: ModerationAction::Block,
            category: "medical_advice".into(),
            severity: 2,
            reason: None,
        };
        assert_eq!(flag.clone().merge(block.clone()).action, ModerationAction::Block);
        assert_eq!(block.merge(flag).category, "medical_advice");
        assert_eq!(ModerationVerdict::pass().merge(ModerationVerdict::pass()).action, ModerationAction::Pass);
    }

    #[test]
    fn allow_is_accepted_as_pass() {
        let action: ModerationAction = serde_json::from_str("\"allow\"").unwrap();
        assert_eq!(action, ModerationAction::Pass);
    }
}
