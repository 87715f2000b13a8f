//! The chat turn state machine.
//!
//! ```text
//! RateLimitCheck -> ModerationAndRisk -> Respond -> Persist -> Done
//!        \                 \               \
//!         +-----------------+---------------+--> Error
//! ```
//!
//! A turn that requires intervention skips generation and answers with the
//! crisis template; a moderation block answers with the refusal template.
//! Persistence runs once, after the reply is settled, and its failures never
//! revoke the reply.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use nathia_db::{Database, UserScope};
use nathia_llm::{LlmError, LlmProvider};
use nathia_safety::moderation::enqueue_for_review;
use nathia_safety::rate_limit::CHAT_ENDPOINT;
use nathia_safety::text::digest;
use nathia_safety::{Moderator, RateLimitDecision, RateLimiter, RiskClassifier, templates};
use nathia_types::api::{ChatResponse, RateLimitInfo};
use nathia_types::models::{ChatMessage, ReplySource, UserProfile};
use nathia_types::risk::{ALERT_THRESHOLD, ModerationVerdict, Resource, RiskAnalysis};

use crate::prompt;

pub const DEFAULT_HISTORY_TURNS: u32 = 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    RateLimitCheck,
    ModerationAndRisk,
    Respond,
    Persist,
    Done,
    Error,
}

impl Stage {
    pub fn as_str(self) -> &'static str {
        match self {
            Stage::RateLimitCheck => "rate_limit_check",
            Stage::ModerationAndRisk => "moderation_and_risk",
            Stage::Respond => "respond",
            Stage::Persist => "persist",
            Stage::Done => "done",
            Stage::Error => "error",
        }
    }
}

#[derive(Debug)]
pub enum TurnOutcome {
    Success(ChatResponse),
    /// Crisis template delivered; the generative model was not called.
    Crisis(ChatResponse),
    RateLimited(RateLimitDecision),
    UpstreamError(LlmError),
}

/// Profile and recent turns loaded once per turn.
#[derive(Default)]
struct TurnContext {
    profile: Option<UserProfile>,
    history: Vec<ChatMessage>,
}

/// Tracks the current stage of one turn and logs every transition.
struct Turn<'a> {
    user_id: &'a str,
    digest: String,
    stage: Stage,
}

impl<'a> Turn<'a> {
    fn new(user_id: &'a str, message: &str) -> Self {
        let turn = Self { user_id, digest: digest(message), stage: Stage::RateLimitCheck };
        debug!(user_id, digest = %turn.digest, stage = turn.stage.as_str(), "Turn started");
        turn
    }

    fn advance(&mut self, next: Stage) {
        debug!(
            user_id = self.user_id,
            digest = %self.digest,
            from = self.stage.as_str(),
            to = next.as_str(),
            "Turn transition"
        );
        self.stage = next;
    }
}

pub struct ChatPipeline {
    db: Arc<Database>,
    limiter: RateLimiter,
    moderator: Moderator,
    classifier: RiskClassifier,
    provider: Arc<dyn LlmProvider>,
    history_turns: u32,
}

impl ChatPipeline {
    pub fn new(
        db: Arc<Database>,
        limiter: RateLimiter,
        moderator: Moderator,
        classifier: RiskClassifier,
        provider: Arc<dyn LlmProvider>,
    ) -> Self {
        Self {
            db,
            limiter,
            moderator,
            classifier,
            provider,
            history_turns: DEFAULT_HISTORY_TURNS,
        }
    }

    pub fn with_history_turns(mut self, turns: u32) -> Self {
        self.history_turns = turns;
        self
    }

    /// Run one chat turn for an already authenticated and validated request.
    pub async fn run(&self, user_id: Uuid, message: &str, now: DateTime<Utc>) -> TurnOutcome {
        let scope = self.db.scoped(user_id);
        let mut turn = Turn::new(scope.user_id(), message);

        // -- RateLimitCheck --
        let quota = self.limiter.check_daily_quota(&scope, now).await;
        if !quota.allowed {
            turn.advance(Stage::Error);
            return TurnOutcome::RateLimited(quota);
        }
        let window = self.limiter.check(&scope, CHAT_ENDPOINT, now).await;
        if !window.allowed {
            info!(user_id = scope.user_id(), endpoint = CHAT_ENDPOINT, "Chat rate limited");
            turn.advance(Stage::Error);
            return TurnOutcome::RateLimited(window);
        }

        // -- ModerationAndRisk --
        turn.advance(Stage::ModerationAndRisk);
        let context = self.load_context(&scope).await;
        let context_lines = prompt::history_lines(&context.history);
        let (verdict, analysis) = tokio::join!(
            self.moderator.check(message, &context_lines),
            self.classifier.classify(message, &context_lines),
        );
        debug!(
            user_id = scope.user_id(),
            moderation = verdict.action.as_str(),
            risk_level = analysis.level(),
            requires_intervention = analysis.requires_intervention(),
            "Safety checks finished"
        );

        let display_name = context.profile.as_ref().and_then(|p| p.display_name.as_deref());
        let (reply, source) = if analysis.requires_intervention() {
            warn!(
                user_id = scope.user_id(),
                risk_level = analysis.level(),
                flags = ?analysis.flags(),
                "Intervention required, answering with crisis resources"
            );
            (templates::crisis_response(&analysis, display_name), ReplySource::Crisis)
        } else if verdict.is_blocked() {
            info!(user_id = scope.user_id(), category = %verdict.category, "Message blocked by moderation");
            (templates::refusal_response().to_string(), ReplySource::Refusal)
        } else {
            // -- Respond --
            turn.advance(Stage::Respond);
            let request = prompt::build_request(context.profile.as_ref(), &context.history, message);
            match self.provider.generate(&request).await {
                Ok(text) => (text, ReplySource::Generated),
                Err(e) => {
                    error!(user_id = scope.user_id(), provider = self.provider.name(), error = %e, "Reply generation failed");
                    turn.advance(Stage::Error);
                    return TurnOutcome::UpstreamError(e);
                }
            }
        };

        // -- Persist --
        turn.advance(Stage::Persist);
        let record = ChatMessage::record(user_id, message, &reply, &analysis, verdict.action, source, now);
        self.persist(&scope, record, &verdict, now).await;

        turn.advance(Stage::Done);
        let response = ChatResponse {
            response: reply,
            rate_limit: RateLimitInfo { remaining: window.remaining, reset_at: window.reset_at },
            requires_intervention: analysis.requires_intervention(),
            resources: resources_for(&analysis),
        };
        match source {
            ReplySource::Crisis => TurnOutcome::Crisis(response),
            ReplySource::Generated | ReplySource::Refusal => TurnOutcome::Success(response),
        }
    }

    async fn load_context(&self, scope: &UserScope) -> TurnContext {
        let scope_for_task = scope.clone();
        let limit = self.history_turns;
        let loaded = tokio::task::spawn_blocking(move || -> anyhow::Result<TurnContext> {
            Ok(TurnContext {
                profile: scope_for_task.profile()?,
                history: scope_for_task.recent_messages(limit)?,
            })
        })
        .await;

        match loaded {
            Ok(Ok(context)) => context,
            Ok(Err(e)) => {
                warn!(user_id = scope.user_id(), error = %e, "Failed to load turn context, continuing without it");
                TurnContext::default()
            }
            Err(e) => {
                warn!(user_id = scope.user_id(), error = %e, "Context task failed, continuing without it");
                TurnContext::default()
            }
        }
    }

    /// Write the turn, fold its risk into the profile and raise an alert for
    /// high-risk turns. Failures are logged and swallowed.
    async fn persist(&self, scope: &UserScope, record: ChatMessage, verdict: &ModerationVerdict, now: DateTime<Utc>) {
        let message_text = record.message.clone();
        let scope_for_task = scope.clone();
        let written = tokio::task::spawn_blocking(move || -> anyhow::Result<Option<u8>> {
            scope_for_task.insert_message(&record)?;
            let rolled = scope_for_task.apply_turn_risk(record.risk_level, now)?;
            if record.risk_level >= ALERT_THRESHOLD {
                scope_for_task.insert_risk_alert(record.id, record.risk_level, &record.risk_flags, now)?;
                return Ok(Some(rolled));
            }
            Ok(None)
        })
        .await;

        match written {
            Ok(Ok(Some(rolled))) => {
                warn!(user_id = scope.user_id(), rolling_risk = rolled, "High-risk turn, team alert recorded");
            }
            Ok(Ok(None)) => {}
            Ok(Err(e)) => error!(user_id = scope.user_id(), error = %e, "Failed to persist chat turn"),
            Err(e) => error!(user_id = scope.user_id(), error = %e, "Persist task failed"),
        }

        if let Err(e) = enqueue_for_review(scope, &message_text, verdict, now).await {
            error!(user_id = scope.user_id(), error = %e, "Failed to queue message for review");
        }
    }
}

/// Resources to show with the reply. An intervention always names at least
/// the crisis line and emergency services.
fn resources_for(analysis: &RiskAnalysis) -> Vec<Resource> {
    let resources: Vec<Resource> = analysis.suggested_resources().iter().copied().collect();
    if analysis.requires_intervention() && resources.is_empty() {
        return vec![Resource::Cvv, Resource::Emergency];
    }
    resources
}

#[cfg(test)]
mod tests {
    use super::*;
    use nathia_types::risk::RiskFlag;

    #[test]
    fn intervention_always_has_resources() {
        let analysis = RiskAnalysis::new(8, [RiskFlag::SevereDepression], [], false, "");
        assert_eq!(resources_for(&analysis), vec![Resource::Cvv, Resource::Emergency]);
    }

    #[test]
    fn calm_turn_keeps_suggested_resources() {
        let analysis = RiskAnalysis::new(6, [RiskFlag::Ppd], [Resource::Therapy], false, "");
        assert_eq!(resources_for(&analysis), vec![Resource::Therapy]);

        let analysis = RiskAnalysis::new(1, [RiskFlag::NormalStress], [], false, "");
        assert!(resources_for(&analysis).is_empty());
    }
}
