//! Two-layer content moderation: a fixed policy table, then an optional
//! contextual check by a model. The stricter verdict wins.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Deserialize;
use tracing::{debug, info, warn};

use nathia_db::UserScope;
use nathia_llm::json::parse_object;
use nathia_llm::{GenerateRequest, LlmProvider};
use nathia_types::risk::{ModerationAction, ModerationVerdict};

use crate::error::SafetyError;
use crate::text::{digest, fold};

struct PolicyRule {
    category: &'static str,
    action: ModerationAction,
    severity: u8,
    terms: &'static [&'static str],
}

/// Terms are written in [`fold`]ed form, so URL markers have no punctuation.
const POLICY_TABLE: &[PolicyRule] = &[
    PolicyRule {
        category: "medical_advice",
        action: ModerationAction::Block,
        severity: 4,
        terms: &[
            // medication
            "remedio",
            "medicamento",
            "medicacao",
            "comprimido",
            "pilula",
            "capsula",
            "antibiotico",
            "antidepressivo",
            "ansiolitico",
            "analgesico",
            "paracetamol",
            "dipirona",
            "ibuprofeno",
            "aspirina",
            "omeprazol",
            "dosagem",
            "posologia",
            // diagnosis
            "diagnostico",
            "diagnosticar",
            // prescription
            "prescricao",
            "prescrever",
            "receita medica",
            // treatment
            "tratamento",
            "terapia medicamentosa",
            // obstetric signs that need a doctor, not a chat
            "bolsa estourou",
            "bolsa rompeu",
            "sangramento",
            "contracao",
            "dilatacao",
            "bebe nao mexeu",
        ],
    },
    PolicyRule {
        category: "harassment",
        action: ModerationAction::Flag,
        severity: 3,
        terms: &["idiota", "imbecil", "vagabunda", "otaria", "te odeio", "cala a boca"],
    },
    PolicyRule {
        category: "spam",
        action: ModerationAction::Flag,
        severity: 2,
        terms: &["http", "www", "clique aqui", "ganhe dinheiro", "promocao imperdivel"],
    },
];

/// First layer: table lookup on the folded message. Returns the strictest
/// matching rule, or a pass.
pub fn policy_verdict(message: &str) -> ModerationVerdict {
    let folded = fold(message);

    POLICY_TABLE
        .iter()
        .filter_map(|rule| {
            rule.terms.iter().find(|t| folded.contains(*t)).map(|term| ModerationVerdict {
                action: rule.action,
                category: rule.category.to_string(),
                severity: rule.severity,
                reason: Some(format!("policy term '{}'", term)),
            })
        })
        .fold(ModerationVerdict::pass(), ModerationVerdict::merge)
}

const CONTEXTUAL_PROMPT: &str = "Analise esta mensagem de uma mãe para moderação. Responda APENAS JSON:
{
  \"safe\": boolean,
  \"category\": \"spam|harassment|hate_speech|sexual|medical_advice|other\",
  \"severity\": 1-5,
  \"action\": \"allow\" | \"block\" | \"flag\",
  \"reason\": \"string curta\"
}

Tristeza, cansaço e desabafos emocionais são permitidos.
";

#[derive(Debug, Deserialize)]
#[serde(default)]
struct ContextualReply {
    safe: bool,
    category: String,
    severity: i64,
    action: String,
    reason: Option<String>,
}

impl Default for ContextualReply {
    fn default() -> Self {
        Self {
            safe: true,
            category: "safe".into(),
            severity: 0,
            action: "allow".into(),
            reason: None,
        }
    }
}

impl From<ContextualReply> for ModerationVerdict {
    fn from(reply: ContextualReply) -> Self {
        let mut action = reply.action.parse().unwrap_or(ModerationAction::Pass);
        // An unsafe verdict without an action still goes to a human.
        if !reply.safe && action == ModerationAction::Pass {
            action = ModerationAction::Flag;
        }
        if action == ModerationAction::Pass {
            return ModerationVerdict::pass();
        }
        ModerationVerdict {
            action,
            category: reply.category,
            severity: reply.severity.clamp(1, 5) as u8,
            reason: reply.reason,
        }
    }
}

pub struct Moderator {
    provider: Option<Arc<dyn LlmProvider>>,
}

impl Moderator {
    pub fn policy_only() -> Self {
        Self { provider: None }
    }

    pub fn with_provider(provider: Arc<dyn LlmProvider>) -> Self {
        Self { provider: Some(provider) }
    }

    /// Moderate `message`, giving the model recent turns as context. Never
    /// fails: a provider error degrades to the policy-layer verdict.
    pub async fn check(&self, message: &str, context: &[String]) -> ModerationVerdict {
        let policy = policy_verdict(message);

        // A policy block already decides the outcome.
        if policy.is_blocked() {
            debug!(category = %policy.category, "Blocked by policy table");
            return policy;
        }

        let Some(provider) = &self.provider else {
            return policy;
        };

        let mut prompt = String::from(CONTEXTUAL_PROMPT);
        if !context.is_empty() {
            prompt.push_str("\nContexto recente:\n");
            for line in context {
                prompt.push_str(line);
                prompt.push('\n');
            }
        }
        prompt.push_str(&format!("\nMensagem: {}", message));

        let request = GenerateRequest::new(prompt)
            .with_temperature(0.1)
            .with_max_tokens(200);

        match provider.generate(&request).await {
            Ok(text) => match parse_object::<ContextualReply>(&text) {
                Ok(reply) => policy.merge(reply.into()),
                Err(e) => {
                    warn!(provider = provider.name(), error = %e, "Unparsable moderation reply, using policy verdict");
                    policy
                }
            },
            Err(e) => {
                warn!(provider = provider.name(), error = %e, "Moderation provider failed, using policy verdict");
                policy
            }
        }
    }
}

/// Put a flagged message in the human review queue. Other verdicts are a no-op.
pub async fn enqueue_for_review(
    scope: &UserScope,
    message: &str,
    verdict: &ModerationVerdict,
    now: DateTime<Utc>,
) -> Result<bool, SafetyError> {
    if verdict.action != ModerationAction::Flag {
        return Ok(false);
    }

    let scope_for_task = scope.clone();
    let message_owned = message.to_string();
    let category = verdict.category.clone();
    let severity = verdict.severity;
    tokio::task::spawn_blocking(move || {
        scope_for_task.enqueue_for_review(&message_owned, &category, severity, now)
    })
    .await??;

    info!(
        user_id = scope.user_id(),
        category = %verdict.category,
        severity = verdict.severity,
        digest = %digest(message),
        "Message queued for review"
    );
    Ok(true)
}
