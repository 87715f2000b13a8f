//! Mental-health risk classification for a single message.

use std::collections::BTreeSet;
use std::sync::Arc;

use tracing::{debug, warn};

use nathia_llm::json::parse_object;
use nathia_llm::{GenerateRequest, LlmProvider};
use nathia_types::risk::{Resource, RiskAnalysis, RiskFlag};

use crate::text::fold;

const RISK_SYSTEM_PROMPT: &str = "Você é especialista em saúde mental materna. Analise a mensagem e retorne \
APENAS JSON com:
{
  \"level\": 0-10,
  \"flags\": [\"suicidal_ideation\", \"harm_to_baby\", \"psychosis\", \"self_harm\", \"severe_depression\", \
\"ppd\", \"burnout\", \"normal_stress\"],
  \"requires_intervention\": boolean,
  \"suggested_resources\": [\"cvv\", \"caps\", \"emergency\", \"therapy\"],
  \"reasoning\": \"explicação curta\"
}";

struct KeywordRule {
    phrases: &'static [&'static str],
    level: i64,
    flag: RiskFlag,
    resources: &'static [Resource],
}

/// Phrases are written in [`fold`]ed form and matched against the folded
/// message.
const KEYWORD_RULES: &[KeywordRule] = &[
    KeywordRule {
        phrases: &[
            "suicidio",
            "suicida",
            "quero morrer",
            "me matar",
            "nao quero mais viver",
            "vou morrer",
            "nao vale a pena viver",
            "acabar com tudo",
            "nao aguento mais viver",
        ],
        level: 10,
        flag: RiskFlag::SuicidalIdeation,
        resources: &[Resource::Cvv, Resource::Emergency],
    },
    KeywordRule {
        phrases: &["machucar o bebe", "fazer mal ao bebe", "tenho vontade de machucar"],
        level: 10,
        flag: RiskFlag::HarmToBaby,
        resources: &[Resource::Emergency, Resource::Caps],
    },
    KeywordRule {
        phrases: &["me machucar", "me cortar", "autoagressao", "auto agressao"],
        level: 9,
        flag: RiskFlag::SelfHarm,
        resources: &[Resource::Cvv, Resource::Emergency],
    },
    KeywordRule {
        phrases: &["ouvir vozes", "ouco vozes", "ver coisas", "vejo coisas", "nao e real", "delirio"],
        level: 9,
        flag: RiskFlag::Psychosis,
        resources: &[Resource::Emergency, Resource::Caps],
    },
    KeywordRule {
        phrases: &[
            "nao consigo cuidar do bebe",
            "nao saio da cama",
            "nao consigo levantar",
            "nao me importo mais",
            "nada importa",
        ],
        level: 8,
        flag: RiskFlag::SevereDepression,
        resources: &[Resource::Therapy, Resource::Caps],
    },
    KeywordRule {
        phrases: &["depressao pos parto"],
        level: 6,
        flag: RiskFlag::Ppd,
        resources: &[Resource::Therapy],
    },
    KeywordRule {
        phrases: &["nao aguento mais", "nao tenho forcas", "sem energia", "exausta"],
        level: 5,
        flag: RiskFlag::Burnout,
        resources: &[],
    },
    // Anxiety has no flag of its own; it only raises the level.
    KeywordRule {
        phrases: &["muito ansiosa", "panico"],
        level: 4,
        flag: RiskFlag::NormalStress,
        resources: &[],
    },
];

/// Deterministic classification from the keyword table. Every matching rule
/// contributes its flag and resources; the level is the highest match.
pub fn keyword_analysis(message: &str) -> RiskAnalysis {
    let folded = fold(message);

    let mut level = 0;
    let mut flags = BTreeSet::new();
    let mut resources = BTreeSet::new();

    for rule in KEYWORD_RULES {
        if rule.phrases.iter().any(|p| folded.contains(p)) {
            level = level.max(rule.level);
            flags.insert(rule.flag);
            resources.extend(rule.resources.iter().copied());
        }
    }

    if flags.is_empty() {
        level = 1;
        flags.insert(RiskFlag::NormalStress);
    }

    RiskAnalysis::new(
        level,
        flags,
        resources,
        false,
        &format!("Análise baseada em padrões: nível {}", level),
    )
}

/// Combine a model analysis with the keyword analysis. Keyword hits that
/// require intervention are never lost to a model that under-reads them.
fn with_keyword_floor(model: RiskAnalysis, keywords: &RiskAnalysis) -> RiskAnalysis {
    if !keywords.requires_intervention() {
        return model;
    }

    let level = model.level().max(keywords.level());
    let mut flags = model.flags().clone();
    flags.extend(keywords.flags().iter().copied().filter(|f| *f != RiskFlag::NormalStress));
    if flags.len() > 1 {
        flags.remove(&RiskFlag::NormalStress);
    }
    let mut resources = model.suggested_resources().clone();
    resources.extend(keywords.suggested_resources().iter().copied());

    RiskAnalysis::new(level as i64, flags, resources, true, model.reasoning())
}

pub struct RiskClassifier {
    provider: Option<Arc<dyn LlmProvider>>,
}

impl RiskClassifier {
    pub fn keyword_only() -> Self {
        Self { provider: None }
    }

    pub fn with_provider(provider: Arc<dyn LlmProvider>) -> Self {
        Self { provider: Some(provider) }
    }

    /// Classify `message`, using recent turns as context when a model is
    /// available. Any provider failure or unparsable output falls back to the
    /// keyword table; this never fails.
    pub async fn classify(&self, message: &str, context: &[String]) -> RiskAnalysis {
        let keywords = keyword_analysis(message);

        let Some(provider) = &self.provider else {
            return keywords;
        };

        let mut prompt = String::new();
        if !context.is_empty() {
            prompt.push_str("Contexto recente:\n");
            for line in context {
                prompt.push_str(line);
                prompt.push('\n');
            }
            prompt.push('\n');
        }
        prompt.push_str(&format!("Analise: \"{}\"", message));

        let request = GenerateRequest::new(prompt)
            .with_system(RISK_SYSTEM_PROMPT)
            .with_temperature(0.3)
            .with_max_tokens(1024);

        let analysis = match provider.generate(&request).await {
            Ok(text) => match parse_object::<RiskAnalysis>(&text) {
                Ok(analysis) => analysis,
                Err(e) => {
                    warn!(provider = provider.name(), error = %e, "Unparsable risk analysis, using keyword fallback");
                    return keywords;
                }
            },
            Err(e) => {
                warn!(provider = provider.name(), error = %e, "Risk provider failed, using keyword fallback");
                return keywords;
            }
        };

        debug!(provider = provider.name(), level = analysis.level(), "Model risk analysis");
        with_keyword_floor(analysis, &keywords)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use nathia_llm::LlmError;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Canned {
        reply: Result<&'static str, ()>,
        calls: AtomicUsize,
    }

    impl Canned {
        fn ok(reply: &'static str) -> Arc<Self> {
            Arc::new(Self { reply: Ok(reply), calls: AtomicUsize::new(0) })
        }

        fn failing() -> Arc<Self> {
            Arc::new(Self { reply: Err(()), calls: AtomicUsize::new(0) })
        }
    }

    #[async_trait]
    impl LlmProvider for Canned {
        fn name(&self) -> &str {
            "canned"
        }

        async fn generate(&self, _request: &GenerateRequest) -> Result<String, LlmError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.reply.map(str::to_string).map_err(|_| LlmError::Timeout)
        }
    }

    #[test]
    fn quero_morrer_is_suicidal_ideation() {
        let analysis = keyword_analysis("Eu só quero morrer");
        assert_eq!(analysis.level(), 10);
        assert!(analysis.flags().contains(&RiskFlag::SuicidalIdeation));
        assert!(analysis.requires_intervention());
        assert!(analysis.suggested_resources().contains(&Resource::Cvv));
    }

    #[test]
    fn accents_do_not_hide_keywords() {
        let analysis = keyword_analysis("Acho que estou com DEPRESSÃO PÓS-PARTO");
        assert_eq!(analysis.level(), 6);
        assert!(analysis.flags().contains(&RiskFlag::Ppd));
        assert!(!analysis.requires_intervention());

        let analysis = keyword_analysis("Não consigo cuidar do bebê");
        assert_eq!(analysis.level(), 8);
        assert!(analysis.requires_intervention());
    }

    #[test]
    fn all_matching_rules_contribute() {
        let analysis = keyword_analysis("não aguento mais, às vezes penso em me cortar");
        assert_eq!(analysis.level(), 9);
        assert!(analysis.flags().contains(&RiskFlag::Burnout));
        assert!(analysis.flags().contains(&RiskFlag::SelfHarm));
    }

    #[test]
    fn line_breaks_and_punctuation_do_not_hide_a_crisis() {
        for message in ["quero\nmorrer", "quero  morrer", "quero... morrer", "Eu QUERO,\r\nmorrer."] {
            let analysis = keyword_analysis(message);
            assert_eq!(analysis.level(), 10, "{message:?}");
            assert!(analysis.flags().contains(&RiskFlag::SuicidalIdeation), "{message:?}");
            assert!(analysis.requires_intervention(), "{message:?}");
        }
    }

    #[test]
    fn first_person_crisis_phrases_require_intervention() {
        let cases = [
            ("ouço vozes à noite", RiskFlag::Psychosis),
            ("às vezes vejo coisas no quarto", RiskFlag::Psychosis),
            ("acho que é delírio", RiskFlag::Psychosis),
            ("não aguento mais viver assim", RiskFlag::SuicidalIdeation),
            ("vou acabar com tudo", RiskFlag::SuicidalIdeation),
            ("não vale a pena viver", RiskFlag::SuicidalIdeation),
            ("tenho vontade de machucar ele", RiskFlag::HarmToBaby),
            ("penso em autoagressão", RiskFlag::SelfHarm),
            ("não consigo levantar de manhã", RiskFlag::SevereDepression),
            ("nada importa", RiskFlag::SevereDepression),
        ];
        for (message, flag) in cases {
            let analysis = keyword_analysis(message);
            assert!(analysis.flags().contains(&flag), "{message}: {:?}", analysis.flags());
            assert!(analysis.requires_intervention(), "{message}");
        }
    }

    #[test]
    fn overload_and_anxiety_raise_level_without_intervention() {
        let analysis = keyword_analysis("Estou exausta, sem energia");
        assert_eq!(analysis.level(), 5);
        assert!(analysis.flags().contains(&RiskFlag::Burnout));
        assert!(!analysis.requires_intervention());

        let analysis = keyword_analysis("tive um ataque de pânico");
        assert_eq!(analysis.level(), 4);
        assert_eq!(analysis.flags().iter().collect::<Vec<_>>(), vec![&RiskFlag::NormalStress]);
        assert!(!analysis.requires_intervention());
    }

    #[test]
    fn plain_message_is_normal_stress() {
        let analysis = keyword_analysis("O bebê dormiu bem hoje");
        assert_eq!(analysis.level(), 1);
        assert_eq!(analysis.flags().iter().collect::<Vec<_>>(), vec![&RiskFlag::NormalStress]);
        assert!(!analysis.requires_intervention());
    }

    #[tokio::test]
    async fn model_output_wins_when_parsable() {
        let provider = Canned::ok(
            "```json\n{\"level\": 6, \"flags\": [\"ppd\"], \"requires_intervention\": false, \
             \"suggested_resources\": [\"therapy\"], \"reasoning\": \"tristeza persistente\"}\n```",
        );
        let classifier = RiskClassifier::with_provider(provider.clone());

        let analysis = classifier.classify("ando muito triste", &[]).await;
        assert_eq!(analysis.level(), 6);
        assert_eq!(analysis.reasoning(), "tristeza persistente");
        assert_eq!(provider.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn provider_failure_falls_back_to_keywords() {
        let classifier = RiskClassifier::with_provider(Canned::failing());
        let analysis = classifier.classify("quero morrer", &[]).await;
        assert!(analysis.flags().contains(&RiskFlag::SuicidalIdeation));
        assert!(analysis.requires_intervention());
    }

    #[tokio::test]
    async fn garbage_output_falls_back_to_keywords() {
        let classifier = RiskClassifier::with_provider(Canned::ok("desculpe, não posso ajudar"));
        let analysis = classifier.classify("tudo bem por aqui", &[]).await;
        assert_eq!(analysis.level(), 1);
    }

    #[tokio::test]
    async fn model_cannot_downgrade_a_keyword_crisis() {
        let provider = Canned::ok("{\"level\": 2, \"flags\": [\"normal_stress\"], \"reasoning\": \"ok\"}");
        let classifier = RiskClassifier::with_provider(provider);

        let analysis = classifier.classify("às vezes penso em me matar", &[]).await;
        assert_eq!(analysis.level(), 10);
        assert!(analysis.flags().contains(&RiskFlag::SuicidalIdeation));
        assert!(!analysis.flags().contains(&RiskFlag::NormalStress));
        assert!(analysis.requires_intervention());
    }

    #[tokio::test]
    async fn out_of_range_model_level_is_clamped() {
        let classifier = RiskClassifier::with_provider(Canned::ok("{\"level\": 42, \"flags\": []}"));
        let analysis = classifier.classify("oi", &[]).await;
        assert_eq!(analysis.level(), 10);
        assert!(analysis.requires_intervention());
    }
}
