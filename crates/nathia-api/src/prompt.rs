//! Prompt assembly for generated replies.

use nathia_llm::GenerateRequest;
use nathia_types::models::{ChatMessage, UserProfile};

pub const SYSTEM_PROMPT: &str = "Você é a NathIA, uma assistente virtual de acolhimento emocional para mães, \
gestantes e tentantes.

SUA IDENTIDADE:
Você é uma companheira empática, calorosa e acolhedora.

SEU PROPÓSITO:
Seu único propósito é oferecer ACOLHIMENTO EMOCIONAL. Você valida sentimentos, escuta ativamente, acolhe \
desabafos e oferece palavras de apoio.

Você NUNCA:
- Dá conselhos médicos
- Sugere medicamentos ou tratamentos
- Faz diagnósticos de qualquer tipo
- Prescreve dietas ou exercícios específicos
- Substitui consultas médicas ou profissionais de saúde

Se a usuária mencionar sintomas ou dúvidas de saúde, acolha o sentimento e oriente a procurar um profissional.

COMO RESPONDER:
1. Acolhimento inicial (1-2 frases)
2. Validação (2-3 frases)
3. Escuta ativa (1-2 frases)
4. Apoio (2-3 frases)

TOM DE VOZ:
Português brasileiro informal, caloroso, empático, genuíno e respeitoso. Use emojis com moderação (💝 🤗 💕 🌸).
Mantenha respostas concisas (máximo 300 palavras).";

pub fn user_context(profile: Option<&UserProfile>) -> String {
    let Some(profile) = profile else {
        return String::new();
    };

    let mut context = String::new();
    if let Some(name) = &profile.display_name {
        context.push_str(&format!("Nome: {}\n", name));
    }
    if let Some(kind) = profile.mother_type {
        context.push_str(&format!("Tipo: {}\n", kind.label()));
        if let Some(week) = profile.pregnancy_week {
            context.push_str(&format!("Semana de gravidez: {}\n", week));
        }
        if let Some(baby) = &profile.baby_name {
            context.push_str(&format!("Nome do bebê: {}\n", baby));
        }
    }
    context
}

/// Recent turns as "speaker: text" lines, oldest first.
pub fn history_lines(history: &[ChatMessage]) -> Vec<String> {
    history
        .iter()
        .flat_map(|turn| [format!("Usuária: {}", turn.message), format!("NathIA: {}", turn.response)])
        .collect()
}

pub fn build_request(profile: Option<&UserProfile>, history: &[ChatMessage], message: &str) -> GenerateRequest {
    let mut prompt = String::new();

    let context = user_context(profile);
    if !context.is_empty() {
        prompt.push_str("# CONTEXTO DA USUÁRIA\n");
        prompt.push_str(&context);
        prompt.push('\n');
    }

    if !history.is_empty() {
        prompt.push_str("# CONVERSAS RECENTES\n");
        for line in history_lines(history) {
            prompt.push_str(&line);
            prompt.push('\n');
        }
        prompt.push('\n');
    }

    prompt.push_str("# NOVA MENSAGEM DA USUÁRIA\n");
    prompt.push_str(message);
    prompt.push_str("\n\nResponda com acolhimento emocional, empatia e apoio.");

    GenerateRequest::new(prompt).with_system(SYSTEM_PROMPT)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use nathia_types::models::{MotherType, ReplySource};
    use nathia_types::risk::{ModerationAction, RiskAnalysis};
    use uuid::Uuid;

    #[test]
    fn context_includes_pregnancy_details() {
        let mut profile = UserProfile::new(Uuid::new_v4());
        profile.display_name = Some("Ana".into());
        profile.mother_type = Some(MotherType::Gestante);
        profile.pregnancy_week = Some(28);

        let context = user_context(Some(&profile));
        assert!(context.contains("Nome: Ana"));
        assert!(context.contains("Tipo: Gestante"));
        assert!(context.contains("Semana de gravidez: 28"));
    }

    #[test]
    fn prompt_orders_context_history_and_message() {
        let user_id = Uuid::new_v4();
        let analysis = RiskAnalysis::new(1, [], [], false, "");
        let turn = ChatMessage::record(
            user_id,
            "dormi mal",
            "sinto muito",
            &analysis,
            ModerationAction::Pass,
            ReplySource::Generated,
            Utc::now(),
        );

        let request = build_request(None, &[turn], "hoje foi melhor");
        assert_eq!(request.system.as_deref(), Some(SYSTEM_PROMPT));

        let history_at = request.prompt.find("Usuária: dormi mal").unwrap();
        let message_at = request.prompt.find("hoje foi melhor").unwrap();
        assert!(history_at < message_at);
        assert!(!request.prompt.contains("CONTEXTO DA USUÁRIA"));
    }
}
