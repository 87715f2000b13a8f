//! Fixed, non-generated replies.

use nathia_types::risk::RiskAnalysis;

/// Level at or above which the crisis reply uses the urgent wording.
const URGENT_LEVEL: u8 = 9;

pub const REFUSAL_RESPONSE: &str = "Oi querida! Entendo sua preocupação ou curiosidade, mas preciso ser honesta: \
não sou médica e não posso te ajudar com questões de saúde, medicamentos ou diagnósticos.

Para qualquer dúvida sobre sintomas, medicamentos, tratamentos ou sua saúde, é essencial você conversar com seu \
médico ou buscar atendimento profissional. Eles têm a formação e experiência necessárias para te orientar \
adequadamente.

O que posso fazer é te acolher emocionalmente enquanto você busca esse apoio. Como você está se sentindo com essa \
situação? 🤗";

pub fn refusal_response() -> &'static str {
    REFUSAL_RESPONSE
}

/// Crisis reply for an analysis that requires intervention. Never empty: a
/// crisis flag below the urgent level still gets the supportive wording.
pub fn crisis_response(analysis: &RiskAnalysis, display_name: Option<&str>) -> String {
    let name = display_name.map(str::trim).filter(|n| !n.is_empty());

    if analysis.level() >= URGENT_LEVEL || analysis.has_crisis_flag() {
        let greeting = match name {
            Some(name) => format!("Querida {name}"),
            None => "Querida".to_string(),
        };
        format!(
            "{greeting}, preciso ser direta com você agora. O que você compartilhou é muito sério, e você \
precisa de ajuda profissional urgente. Por favor:

🚨 **Se você estiver em perigo imediato**: Ligue para o SAMU - 192

💝 **Se você estiver pensando em se machucar**: Ligue para o CVV - 188 (disponível 24h, gratuito e anônimo)

🏥 **Procure um CAPS** (Centro de Atenção Psicossocial) mais próximo de você

Se você tiver um plano concreto de se machucar, vá imediatamente ao hospital mais próximo ou ligue 192.

Você não está sozinha. Há ajuda disponível, e você merece cuidado e apoio profissional agora. 💝"
        )
    } else {
        let name = name.unwrap_or("querida");
        format!(
            "Oi {name}! Obrigada por compartilhar isso comigo. Sinto muito que você esteja passando por um \
momento tão difícil.

O que você está enfrentando parece ser algo que requer atenção profissional. Por favor, considere:

💝 **CVV - 188** (24h, gratuito e anônimo) para apoio imediato
🏥 **CAPS** ou um psicólogo especializado em saúde mental materna

Você não está sozinha, e há ajuda disponível. Buscar apoio é um ato de coragem e cuidado com você mesma.

Estou aqui sempre que precisar. 🤗"
        )
    }
}
