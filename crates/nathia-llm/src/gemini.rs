use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, warn};

use crate::error::LlmError;
use crate::models::{DEFAULT_GEMINI_BASE_URL, gemini_endpoint, resolve_model};
use crate::provider::{GenerateRequest, LlmProvider};

/// Safety threshold applied to every Gemini harm category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SafetyThreshold {
    BlockNone,
    BlockOnlyHigh,
    BlockMediumAndAbove,
    BlockLowAndAbove,
}

#[derive(Debug, Clone, Serialize)]
pub struct SafetySetting {
    pub category: &'static str,
    pub threshold: SafetyThreshold,
}

/// Settings for conversational replies: emotional topics must get through,
/// explicit content must not.
pub fn chat_safety_settings() -> Vec<SafetySetting> {
    vec![
        SafetySetting { category: "HARM_CATEGORY_HARASSMENT", threshold: SafetyThreshold::BlockNone },
        SafetySetting { category: "HARM_CATEGORY_HATE_SPEECH", threshold: SafetyThreshold::BlockNone },
        SafetySetting {
            category: "HARM_CATEGORY_SEXUALLY_EXPLICIT",
            threshold: SafetyThreshold::BlockMediumAndAbove,
        },
        SafetySetting { category: "HARM_CATEGORY_DANGEROUS_CONTENT", threshold: SafetyThreshold::BlockNone },
    ]
}

/// Stricter settings used when the model acts as a moderation classifier.
pub fn moderation_safety_settings() -> Vec<SafetySetting> {
    vec![
        SafetySetting { category: "HARM_CATEGORY_HARASSMENT", threshold: SafetyThreshold::BlockLowAndAbove },
        SafetySetting { category: "HARM_CATEGORY_HATE_SPEECH", threshold: SafetyThreshold::BlockLowAndAbove },
        SafetySetting {
            category: "HARM_CATEGORY_SEXUALLY_EXPLICIT",
            threshold: SafetyThreshold::BlockMediumAndAbove,
        },
        SafetySetting {
            category: "HARM_CATEGORY_DANGEROUS_CONTENT",
            threshold: SafetyThreshold::BlockMediumAndAbove,
        },
    ]
}

// -- Wire types --

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GeminiRequest<'a> {
    contents: Vec<Content<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system_instruction: Option<Content<'a>>,
    generation_config: GenerationConfig,
    safety_settings: &'a [SafetySetting],
}

#[derive(Serialize)]
struct Content<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    role: Option<&'static str>,
    parts: Vec<Part<'a>>,
}

#[derive(Serialize)]
struct Part<'a> {
    text: &'a str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    temperature: f32,
    max_output_tokens: u32,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    prompt_feedback: Option<PromptFeedback>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Candidate {
    content: Option<CandidateContent>,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<ResponsePart>,
}

#[derive(Debug, Deserialize)]
struct ResponsePart {
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PromptFeedback {
    block_reason: Option<String>,
}

// -- Provider --

/// Google Gemini `generateContent` client.
pub struct GeminiProvider {
    client: Client,
    api_key: String,
    base_url: String,
    default_model: String,
    safety_settings: Vec<SafetySetting>,
}

impl GeminiProvider {
    /// Fails with [`LlmError::UnknownModel`] if `default_model` is not in the
    /// alias table, so misconfiguration surfaces at startup.
    pub fn new(api_key: impl Into<String>, default_model: impl Into<String>) -> Result<Self, LlmError> {
        let default_model = default_model.into();
        resolve_model(&default_model)?;

        let api_key = api_key.into();
        if api_key.trim().is_empty() {
            return Err(LlmError::Configuration("GEMINI_API_KEY is empty".into()));
        }

        Ok(Self {
            client: build_client(Duration::from_secs(30))?,
            api_key,
            base_url: DEFAULT_GEMINI_BASE_URL.to_string(),
            default_model,
            safety_settings: chat_safety_settings(),
        })
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Result<Self, LlmError> {
        self.client = build_client(timeout)?;
        Ok(self)
    }

    pub fn with_safety_settings(mut self, settings: Vec<SafetySetting>) -> Self {
        self.safety_settings = settings;
        self
    }
}

pub(crate) fn build_client(timeout: Duration) -> Result<Client, LlmError> {
    Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|e| LlmError::Configuration(format!("failed to build HTTP client: {}", e)))
}

pub(crate) fn retry_after_header(headers: &reqwest::header::HeaderMap) -> Option<u64> {
    headers
        .get(reqwest::header::RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse().ok())
}

#[async_trait]
impl LlmProvider for GeminiProvider {
    fn name(&self) -> &str {
        "gemini"
    }

    async fn generate(&self, request: &GenerateRequest) -> Result<String, LlmError> {
        let model = request.model.as_deref().unwrap_or(&self.default_model);
        let url = gemini_endpoint(&self.base_url, model)?;

        let body = GeminiRequest {
            contents: vec![Content {
                role: Some("user"),
                parts: vec![Part { text: &request.prompt }],
            }],
            system_instruction: request.system.as_deref().map(|text| Content {
                role: None,
                parts: vec![Part { text }],
            }),
            generation_config: GenerationConfig {
                temperature: request.temperature,
                max_output_tokens: request.max_output_tokens,
            },
            safety_settings: &self.safety_settings,
        };

        debug!(model, "Sending Gemini request");

        let response = self
            .client
            .post(&url)
            .query(&[("key", self.api_key.as_str())])
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let retry_after = retry_after_header(response.headers());
            let detail = response.text().await.unwrap_or_default();
            error!(status = status.as_u16(), model, "Gemini API error");
            return Err(LlmError::from_status(status.as_u16(), retry_after, &truncate(&detail, 200)));
        }

        let parsed: GeminiResponse = response.json().await?;

        if let Some(reason) = parsed.prompt_feedback.and_then(|f| f.block_reason) {
            warn!(model, reason = %reason, "Gemini blocked the prompt");
            return Err(LlmError::ContentFiltered(reason));
        }

        let candidate = parsed
            .candidates
            .into_iter()
            .next()
            .ok_or_else(|| LlmError::InvalidResponse("no candidates in Gemini response".into()))?;

        if candidate.finish_reason.as_deref() == Some("SAFETY") {
            return Err(LlmError::ContentFiltered("candidate stopped for safety".into()));
        }

        let text: String = candidate
            .content
            .map(|c| c.parts.into_iter().filter_map(|p| p.text).collect())
            .unwrap_or_default();

        let text = text.trim();
        if text.is_empty() {
            return Err(LlmError::InvalidResponse("empty text in Gemini response".into()));
        }
        Ok(text.to_string())
    }
}

pub(crate) fn truncate(text: &str, max_chars: usize) -> String {
    text.chars().take(max_chars).collect()
}
