use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, error};

use crate::error::LlmError;
use crate::gemini::{build_client, retry_after_header, truncate};
use crate::provider::{GenerateRequest, LlmProvider};

pub const DEFAULT_CLAUDE_BASE_URL: &str = "https://api.anthropic.com/v1";
pub const DEFAULT_CLAUDE_MODEL: &str = "claude-sonnet-4-5";
const ANTHROPIC_VERSION: &str = "2023-06-01";

#[derive(Serialize)]
struct MessagesRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<&'a str>,
    messages: Vec<Message<'a>>,
}

#[derive(Serialize)]
struct Message<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Deserialize)]
struct MessagesResponse {
    #[serde(default)]
    content: Vec<ContentBlock>,
}

#[derive(Deserialize)]
struct ContentBlock {
    #[serde(rename = "type")]
    kind: String,
    text: Option<String>,
}

/// Anthropic Messages API client, used for structured risk analysis.
pub struct ClaudeProvider {
    client: Client,
    api_key: String,
    base_url: String,
    model: String,
}

impl ClaudeProvider {
    pub fn new(api_key: impl Into<String>, model: impl Into<String>) -> Result<Self, LlmError> {
        let api_key = api_key.into();
        if api_key.trim().is_empty() {
            return Err(LlmError::Configuration("CLAUDE_API_KEY is empty".into()));
        }
        Ok(Self {
            client: build_client(Duration::from_secs(30))?,
            api_key,
            base_url: DEFAULT_CLAUDE_BASE_URL.to_string(),
            model: model.into(),
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
}

#[async_trait]
impl LlmProvider for ClaudeProvider {
    fn name(&self) -> &str {
        "claude"
    }

    async fn generate(&self, request: &GenerateRequest) -> Result<String, LlmError> {
        let model = request.model.as_deref().unwrap_or(&self.model);
        let url = format!("{}/messages", self.base_url.trim_end_matches('/'));

        let body = MessagesRequest {
            model,
            max_tokens: request.max_output_tokens,
            temperature: request.temperature,
            system: request.system.as_deref(),
            messages: vec![Message { role: "user", content: &request.prompt }],
        };

        debug!(model, "Sending Claude request");

        let response = self
            .client
            .post(&url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let retry_after = retry_after_header(response.headers());
            let detail = response.text().await.unwrap_or_default();
            error!(status = status.as_u16(), model, "Claude API error");
            return Err(LlmError::from_status(status.as_u16(), retry_after, &truncate(&detail, 200)));
        }

        let parsed: MessagesResponse = response.json().await?;
        parsed
            .content
            .into_iter()
            .find(|block| block.kind == "text")
            .and_then(|block| block.text)
            .filter(|text| !text.trim().is_empty())
            .ok_or_else(|| LlmError::InvalidResponse("no text block in Claude response".into()))
    }
}
