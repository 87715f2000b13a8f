use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result, bail};

use nathia_llm::models::DEFAULT_GEMINI_BASE_URL;
use nathia_llm::resolve_model;

/// Known placeholder values that must never be used as the JWT secret.
const PLACEHOLDER_SECRETS: &[&str] = &[
    "",
    "changeme",
    "change-me",
    "change-me-to-a-random-string",
    "dev-secret-change-me",
    "secret",
];

const DEFAULT_CLAUDE_MODEL: &str = nathia_llm::claude::DEFAULT_CLAUDE_MODEL;

#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub db_path: PathBuf,
    pub jwt_secret: String,
    pub gemini_api_key: String,
    pub gemini_api_url: String,
    pub chat_model: String,
    pub fallback_model: Option<String>,
    pub claude_api_key: Option<String>,
    pub claude_model: String,
    pub provider_timeout: Duration,
    pub llm_max_attempts: u32,
    pub rate_limit_max: u32,
    pub rate_limit_window: Duration,
    pub rate_limit_fail_open: bool,
    pub free_daily_quota: u32,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build the config from any key lookup. Unknown model names and
    /// placeholder secrets fail here, before anything starts.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let jwt_secret = get("NATHIA_JWT_SECRET").unwrap_or_default();
        if PLACEHOLDER_SECRETS.contains(&jwt_secret.as_str()) {
            bail!("NATHIA_JWT_SECRET is unset or still a placeholder");
        }

        let gemini_api_key = get("GEMINI_API_KEY").context("GEMINI_API_KEY must be set")?;

        let chat_model = get("NATHIA_CHAT_MODEL").unwrap_or_else(|| "gemini-2.5-flash".into());
        resolve_model(&chat_model).with_context(|| format!("NATHIA_CHAT_MODEL '{}'", chat_model))?;

        let fallback_model = match get("NATHIA_FALLBACK_MODEL") {
            Some(v) if v.eq_ignore_ascii_case("none") => None,
            Some(v) => Some(v),
            None => Some("gemini-2.0-flash-exp".into()),
        };
        if let Some(model) = &fallback_model {
            resolve_model(model).with_context(|| format!("NATHIA_FALLBACK_MODEL '{}'", model))?;
        }

        Ok(Self {
            host: get("NATHIA_HOST").unwrap_or_else(|| "0.0.0.0".into()),
            port: parse_or(&get, "NATHIA_PORT", 3000)?,
            db_path: get("NATHIA_DB_PATH").unwrap_or_else(|| "nathia.db".into()).into(),
            jwt_secret,
            gemini_api_key,
            gemini_api_url: get("GEMINI_API_URL").unwrap_or_else(|| DEFAULT_GEMINI_BASE_URL.into()),
            chat_model,
            fallback_model,
            claude_api_key: get("CLAUDE_API_KEY"),
            claude_model: get("CLAUDE_MODEL").unwrap_or_else(|| DEFAULT_CLAUDE_MODEL.into()),
            provider_timeout: Duration::from_secs(parse_or(&get, "NATHIA_PROVIDER_TIMEOUT_SECS", 30)?),
            llm_max_attempts: parse_or(&get, "NATHIA_LLM_MAX_ATTEMPTS", 3)?,
            rate_limit_max: parse_or(&get, "NATHIA_RATE_LIMIT_MAX", 60)?,
            rate_limit_window: Duration::from_secs(parse_or(&get, "NATHIA_RATE_LIMIT_WINDOW_SECS", 60)?),
            rate_limit_fail_open: parse_or(&get, "NATHIA_RATE_LIMIT_FAIL_OPEN", false)?,
            free_daily_quota: parse_or(&get, "NATHIA_FREE_DAILY_QUOTA", 30)?,
        })
    }
}

fn parse_or<T>(get: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match get(key) {
        Some(raw) => raw.parse().with_context(|| format!("invalid value for {}: '{}'", key, raw)),
        None => Ok(default),
    }
}
