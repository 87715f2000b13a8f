//! Pulling a JSON object out of free-form model output.

use std::sync::LazyLock;

use regex::Regex;
use serde::de::DeserializeOwned;

use crate::error::LlmError;

static OBJECT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)\{.*\}").expect("static regex")
});

/// Models wrap JSON in prose or code fences. Take the outermost `{...}` span.
pub fn extract_object(text: &str) -> Option<&str> {
    OBJECT_RE.find(text).map(|m| m.as_str())
}

pub fn parse_object<T: DeserializeOwned>(text: &str) -> Result<T, LlmError> {
    let raw = extract_object(text)
        .ok_or_else(|| LlmError::InvalidResponse("no JSON object in model output".into()))?;
    Ok(serde_json::from_str(raw)?)
}
