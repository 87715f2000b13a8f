use crate::error::LlmError;

pub const DEFAULT_GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

/// Accepted model names and the API model each one is served by. Aliases
/// without the `-exp` suffix resolve to the same endpoint family.
const MODEL_REGISTRY: &[(&str, &str)] = &[
    ("gemini-2.5-flash", "gemini-2.5-flash-exp"),
    ("gemini-2.5-flash-exp", "gemini-2.5-flash-exp"),
    ("gemini-2.5-pro", "gemini-2.5-pro-exp"),
    ("gemini-2.5-pro-exp", "gemini-2.5-pro-exp"),
    ("gemini-2.0-flash-exp", "gemini-2.0-flash-exp"),
];

/// Map a configured model name to the API model name.
pub fn resolve_model(name: &str) -> Result<&'static str, LlmError> {
    MODEL_REGISTRY
        .iter()
        .find(|(alias, _)| *alias == name)
        .map(|(_, api_model)| *api_model)
        .ok_or_else(|| LlmError::UnknownModel(name.to_string()))
}

/// Full `generateContent` URL for a model under `base_url`.
pub fn gemini_endpoint(base_url: &str, name: &str) -> Result<String, LlmError> {
    let api_model = resolve_model(name)?;
    Ok(format!("{}/models/{}:generateContent", base_url.trim_end_matches('/'), api_model))
}

pub fn known_models() -> impl Iterator<Item = &'static str> {
    MODEL_REGISTRY.iter().map(|(alias, _)| *alias)
}
