//! LLM provider boundary for NathIA.
//!
//! One trait ([`LlmProvider`]) with two HTTP implementations (Gemini for
//! chat and moderation, Claude for risk analysis), a fixed model-alias table,
//! and a retry wrapper that applies bounded exponential backoff to transient
//! provider failures.

pub mod claude;
pub mod error;
pub mod gemini;
pub mod json;
pub mod models;
pub mod provider;
pub mod retry;

pub use claude::ClaudeProvider;
pub use error::LlmError;
pub use gemini::GeminiProvider;
pub use models::{gemini_endpoint, resolve_model};
pub use provider::{GenerateRequest, LlmProvider};
pub use retry::{RetryPolicy, RetryingProvider};
