//! Safety checks that run before a reply is generated: rate limiting,
//! moderation, risk classification and the fixed replies used when
//! generation is bypassed.

pub mod error;
pub mod moderation;
pub mod rate_limit;
pub mod risk;
pub mod templates;
pub mod text;

pub use error::SafetyError;
pub use moderation::Moderator;
pub use rate_limit::{FailurePolicy, RateLimitConfig, RateLimitDecision, RateLimiter, WindowLimit};
pub use risk::RiskClassifier;
