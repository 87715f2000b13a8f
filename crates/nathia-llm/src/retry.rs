use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::sleep;
use tracing::{debug, warn};

use crate::error::LlmError;
use crate::provider::{GenerateRequest, LlmProvider};

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts including the first one.
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(1000),
            max_backoff: Duration::from_secs(10),
        }
    }
}

impl RetryPolicy {
    /// Delay before the attempt after `attempt` (1-based). A provider-supplied
    /// retry-after wins over the computed backoff, both capped by `max_backoff`.
    pub fn backoff(&self, attempt: u32, err: &LlmError) -> Duration {
        let computed = self
            .initial_backoff
            .saturating_mul(2u32.saturating_pow(attempt.saturating_sub(1)));
        err.retry_after().unwrap_or(computed).min(self.max_backoff)
    }
}

/// Wraps a provider with bounded retries. After the first failed attempt the
/// remaining attempts go to `fallback_model`, when one is set.
pub struct RetryingProvider {
    inner: Arc<dyn LlmProvider>,
    policy: RetryPolicy,
    fallback_model: Option<String>,
}

impl RetryingProvider {
    pub fn new(inner: Arc<dyn LlmProvider>, policy: RetryPolicy) -> Self {
        Self { inner, policy, fallback_model: None }
    }

    pub fn with_fallback_model(mut self, model: impl Into<String>) -> Self {
        self.fallback_model = Some(model.into());
        self
    }
}

#[async_trait]
impl LlmProvider for RetryingProvider {
    fn name(&self) -> &str {
        self.inner.name()
    }

    async fn generate(&self, request: &GenerateRequest) -> Result<String, LlmError> {
        let max_attempts = self.policy.max_attempts.max(1);
        let mut current = request.clone();
        let mut attempt = 1;

        loop {
            match self.inner.generate(&current).await {
                Ok(text) => {
                    if attempt > 1 {
                        debug!(provider = self.inner.name(), attempt, "Provider call recovered");
                    }
                    return Ok(text);
                }
                Err(err) if err.is_retryable() && attempt < max_attempts => {
                    let delay = self.policy.backoff(attempt, &err);
                    warn!(
                        provider = self.inner.name(),
                        attempt,
                        max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "Provider call failed, retrying"
                    );
                    if attempt == 1 {
                        if let Some(fallback) = &self.fallback_model {
                            current.model = Some(fallback.clone());
                        }
                    }
                    sleep(delay).await;
                    attempt += 1;
                }
                Err(err) => {
                    warn!(provider = self.inner.name(), attempt, error = %err, "Provider call failed");
                    return Err(err);
                }
            }
        }
    }
}
