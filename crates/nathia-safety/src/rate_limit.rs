//! Sliding-window rate limiting over persisted request events.
//!
//! Every admitted request appends one timestamped row; the current count is
//! always derived by counting rows inside the trailing window. There is no
//! mutable counter to drift or reset.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Days, Utc};
use tracing::{debug, error, info, warn};

use nathia_db::{Database, UserScope};
use nathia_types::models::SubscriptionTier;

use crate::error::SafetyError;

pub const CHAT_ENDPOINT: &str = "chat";
pub const DAILY_PLAN_ENDPOINT: &str = "daily-plan";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowLimit {
    pub max: u32,
    pub window: Duration,
}

impl WindowLimit {
    pub fn new(max: u32, window: Duration) -> Self {
        Self { max, window }
    }

    fn window_ms(&self) -> i64 {
        i64::try_from(self.window.as_millis()).unwrap_or(i64::MAX)
    }
}

/// What to do when the event store cannot be consulted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FailurePolicy {
    /// Admit the request and report the full allowance.
    Open,
    /// Deny the request with nothing remaining.
    #[default]
    Closed,
}

#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    limits: HashMap<String, WindowLimit>,
    pub failure_policy: FailurePolicy,
    /// Chat turns per UTC day for free-tier users.
    pub free_daily_quota: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        let mut limits = HashMap::new();
        limits.insert(CHAT_ENDPOINT.to_string(), WindowLimit::new(60, Duration::from_secs(60)));
        limits.insert(DAILY_PLAN_ENDPOINT.to_string(), WindowLimit::new(5, Duration::from_secs(3600)));
        Self {
            limits,
            failure_policy: FailurePolicy::Closed,
            free_daily_quota: 30,
        }
    }
}

impl RateLimitConfig {
    pub fn with_limit(mut self, endpoint: impl Into<String>, limit: WindowLimit) -> Self {
        self.limits.insert(endpoint.into(), limit);
        self
    }

    pub fn with_failure_policy(mut self, policy: FailurePolicy) -> Self {
        self.failure_policy = policy;
        self
    }

    pub fn with_free_daily_quota(mut self, quota: u32) -> Self {
        self.free_daily_quota = quota;
        self
    }

    pub fn limit_for(&self, endpoint: &str) -> Option<WindowLimit> {
        self.limits.get(endpoint).copied()
    }

    /// Events older than this can never be counted again.
    pub fn longest_window(&self) -> Duration {
        self.limits.values().map(|l| l.window).max().unwrap_or(Duration::from_secs(3600))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitDecision {
    pub allowed: bool,
    pub remaining: u32,
    pub reset_at: DateTime<Utc>,
}

impl RateLimitDecision {
    fn denied(reset_at: DateTime<Utc>) -> Self {
        Self { allowed: false, remaining: 0, reset_at }
    }
}

#[derive(Clone)]
pub struct RateLimiter {
    config: Arc<RateLimitConfig>,
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        Self { config: Arc::new(config) }
    }

    pub fn config(&self) -> &RateLimitConfig {
        &self.config
    }

    /// Count the caller's events for `endpoint` inside the trailing window and
    /// record this request if it fits. Denied requests leave no event behind.
    pub async fn check(&self, scope: &UserScope, endpoint: &str, now: DateTime<Utc>) -> RateLimitDecision {
        let Some(limit) = self.config.limit_for(endpoint) else {
            error!(user_id = scope.user_id(), endpoint, "Rate limit check for unconfigured endpoint, denying");
            return RateLimitDecision::denied(now);
        };

        let fallback_reset = now + limit.window;
        match self.count_and_record(scope, endpoint, limit, now).await {
            Ok(decision) => {
                debug!(
                    user_id = scope.user_id(),
                    endpoint,
                    allowed = decision.allowed,
                    remaining = decision.remaining,
                    "Rate limit checked"
                );
                decision
            }
            Err(e) => self.on_failure(scope, endpoint, limit.max, fallback_reset, &e),
        }
    }

    async fn count_and_record(
        &self,
        scope: &UserScope,
        endpoint: &str,
        limit: WindowLimit,
        now: DateTime<Utc>,
    ) -> Result<RateLimitDecision, SafetyError> {
        let scope = scope.clone();
        let endpoint = endpoint.to_string();
        let now_ms = now.timestamp_millis();
        let window_ms = limit.window_ms();

        let counted = tokio::task::spawn_blocking(move || {
            scope.record_event_within_limit(&endpoint, now_ms, window_ms, limit.max)
        })
        .await??;

        let reset_at = counted
            .oldest_ms
            .and_then(|oldest| DateTime::from_timestamp_millis(oldest.saturating_add(window_ms)))
            .unwrap_or(now + limit.window);

        if counted.admitted {
            Ok(RateLimitDecision {
                allowed: true,
                remaining: limit.max.saturating_sub(counted.in_window).saturating_sub(1),
                reset_at,
            })
        } else {
            Ok(RateLimitDecision::denied(reset_at))
        }
    }

    /// Per-day turn quota derived from the caller's subscription tier. Reads
    /// only; it records nothing.
    pub async fn check_daily_quota(&self, scope: &UserScope, now: DateTime<Utc>) -> RateLimitDecision {
        let next_midnight = next_utc_midnight(now);
        let free_quota = self.config.free_daily_quota;

        let scope_for_task = scope.clone();
        let since_ms = start_of_utc_day(now).timestamp_millis();
        let lookup = tokio::task::spawn_blocking(move || -> anyhow::Result<(SubscriptionTier, u32)> {
            let tier = scope_for_task.profile()?.map(|p| p.subscription_tier).unwrap_or_default();
            let used = scope_for_task.count_messages_since(since_ms)?;
            Ok((tier, used))
        })
        .await
        .map_err(SafetyError::from)
        .and_then(|r| r.map_err(SafetyError::from));

        match lookup {
            Ok((tier, used)) => match tier.daily_quota(free_quota) {
                None => RateLimitDecision { allowed: true, remaining: u32::MAX, reset_at: next_midnight },
                Some(quota) if used < quota => RateLimitDecision {
                    allowed: true,
                    remaining: quota - used - 1,
                    reset_at: next_midnight,
                },
                Some(quota) => {
                    info!(user_id = scope.user_id(), tier = %tier, quota, "Daily quota exhausted");
                    RateLimitDecision::denied(next_midnight)
                }
            },
            Err(e) => self.on_failure(scope, "daily-quota", free_quota, next_midnight, &e),
        }
    }

    fn on_failure(
        &self,
        scope: &UserScope,
        endpoint: &str,
        max: u32,
        reset_at: DateTime<Utc>,
        err: &SafetyError,
    ) -> RateLimitDecision {
        match self.config.failure_policy {
            FailurePolicy::Closed => {
                error!(user_id = scope.user_id(), endpoint, error = %err, "Rate limiter unavailable, failing closed");
                RateLimitDecision::denied(reset_at)
            }
            FailurePolicy::Open => {
                warn!(user_id = scope.user_id(), endpoint, error = %err, "Rate limiter unavailable, failing open");
                RateLimitDecision { allowed: true, remaining: max, reset_at }
            }
        }
    }
}

fn start_of_utc_day(now: DateTime<Utc>) -> DateTime<Utc> {
    now.date_naive().and_hms_opt(0, 0, 0).map(|t| t.and_utc()).unwrap_or(now)
}

fn next_utc_midnight(now: DateTime<Utc>) -> DateTime<Utc> {
    let start = start_of_utc_day(now);
    start.checked_add_days(Days::new(1)).unwrap_or(start)
}

/// Background task that deletes rate-limit events no window can count again.
pub async fn run_prune_loop(db: Arc<Database>, retention: Duration, interval: Duration) {
    let mut interval = tokio::time::interval(interval);

    loop {
        interval.tick().await;

        match prune_expired(&db, Utc::now(), retention).await {
            Ok(count) => {
                if count > 0 {
                    info!("Prune: removed {} expired rate-limit events", count);
                }
            }
            Err(e) => {
                warn!("Prune error: {}", e);
            }
        }
    }
}

pub async fn prune_expired(db: &Arc<Database>, now: DateTime<Utc>, retention: Duration) -> Result<usize, SafetyError> {
    let retention_ms = i64::try_from(retention.as_millis()).unwrap_or(i64::MAX);
    let cutoff_ms = now.timestamp_millis().saturating_sub(retention_ms);
    let db = Arc::clone(db);
    let removed = tokio::task::spawn_blocking(move || db.prune_rate_events(cutoff_ms)).await??;
    Ok(removed)
}
