//! Bounded retries around a single remote call.
//!
//! [`RetryExecutor::execute`] acquires the shared [`RateLimiter`] before each
//! attempt and classifies the outcome:
//!
//! | outcome | action |
//! |---|---|
//! | success | `on_success`, return the value |
//! | permanent | return [`CallError::Permanent`] at once |
//! | transient | `on_failure`, sleep `min(base × 2^attempt, cap) + jitter`, retry |
//! | throttled | `on_throttled` (cooldown replaces the backoff sleep), retry |
//!
//! A throttle on the last attempt arms the cooldown without waiting it out;
//! the next `acquire` still honours it.
//!
//! After `max_attempts` retryable failures the call ends in
//! [`CallError::Exhausted`], which callers can tell apart from a rejection.
//! Every attempt is appended to an [`AttemptLog`] so sub-step history can be
//! persisted.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::api::RemoteError;
use crate::rate_limit::{random_up_to, RateLimiter};

// ---------------------------------------------------------------------------
// RetryPolicy
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Attempts per call, first attempt included. `0` is treated as `1`.
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// Upper bound of the random delay added to each backoff sleep.
    pub jitter: Duration,
}

impl RetryPolicy {
    /// Backoff before retrying after the failed 0-indexed `attempt`, without jitter.
    ///
    /// Non-decreasing in `attempt` and never above `max_delay`.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.min(31));
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }

    /// Worst-case time one call can spend sleeping in backoff.
    pub fn worst_case_backoff(&self, max_attempts: u32) -> Duration {
        (0..max_attempts.saturating_sub(1))
            .map(|a| self.backoff(a) + self.jitter)
            .sum()
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(2),
            max_delay: Duration::from_secs(60),
            jitter: Duration::from_secs(2),
        }
    }
}

// ---------------------------------------------------------------------------
// AttemptRecord / AttemptLog
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttemptOutcome {
    Success,
    Throttled,
    Transient,
    Permanent,
}

/// One remote-call attempt as persisted in sub-step history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttemptRecord {
    /// Label of the call, e.g. `fetch` or `set_price`.
    pub call: String,
    /// 1-indexed attempt number within the call.
    pub attempt: u32,
    pub outcome: AttemptOutcome,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    pub at: DateTime<Utc>,
}

/// Attempts made while executing one unit of work, in order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AttemptLog(Vec<AttemptRecord>);

impl AttemptLog {
    pub fn new() -> Self {
        Self::default()
    }

    fn push(&mut self, call: &str, attempt: u32, outcome: AttemptOutcome, detail: Option<String>) {
        self.0.push(AttemptRecord {
            call: call.to_string(),
            attempt,
            outcome,
            detail,
            at: Utc::now(),
        });
    }

    pub fn records(&self) -> &[AttemptRecord] {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn into_records(self) -> Vec<AttemptRecord> {
        self.0
    }
}

// ---------------------------------------------------------------------------
// CallError
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Error)]
pub enum CallError {
    #[error("rejected by server: {detail}")]
    Permanent { detail: String },

    #[error("gave up after {attempts} attempt(s): {last_error}")]
    Exhausted { attempts: u32, last_error: String },
}

// ---------------------------------------------------------------------------
// RetryExecutor
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct RetryExecutor {
    limiter: Arc<RateLimiter>,
    policy: RetryPolicy,
}

impl RetryExecutor {
    pub fn new(limiter: Arc<RateLimiter>, policy: RetryPolicy) -> Self {
        Self { limiter, policy }
    }

    pub fn limiter(&self) -> &Arc<RateLimiter> {
        &self.limiter
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Run `op` with the policy's default attempt budget.
    pub async fn run<T, F, Fut>(&self, call: &str, log: &mut AttemptLog, op: F) -> Result<T, CallError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, RemoteError>>,
    {
        self.execute(call, self.policy.max_attempts, log, op).await
    }

    /// Run `op` up to `max_attempts` times, pacing every attempt through the
    /// rate limiter.
    pub async fn execute<T, F, Fut>(
        &self,
        call: &str,
        max_attempts: u32,
        log: &mut AttemptLog,
        mut op: F,
    ) -> Result<T, CallError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, RemoteError>>,
    {
        let max_attempts = max_attempts.max(1);
        let mut last_error = String::new();

        for attempt in 0..max_attempts {
            self.limiter.acquire().await;
            let number = attempt + 1;

            match op().await {
                Ok(value) => {
                    self.limiter.on_success().await;
                    log.push(call, number, AttemptOutcome::Success, None);
                    if attempt > 0 {
                        tracing::info!(call, attempts = number, "call succeeded after retry");
                    }
                    return Ok(value);
                }
                Err(RemoteError::Permanent(detail)) => {
                    log.push(call, number, AttemptOutcome::Permanent, Some(detail.clone()));
                    tracing::warn!(call, attempt = number, error = %detail, "call rejected");
                    return Err(CallError::Permanent { detail });
                }
                Err(RemoteError::Throttled { retry_after }) => {
                    last_error = RemoteError::Throttled { retry_after }.to_string();
                    log.push(call, number, AttemptOutcome::Throttled, None);
                    if number < max_attempts {
                        self.limiter.on_throttled(retry_after).await;
                    } else {
                        self.limiter.record_throttle(retry_after).await;
                    }
                }
                Err(RemoteError::Transient(detail)) => {
                    log.push(call, number, AttemptOutcome::Transient, Some(detail.clone()));
                    self.limiter.on_failure().await;
                    if number < max_attempts {
                        let delay = self.policy.backoff(attempt) + random_up_to(self.policy.jitter);
                        tracing::warn!(
                            call,
                            attempt = number,
                            max_attempts,
                            delay_ms = delay.as_millis() as u64,
                            error = %detail,
                            "transient failure, backing off"
                        );
                        tokio::time::sleep(delay).await;
                    }
                    last_error = detail;
                }
            }
        }

        tracing::warn!(call, attempts = max_attempts, error = %last_error, "giving up");
        Err(CallError::Exhausted {
            attempts: max_attempts,
            last_error,
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
