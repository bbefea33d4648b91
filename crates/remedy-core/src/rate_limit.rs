//! Adaptive rate limiter shared by every remote-call path.
//!
//! Two pacing layers combine on each [`RateLimiter::acquire`]:
//!
//! - soft pacing: at most `max_requests` calls in any rolling `window`, plus a
//!   minimum spacing between consecutive calls with a small random jitter;
//! - hard pacing: while `consecutive_failures > 0`, an extra delay of
//!   `consecutive_failures × failure_penalty` (capped at `max_penalty`), and a
//!   forced cooldown after an explicit throttling signal.
//!
//! The rolling window is kept as a log of the last `max_requests` call
//! instants. A new call is admitted once the oldest logged call is at least
//! `window` old, which bounds any `window`-long interval to `max_requests`
//! calls regardless of where the interval starts.
//!
//! All waits use `tokio::time`, so tests drive the limiter with a paused clock.

use std::collections::VecDeque;
use std::time::Duration;

use rand::Rng;
use tokio::sync::Mutex;
use tokio::time::{sleep_until, Instant};

// ---------------------------------------------------------------------------
// RateLimitPolicy
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub struct RateLimitPolicy {
    /// Ceiling on calls admitted within any `window`.
    pub max_requests: u32,
    pub window: Duration,
    /// Baseline gap between consecutive calls.
    pub min_interval: Duration,
    /// Upper bound of the random delay added to the baseline gap.
    pub jitter: Duration,
    /// Extra delay per consecutive failure.
    pub failure_penalty: Duration,
    /// Cap on the failure-driven extra delay.
    pub max_penalty: Duration,
    /// Minimum cooldown after an explicit throttling signal.
    pub throttle_cooldown: Duration,
    /// Upper bound of the random delay added to the throttle cooldown.
    pub throttle_jitter: Duration,
}

impl RateLimitPolicy {
    /// Penalty applied for `consecutive_failures` failures in a row.
    pub fn penalty_for(&self, consecutive_failures: u32) -> Duration {
        self.failure_penalty
            .saturating_mul(consecutive_failures)
            .min(self.max_penalty)
    }

    /// A policy with no pacing at all except the ceiling. Useful for tests
    /// that only care about call accounting.
    pub fn unpaced(max_requests: u32, window: Duration) -> Self {
        Self {
            max_requests,
            window,
            min_interval: Duration::ZERO,
            jitter: Duration::ZERO,
            failure_penalty: Duration::ZERO,
            max_penalty: Duration::ZERO,
            throttle_cooldown: Duration::ZERO,
            throttle_jitter: Duration::ZERO,
        }
    }
}

// ---------------------------------------------------------------------------
// LimiterStats
// ---------------------------------------------------------------------------

/// Counters exposed for run summaries.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LimiterStats {
    pub requests_made: u64,
    pub throttled: u64,
    pub consecutive_failures: u32,
}

impl LimiterStats {
    /// Counter growth between an earlier snapshot and this one.
    pub fn since(&self, earlier: &LimiterStats) -> LimiterStats {
        LimiterStats {
            requests_made: self.requests_made.saturating_sub(earlier.requests_made),
            throttled: self.throttled.saturating_sub(earlier.throttled),
            consecutive_failures: self.consecutive_failures,
        }
    }
}

// ---------------------------------------------------------------------------
// RateLimiter
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
struct LimiterState {
    /// Instants of the most recent admitted calls, oldest first. Never longer
    /// than `max_requests`.
    recent: VecDeque<Instant>,
    last_call: Option<Instant>,
    cooldown_until: Option<Instant>,
    consecutive_failures: u32,
    requests_made: u64,
    throttled: u64,
}

/// Paces outbound calls. Share one instance (behind an `Arc`) across every
/// caller that talks to the same remote service.
#[derive(Debug)]
pub struct RateLimiter {
    policy: RateLimitPolicy,
    state: Mutex<LimiterState>,
}

impl RateLimiter {
    pub fn new(policy: RateLimitPolicy) -> Self {
        Self {
            policy,
            state: Mutex::new(LimiterState::default()),
        }
    }

    pub fn policy(&self) -> &RateLimitPolicy {
        &self.policy
    }

    /// Suspend until one call is permitted, then account for it.
    ///
    /// Must be called immediately before every remote call, retries included.
    /// The state lock is held across the wait, so concurrent callers are
    /// admitted one at a time in arrival order.
    pub async fn acquire(&self) {
        let mut st = self.state.lock().await;
        let now = Instant::now();
        let mut ready = now;

        if let Some(until) = st.cooldown_until {
            ready = ready.max(until);
        }
        if let Some(last) = st.last_call {
            ready = ready.max(last + self.policy.min_interval + random_up_to(self.policy.jitter));
        }
        let max = self.policy.max_requests.max(1) as usize;
        if st.recent.len() >= max {
            let oldest = st.recent[st.recent.len() - max];
            let window_open = oldest + self.policy.window;
            if window_open > ready {
                tracing::debug!(
                    wait_ms = (window_open - now).as_millis() as u64,
                    "request ceiling reached, waiting for window"
                );
                ready = window_open + random_up_to(self.policy.jitter);
            }
        }
        ready += self.policy.penalty_for(st.consecutive_failures);

        if ready > now {
            sleep_until(ready).await;
        }

        let at = Instant::now();
        st.recent.push_back(at);
        while st.recent.len() > max {
            st.recent.pop_front();
        }
        st.last_call = Some(at);
        st.requests_made += 1;
    }

    /// Record an explicit throttling signal and sit out the cooldown.
    ///
    /// The cooldown is `max(throttle_cooldown, retry_after)` plus jitter. It
    /// also gates every later `acquire`, so other callers back off too.
    pub async fn on_throttled(&self, retry_after: Option<Duration>) {
        let until = self.record_throttle(retry_after).await;
        sleep_until(until).await;
    }

    /// Record a throttling signal and arm the cooldown without waiting it out.
    /// Returns the instant the cooldown ends.
    pub async fn record_throttle(&self, retry_after: Option<Duration>) -> Instant {
        let mut st = self.state.lock().await;
        st.throttled += 1;
        st.consecutive_failures = st.consecutive_failures.saturating_add(1);
        let cooldown = self
            .policy
            .throttle_cooldown
            .max(retry_after.unwrap_or_default())
            + random_up_to(self.policy.throttle_jitter);
        let until = Instant::now() + cooldown;
        let until = st.cooldown_until.map_or(until, |u| u.max(until));
        st.cooldown_until = Some(until);
        tracing::warn!(
            throttled_total = st.throttled,
            cooldown_ms = cooldown.as_millis() as u64,
            "throttled by server, cooling down"
        );
        until
    }

    /// Record a transient failure (timeout, connection error, 5xx).
    pub async fn on_failure(&self) {
        let mut st = self.state.lock().await;
        st.consecutive_failures = st.consecutive_failures.saturating_add(1);
    }

    /// Record a successful call. Decays the failure counter by one.
    pub async fn on_success(&self) {
        let mut st = self.state.lock().await;
        st.consecutive_failures = st.consecutive_failures.saturating_sub(1);
    }

    pub async fn stats(&self) -> LimiterStats {
        let st = self.state.lock().await;
        LimiterStats {
            requests_made: st.requests_made,
            throttled: st.throttled,
            consecutive_failures: st.consecutive_failures,
        }
    }
}

/// Uniform random delay in `0..=max`, at millisecond resolution.
pub(crate) fn random_up_to(max: Duration) -> Duration {
    if max.is_zero() {
        return Duration::ZERO;
    }
    let ms = rand::thread_rng().gen_range(0..=max.as_millis() as u64);
    Duration::from_millis(ms)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
