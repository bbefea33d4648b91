//! Remediation actions: an ordered list of idempotent sub-steps.
//!
//! A sub-step works in two phases. [`SubStep::target`] computes what the
//! item should look like from the enumerated item, or reuses a target pinned
//! by an earlier run. [`SubStep::apply`] observes the current remote state
//! through a [`StepContext`] and writes only when the target is not met.
//!
//! The orchestrator persists the target between the two phases. Relative
//! operations ("promote the second image") would otherwise compute a new
//! target from state they already changed.

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

use crate::api::{RemoteApi, WorkItem};
use crate::retry::{AttemptLog, AttemptRecord, CallError, RetryExecutor};

// ---------------------------------------------------------------------------
// Outcomes
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub enum StepOutcome {
    /// A write was made.
    Applied { detail: String },
    /// Remote state already matched the target.
    AlreadySatisfied,
    /// Dry run: a write would have been made.
    WouldApply { detail: String },
}

impl StepOutcome {
    pub fn describe(&self) -> String {
        match self {
            Self::Applied { detail } => detail.clone(),
            Self::AlreadySatisfied => "already satisfied".to_string(),
            Self::WouldApply { detail } => format!("would apply: {detail}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum StepError {
    #[error("rejected: {0}")]
    Permanent(String),

    #[error("gave up after {attempts} attempt(s): {last_error}")]
    Exhausted { attempts: u32, last_error: String },

    /// The item's data does not allow the step to proceed.
    #[error("{0}")]
    Invalid(String),
}

impl From<CallError> for StepError {
    fn from(e: CallError) -> Self {
        match e {
            CallError::Permanent { detail } => Self::Permanent(detail),
            CallError::Exhausted {
                attempts,
                last_error,
            } => Self::Exhausted {
                attempts,
                last_error,
            },
        }
    }
}

// ---------------------------------------------------------------------------
// StepContext
// ---------------------------------------------------------------------------

/// Remote access for one sub-step invocation.
///
/// Every call goes through the retry executor and lands in the attempt log
/// the orchestrator persists as the sub-step's history.
pub struct StepContext<'a, A: RemoteApi> {
    api: &'a A,
    executor: &'a RetryExecutor,
    log: AttemptLog,
    dry_run: bool,
}

impl<'a, A: RemoteApi> StepContext<'a, A> {
    pub fn new(api: &'a A, executor: &'a RetryExecutor, dry_run: bool) -> Self {
        Self {
            api,
            executor,
            log: AttemptLog::new(),
            dry_run,
        }
    }

    pub fn dry_run(&self) -> bool {
        self.dry_run
    }

    /// Re-read the item's current remote state.
    pub async fn fetch(&mut self, item_id: &str) -> Result<WorkItem, StepError> {
        let api = self.api;
        let item = self
            .executor
            .run("fetch", &mut self.log, || api.fetch(item_id))
            .await?;
        Ok(item)
    }

    /// Perform one write. Refused in dry-run mode.
    pub async fn mutate(&mut self, call: &str, mutation: &A::Mutation) -> Result<Value, StepError> {
        if self.dry_run {
            return Err(StepError::Invalid(format!(
                "mutation '{call}' attempted during a dry run"
            )));
        }
        let api = self.api;
        let response = self
            .executor
            .run(call, &mut self.log, || api.perform_mutation(mutation))
            .await?;
        Ok(response)
    }

    pub fn attempts(&self) -> &[AttemptRecord] {
        self.log.records()
    }

    pub fn into_history(self) -> Vec<AttemptRecord> {
        self.log.into_records()
    }
}

// ---------------------------------------------------------------------------
// SubStep
// ---------------------------------------------------------------------------

#[async_trait]
pub trait SubStep<A: RemoteApi>: Send + Sync {
    /// Stable name, used as the key in the progress ledger.
    fn name(&self) -> &str;

    /// Target for `item`, or `None` when the step does not apply to it.
    ///
    /// `pinned` is the target persisted by an earlier run, if any. Steps whose
    /// target depends on state they change must return it unchanged.
    fn target(&self, item: &WorkItem, pinned: Option<&Value>) -> Result<Option<Value>, StepError>;

    /// Bring the remote record to `target`.
    async fn apply(
        &self,
        item: &WorkItem,
        target: &Value,
        cx: &mut StepContext<'_, A>,
    ) -> Result<StepOutcome, StepError>;
}

// ---------------------------------------------------------------------------
// RemediationAction
// ---------------------------------------------------------------------------

pub struct RemediationAction<A: RemoteApi> {
    name: String,
    steps: Vec<Box<dyn SubStep<A>>>,
}

impl<A: RemoteApi> RemediationAction<A> {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            steps: Vec::new(),
        }
    }

    pub fn step(mut self, step: impl SubStep<A> + 'static) -> Self {
        self.steps.push(Box::new(step));
        self
    }

    pub fn push(&mut self, step: Box<dyn SubStep<A>>) {
        self.steps.push(step);
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn steps(&self) -> &[Box<dyn SubStep<A>>] {
        &self.steps
    }

    pub fn step_names(&self) -> Vec<&str> {
        self.steps.iter().map(|s| s.name()).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fake::{FakeApi, SetField};
    use crate::rate_limit::{RateLimitPolicy, RateLimiter};
    use crate::retry::{AttemptOutcome, RetryPolicy};
    use std::sync::Arc;
    use std::time::Duration;

    fn executor() -> RetryExecutor {
        let limiter = Arc::new(RateLimiter::new(RateLimitPolicy::unpaced(
            100,
            Duration::from_secs(60),
        )));
        RetryExecutor::new(limiter, RetryPolicy::default())
    }

    #[test]
    fn call_error_maps_onto_step_error() {
        let e: StepError = CallError::Exhausted {
            attempts: 3,
            last_error: "503".into(),
        }
        .into();
        assert_eq!(e.to_string(), "gave up after 3 attempt(s): 503");
    }

    #[test]
    fn builder_keeps_step_order() {
        let action = RemediationAction::<FakeApi>::new("demo")
            .step(SetField::new("a", 1))
            .step(SetField::new("b", 2));
        assert_eq!(action.step_names(), vec!["set-a", "set-b"]);
        assert_eq!(action.name(), "demo");
    }

    #[tokio::test(start_paused = true)]
    async fn context_logs_every_call() {
        let api = FakeApi::with_items(1);
        let exec = executor();
        let mut cx = StepContext::new(&api, &exec, false);
        let item = cx.fetch("1").await.unwrap();
        assert_eq!(item.id, "1");
        let step = SetField::new("a", 5);
        let outcome = step.apply(&item, &serde_json::json!(5), &mut cx).await.unwrap();
        assert!(matches!(outcome, StepOutcome::Applied { .. }));

        let calls: Vec<_> = cx.attempts().iter().map(|a| a.call.as_str()).collect();
        assert_eq!(calls, vec!["fetch", "fetch", "set_field"]);
        assert!(cx
            .attempts()
            .iter()
            .all(|a| a.outcome == AttemptOutcome::Success));
    }

    #[tokio::test(start_paused = true)]
    async fn dry_run_refuses_mutations() {
        let api = FakeApi::with_items(1);
        let exec = executor();
        let mut cx = StepContext::new(&api, &exec, true);
        let item = cx.fetch("1").await.unwrap();
        let outcome = SetField::new("a", 5)
            .apply(&item, &serde_json::json!(5), &mut cx)
            .await
            .unwrap();
        assert!(matches!(outcome, StepOutcome::WouldApply { .. }));
        assert_eq!(api.mutation_calls(), 0);
    }
}
