//! The batch run.
//!
//! One run enumerates every item, drops the ones the ledger already marks
//! succeeded, and walks the rest one at a time through the action's
//! sub-steps. Per item:
//!
//! ```text
//! NotStarted ──begin_item──▶ InProgress ──finalize_item──▶ Succeeded
//!                                                        ├▶ PartiallyFailed
//!                                                        └▶ Failed
//! ```
//!
//! Each sub-step outcome is written to the ledger as soon as it is known.
//! Failures and panics inside one item are recorded and the batch moves on.
//! Only enumeration failures and ledger I/O errors abort a run.
//!
//! Cancellation is checked between items and between sub-steps. The sub-step
//! in flight always finishes and is recorded first.

mod summary;

pub use summary::{ItemFailure, RunSummary};

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::action::{RemediationAction, StepContext, StepOutcome, SubStep};
use crate::api::{RemoteApi, WorkItem};
use crate::error::Result;
use crate::progress::{ItemStatus, ProgressStore, ResetScope, StepStatus, SubStepResult};
use crate::retry::{AttemptRecord, RetryExecutor};
use crate::source::WorkSource;

/// Result of one item within a run.
struct ItemResult {
    status: ItemStatus,
    error: Option<String>,
}

pub struct Orchestrator<A: RemoteApi, S: ProgressStore> {
    api: Arc<A>,
    executor: Arc<RetryExecutor>,
    action: RemediationAction<A>,
    store: S,
    page_max_attempts: u32,
    dry_run: bool,
    cancel: CancellationToken,
}

impl<A: RemoteApi, S: ProgressStore> Orchestrator<A, S> {
    pub fn new(
        api: Arc<A>,
        executor: Arc<RetryExecutor>,
        action: RemediationAction<A>,
        store: S,
    ) -> Self {
        let page_max_attempts = executor.policy().max_attempts;
        Self {
            api,
            executor,
            action,
            store,
            page_max_attempts,
            dry_run: false,
            cancel: CancellationToken::new(),
        }
    }

    /// Attempts per listing page. Defaults to the per-call attempt count.
    pub fn page_max_attempts(mut self, attempts: u32) -> Self {
        self.page_max_attempts = attempts;
        self
    }

    /// Preview mode: no mutations, no ledger writes.
    pub fn dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn into_store(self) -> S {
        self.store
    }

    pub fn reset(&mut self, scope: &ResetScope) -> Result<usize> {
        self.store.reset(scope)
    }

    /// Run the action over every item matching `filter`.
    ///
    /// `item_limit` caps how many not-yet-done items this run processes;
    /// enumeration always covers the full listing. Returns `Err` only for
    /// fatal conditions.
    pub async fn run(&mut self, filter: &A::Filter, item_limit: Option<usize>) -> Result<RunSummary> {
        let run_id = Uuid::new_v4().to_string();
        self.store.load()?;
        let before = self.executor.limiter().stats().await;

        let source = WorkSource::new(
            Arc::clone(&self.api),
            Arc::clone(&self.executor),
            self.page_max_attempts,
        );
        let items = source.enumerate(filter).await?;

        let mut summary = RunSummary {
            run_id: run_id.clone(),
            items_total: items.len(),
            dry_run: self.dry_run,
            ..RunSummary::default()
        };
        let (done, pending): (Vec<_>, Vec<_>) = items
            .into_iter()
            .partition(|item| self.store.is_item_done(&item.id));
        summary.already_done = done.len();

        tracing::info!(
            run_id = %run_id,
            action = self.action.name(),
            scope = self.store.scope(),
            total = summary.items_total,
            already_done = summary.already_done,
            pending = pending.len(),
            dry_run = self.dry_run,
            "run started"
        );

        let limit = item_limit.unwrap_or(usize::MAX);
        let pending_count = pending.len();
        for (index, item) in pending.into_iter().enumerate() {
            if index >= limit {
                tracing::info!(limit, "item limit reached");
                summary.not_started += pending_count - index;
                break;
            }
            if self.cancel.is_cancelled() {
                summary.cancelled = true;
                summary.not_started += pending_count - index;
                break;
            }

            let result = self.process_item(&item).await?;
            summary.count(result.status);
            match result.status {
                ItemStatus::Pending => summary.cancelled = true,
                ItemStatus::Succeeded => {}
                status => summary.failures.push(ItemFailure {
                    item_id: item.id.clone(),
                    display_name: item.display_name.clone(),
                    status,
                    error: result.error.unwrap_or_default(),
                }),
            }
        }

        let delta = self.executor.limiter().stats().await.since(&before);
        summary.remote_requests_made = delta.requests_made;
        summary.throttled_count = delta.throttled;

        tracing::info!(
            run_id = %run_id,
            succeeded = summary.succeeded,
            partially_failed = summary.partially_failed,
            failed = summary.failed,
            not_started = summary.not_started,
            requests = summary.remote_requests_made,
            throttled = summary.throttled_count,
            cancelled = summary.cancelled,
            "run finished"
        );
        Ok(summary)
    }

    async fn process_item(&mut self, item: &WorkItem) -> Result<ItemResult> {
        if !self.dry_run {
            self.store.begin_item(&item.id, &item.display_name)?;
        }

        let mut statuses = Vec::with_capacity(self.action.steps().len());
        let mut errors = Vec::new();

        for (index, step) in self.action.steps().iter().enumerate() {
            if index > 0 && self.cancel.is_cancelled() {
                tracing::info!(item = %item.id, "cancelled mid-item, leaving it pending");
                return Ok(ItemResult {
                    status: ItemStatus::Pending,
                    error: None,
                });
            }

            let name = step.name();
            let record = self.store.record(&item.id);
            if record.is_some_and(|r| r.step_succeeded(name)) {
                tracing::debug!(item = %item.id, step = name, "sub-step already succeeded");
                statuses.push(StepStatus::Succeeded);
                continue;
            }
            let pinned = record.and_then(|r| r.pinned_targets.get(name)).cloned();

            let (outcome, history) = match compute_target(&**step, item, pinned.as_ref()) {
                Err(error) => (Err(error), Vec::new()),
                Ok(None) => (Ok("not applicable".to_string()), Vec::new()),
                Ok(Some(target)) => {
                    if !self.dry_run && pinned.as_ref() != Some(&target) {
                        self.store.pin_target(&item.id, name, target.clone())?;
                    }
                    let (result, history) =
                        apply_step(&*self.api, &self.executor, self.dry_run, &**step, item, &target)
                            .await;
                    (result.map(|o| o.describe()), history)
                }
            };

            let result = match outcome {
                Ok(detail) => {
                    tracing::info!(item = %item.id, step = name, %detail, "sub-step succeeded");
                    SubStepResult::succeeded(detail, history)
                }
                Err(error) => {
                    tracing::warn!(item = %item.id, step = name, %error, "sub-step failed");
                    errors.push(format!("{name}: {error}"));
                    SubStepResult::failed(error, history)
                }
            };
            statuses.push(result.status);
            if !self.dry_run {
                self.store.record_sub_step(&item.id, name, result)?;
            }
        }

        let status = ItemStatus::from_outcomes(statuses);
        if !self.dry_run {
            self.store.finalize_item(&item.id, status)?;
        }
        tracing::info!(item = %item.id, name = %item.display_name, %status, "item finished");

        Ok(ItemResult {
            status,
            error: (!errors.is_empty()).then(|| errors.join("; ")),
        })
    }
}

fn compute_target<A: RemoteApi>(
    step: &dyn SubStep<A>,
    item: &WorkItem,
    pinned: Option<&serde_json::Value>,
) -> std::result::Result<Option<serde_json::Value>, String> {
    match std::panic::catch_unwind(AssertUnwindSafe(|| step.target(item, pinned))) {
        Ok(Ok(target)) => Ok(target),
        Ok(Err(e)) => Err(e.to_string()),
        Err(payload) => Err(format!("panicked: {}", panic_message(&*payload))),
    }
}

async fn apply_step<A: RemoteApi>(
    api: &A,
    executor: &RetryExecutor,
    dry_run: bool,
    step: &dyn SubStep<A>,
    item: &WorkItem,
    target: &serde_json::Value,
) -> (std::result::Result<StepOutcome, String>, Vec<AttemptRecord>) {
    let mut cx = StepContext::new(api, executor, dry_run);
    let result = AssertUnwindSafe(step.apply(item, target, &mut cx))
        .catch_unwind()
        .await;
    let outcome = match result {
        Ok(Ok(outcome)) => Ok(outcome),
        Ok(Err(e)) => Err(e.to_string()),
        Err(payload) => Err(format!("panicked: {}", panic_message(&*payload))),
    };
    (outcome, cx.into_history())
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
