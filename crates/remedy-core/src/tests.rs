//! End-to-end engine behaviour against the scripted fake API.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

use crate::action::{RemediationAction, StepContext, StepError, StepOutcome, SubStep};
use crate::api::{RemoteError, WorkItem};
use crate::fake::{FakeApi, Increment, SetField};
use crate::orchestrator::Orchestrator;
use crate::progress::{
    FileProgressStore, ItemStatus, MemoryProgressStore, ProgressStore, ResetScope,
};
use crate::rate_limit::{RateLimitPolicy, RateLimiter};
use crate::retry::{AttemptOutcome, RetryExecutor, RetryPolicy};
use crate::RemedyError;

// ─── Helpers ────────────────────────────────────────────────────────────────

fn quick_limits() -> RateLimitPolicy {
    RateLimitPolicy {
        throttle_cooldown: Duration::from_secs(30),
        ..RateLimitPolicy::unpaced(1_000, Duration::from_secs(60))
    }
}

fn executor(limits: RateLimitPolicy) -> Arc<RetryExecutor> {
    let retry = RetryPolicy {
        max_attempts: 3,
        base_delay: Duration::from_secs(1),
        max_delay: Duration::from_secs(4),
        jitter: Duration::ZERO,
    };
    Arc::new(RetryExecutor::new(Arc::new(RateLimiter::new(limits)), retry))
}

fn two_fields() -> RemediationAction<FakeApi> {
    RemediationAction::new("fix")
        .step(SetField::new("a", 1))
        .step(SetField::new("b", 2))
}

fn orchestrator<S: ProgressStore>(
    api: &Arc<FakeApi>,
    action: RemediationAction<FakeApi>,
    store: S,
) -> Orchestrator<FakeApi, S> {
    Orchestrator::new(Arc::clone(api), executor(quick_limits()), action, store)
}

/// Trips a cancellation token while computing its target for one item.
struct Tripwire {
    token: CancellationToken,
    on_item: String,
}

#[async_trait]
impl SubStep<FakeApi> for Tripwire {
    fn name(&self) -> &str {
        "tripwire"
    }

    fn target(&self, item: &WorkItem, _pinned: Option<&Value>) -> Result<Option<Value>, StepError> {
        if item.id == self.on_item {
            self.token.cancel();
        }
        Ok(None)
    }

    async fn apply(
        &self,
        _item: &WorkItem,
        _target: &Value,
        _cx: &mut StepContext<'_, FakeApi>,
    ) -> Result<StepOutcome, StepError> {
        Ok(StepOutcome::AlreadySatisfied)
    }
}

/// Panics while computing its target.
struct Explodes;

#[async_trait]
impl SubStep<FakeApi> for Explodes {
    fn name(&self) -> &str {
        "explodes"
    }

    fn target(&self, _item: &WorkItem, _pinned: Option<&Value>) -> Result<Option<Value>, StepError> {
        panic!("bad arithmetic");
    }

    async fn apply(
        &self,
        _item: &WorkItem,
        _target: &Value,
        _cx: &mut StepContext<'_, FakeApi>,
    ) -> Result<StepOutcome, StepError> {
        unreachable!()
    }
}

// ─── Idempotence ────────────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn second_run_makes_no_mutations() {
    let api = Arc::new(FakeApi::with_items(4));
    let mut orch = orchestrator(&api, two_fields(), MemoryProgressStore::new("demo"));

    let first = orch.run(&(), None).await.unwrap();
    assert_eq!(first.succeeded, 4);
    assert_eq!(api.mutation_calls(), 8);

    let second = orch.run(&(), None).await.unwrap();
    assert_eq!(second.already_done, 4);
    assert_eq!(second.processed(), 0);
    assert_eq!(api.mutation_calls(), 8);
}

#[tokio::test(start_paused = true)]
async fn rerun_after_reset_observes_state_and_skips_writes() {
    let api = Arc::new(FakeApi::with_items(3));
    let mut orch = orchestrator(&api, two_fields(), MemoryProgressStore::new("demo"));
    orch.run(&(), None).await.unwrap();
    let writes = api.mutation_calls();

    assert_eq!(orch.reset(&ResetScope::Scope("demo".into())).unwrap(), 1);
    let summary = orch.run(&(), None).await.unwrap();
    assert_eq!(summary.succeeded, 3);
    assert_eq!(api.mutation_calls(), writes);
    let rec = orch.store().record("1").unwrap();
    assert_eq!(rec.sub_steps["set-a"].detail.as_deref(), Some("already satisfied"));
}

#[tokio::test(start_paused = true)]
async fn pinned_target_prevents_double_relative_write() {
    // A previous run pinned a=1 and its write landed, but the process died
    // before the outcome was recorded.
    let api = Arc::new(FakeApi::with_items(1));
    api.set_field("1", "a", json!(1));
    let mut store = MemoryProgressStore::new("demo");
    store.begin_item("1", "Item 1").unwrap();
    store.pin_target("1", "incr-a", json!(1)).unwrap();

    let action = RemediationAction::new("bump").step(Increment::new("a"));
    let mut orch = orchestrator(&api, action, store);
    let summary = orch.run(&(), None).await.unwrap();

    assert_eq!(summary.succeeded, 1);
    assert_eq!(api.field("1", "a"), json!(1));
    assert_eq!(api.mutation_calls(), 0);
    assert_eq!(orch.store().record("1").unwrap().runs, 2);
}

#[tokio::test(start_paused = true)]
async fn relative_step_pins_before_writing() {
    let api = Arc::new(FakeApi::with_items(1));
    let action = RemediationAction::new("bump").step(Increment::new("a"));
    let mut orch = orchestrator(&api, action, MemoryProgressStore::new("demo"));
    orch.run(&(), None).await.unwrap();

    assert_eq!(api.field("1", "a"), json!(1));
    let rec = orch.store().record("1").unwrap();
    assert_eq!(rec.pinned_targets["incr-a"], json!(1));
}

// ─── Resumability ───────────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn limit_then_relaunch_processes_the_rest() {
    let dir = TempDir::new().unwrap();
    let api = Arc::new(FakeApi::with_items(5));

    let store = FileProgressStore::open(dir.path(), "demo").unwrap();
    let mut orch = orchestrator(&api, two_fields(), store);
    let first = orch.run(&(), Some(2)).await.unwrap();
    assert_eq!(first.items_total, 5);
    assert_eq!(first.succeeded, 2);
    assert_eq!(first.not_started, 3);
    drop(orch);

    let store = FileProgressStore::open(dir.path(), "demo").unwrap();
    let mut orch = orchestrator(&api, two_fields(), store);
    let second = orch.run(&(), None).await.unwrap();
    assert_eq!(second.already_done, 2);
    assert_eq!(second.succeeded, 3);
    assert_eq!(second.not_started, 0);

    for id in ["1", "2", "3", "4", "5"] {
        assert_eq!(api.field(id, "a"), json!(1));
        assert_eq!(api.field(id, "b"), json!(2));
        assert!(orch.store().is_item_done(id));
    }
    assert_eq!(api.mutation_calls(), 10);
}

#[tokio::test(start_paused = true)]
async fn cancellation_between_items_reports_partial_run() {
    let api = Arc::new(FakeApi::with_items(5));
    let token = CancellationToken::new();
    let action = RemediationAction::new("fix")
        .step(SetField::new("a", 1))
        .step(Tripwire {
            token: token.clone(),
            on_item: "2".into(),
        });
    let mut orch =
        orchestrator(&api, action, MemoryProgressStore::new("demo")).with_cancellation(token);

    let summary = orch.run(&(), None).await.unwrap();
    assert!(summary.cancelled);
    assert_eq!(summary.succeeded, 2);
    assert_eq!(summary.not_started, 3);
    assert!(orch.store().record("3").is_none());
}

#[tokio::test(start_paused = true)]
async fn cancellation_mid_item_leaves_it_pending_then_resumes() {
    let api = Arc::new(FakeApi::with_items(3));
    let tripwire = |token: &CancellationToken| Tripwire {
        token: token.clone(),
        on_item: "2".into(),
    };

    let token = CancellationToken::new();
    let action = RemediationAction::new("fix")
        .step(tripwire(&token))
        .step(SetField::new("a", 1));
    let mut orch =
        orchestrator(&api, action, MemoryProgressStore::new("demo")).with_cancellation(token);
    let summary = orch.run(&(), None).await.unwrap();
    assert!(summary.cancelled);
    assert_eq!(summary.succeeded, 1);
    assert_eq!(summary.not_started, 2);
    let rec = orch.store().record("2").unwrap();
    assert_eq!(rec.status, ItemStatus::Pending);
    assert!(rec.step_succeeded("tripwire"));
    assert!(!rec.sub_steps.contains_key("set-a"));

    let store = orch.into_store();
    let token = CancellationToken::new();
    let action = RemediationAction::new("fix")
        .step(tripwire(&token))
        .step(SetField::new("a", 1));
    let mut orch = orchestrator(&api, action, store).with_cancellation(token);
    let summary = orch.run(&(), None).await.unwrap();
    assert!(!summary.cancelled);
    assert_eq!(summary.already_done, 1);
    assert_eq!(summary.succeeded, 2);
    assert_eq!(api.field("2", "a"), json!(1));
}

// ─── Partial-failure isolation ──────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn next_run_retries_only_failed_sub_steps() {
    let api = Arc::new(FakeApi::with_items(2));
    api.script_mutation("2", vec![RemoteError::Permanent("422 price invalid".into())]);
    let mut orch = orchestrator(&api, two_fields(), MemoryProgressStore::new("demo"));

    let first = orch.run(&(), None).await.unwrap();
    assert_eq!(first.succeeded, 1);
    assert_eq!(first.partially_failed, 1);
    assert_eq!(first.failures.len(), 1);
    assert_eq!(first.failures[0].item_id, "2");
    assert!(first.failures[0].error.contains("set-a: rejected: 422"));
    let rec = orch.store().record("2").unwrap();
    assert_eq!(rec.status, ItemStatus::PartiallyFailed);
    assert!(rec.step_succeeded("set-b"));
    // Permanent errors are not retried within the run.
    assert_eq!(rec.sub_steps["set-a"].history.len(), 2);

    let writes = api.mutation_calls();
    let second = orch.run(&(), None).await.unwrap();
    assert_eq!(second.already_done, 1);
    assert_eq!(second.succeeded, 1);
    assert_eq!(api.mutation_calls(), writes + 1);
    assert_eq!(orch.store().record("2").unwrap().status, ItemStatus::Succeeded);
    assert_eq!(orch.store().record("2").unwrap().last_error, None);
}

#[tokio::test(start_paused = true)]
async fn exhausted_retries_fail_the_item_not_the_run() {
    let api = Arc::new(FakeApi::with_items(3));
    api.script_mutation("1", vec![RemoteError::Transient("503".into()); 3]);
    let action = RemediationAction::new("fix").step(SetField::new("a", 1));
    let mut orch = orchestrator(&api, action, MemoryProgressStore::new("demo"));

    let summary = orch.run(&(), None).await.unwrap();
    assert_eq!(summary.failed, 1);
    assert_eq!(summary.succeeded, 2);
    assert!(summary.failures[0].error.contains("gave up after 3 attempt(s)"));
}

#[tokio::test(start_paused = true)]
async fn panicking_step_is_contained() {
    let api = Arc::new(FakeApi::with_items(3));
    api.panic_on_fetch("2");
    let action = RemediationAction::new("fix")
        .step(SetField::new("a", 1))
        .step(SetField::new("b", 2).skip("2"));
    let mut orch = orchestrator(&api, action, MemoryProgressStore::new("demo"));

    let summary = orch.run(&(), None).await.unwrap();
    assert_eq!(summary.succeeded, 2);
    assert_eq!(summary.partially_failed, 1);
    let rec = orch.store().record("2").unwrap();
    let err = rec.sub_steps["set-a"].last_error.as_deref().unwrap();
    assert!(err.contains("panicked: fake fetch exploded"), "{err}");
}

#[tokio::test(start_paused = true)]
async fn panicking_target_fails_the_step() {
    let api = Arc::new(FakeApi::with_items(1));
    let action = RemediationAction::new("fix").step(Explodes);
    let mut orch = orchestrator(&api, action, MemoryProgressStore::new("demo"));

    let summary = orch.run(&(), None).await.unwrap();
    assert_eq!(summary.failed, 1);
    assert!(summary.failures[0].error.contains("bad arithmetic"));
}

#[tokio::test(start_paused = true)]
async fn not_applicable_counts_as_success() {
    let api = Arc::new(FakeApi::with_items(2));
    let action = RemediationAction::new("fix").step(SetField::new("a", 1).skip("2"));
    let mut orch = orchestrator(&api, action, MemoryProgressStore::new("demo"));

    let summary = orch.run(&(), None).await.unwrap();
    assert_eq!(summary.succeeded, 2);
    assert_eq!(api.mutation_calls(), 1);
    let rec = orch.store().record("2").unwrap();
    assert_eq!(rec.sub_steps["set-a"].detail.as_deref(), Some("not applicable"));
}

// ─── Pacing ─────────────────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn calls_never_exceed_the_ceiling() {
    let api = Arc::new(FakeApi::with_items(5));
    let limits = RateLimitPolicy::unpaced(3, Duration::from_secs(10));
    let action = RemediationAction::new("fix").step(SetField::new("a", 1));
    let mut orch = Orchestrator::new(
        Arc::clone(&api),
        executor(limits),
        action,
        MemoryProgressStore::new("demo"),
    );

    let summary = orch.run(&(), None).await.unwrap();
    assert_eq!(summary.remote_requests_made, 11);

    let times = api.call_times();
    assert_eq!(times.len(), 11);
    for pair in times.windows(4) {
        assert!(
            pair[3] - pair[0] >= Duration::from_secs(10),
            "4 calls within {:?}",
            pair[3] - pair[0]
        );
    }
}

#[tokio::test(start_paused = true)]
async fn transient_backoff_grows_to_the_cap() {
    let api = Arc::new(FakeApi::with_items(1));
    api.script_mutation("1", vec![RemoteError::Transient("502".into()); 4]);
    let retry = RetryPolicy {
        max_attempts: 5,
        base_delay: Duration::from_secs(1),
        max_delay: Duration::from_secs(3),
        jitter: Duration::ZERO,
    };
    let exec = Arc::new(RetryExecutor::new(
        Arc::new(RateLimiter::new(quick_limits())),
        retry,
    ));
    let action = RemediationAction::new("fix").step(SetField::new("a", 1));
    let mut orch = Orchestrator::new(Arc::clone(&api), exec, action, MemoryProgressStore::new("demo"));

    let summary = orch.run(&(), None).await.unwrap();
    assert_eq!(summary.succeeded, 1);

    // list, fetch, then five mutation attempts
    let times = api.call_times();
    let gaps: Vec<Duration> = times[2..].windows(2).map(|w| w[1] - w[0]).collect();
    assert_eq!(
        gaps,
        [1, 2, 3, 3].map(Duration::from_secs).to_vec()
    );
}

// ─── Throttling scenario ────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn throttled_item_recovers_and_is_counted() {
    let api = Arc::new(FakeApi::with_items(3));
    api.script_mutation("2", vec![RemoteError::Throttled { retry_after: None }]);
    let action = RemediationAction::new("fix").step(SetField::new("a", 1));
    let mut orch = orchestrator(&api, action, MemoryProgressStore::new("demo"));

    let summary = orch.run(&(), None).await.unwrap();
    assert_eq!(summary.items_total, 3);
    assert_eq!(summary.succeeded, 3);
    assert_eq!(summary.throttled_count, 1);
    assert_eq!(summary.remote_requests_made, 8);

    for id in ["1", "2", "3"] {
        assert_eq!(orch.store().record(id).unwrap().status, ItemStatus::Succeeded);
    }
    let writes: Vec<AttemptOutcome> = orch.store().record("2").unwrap().sub_steps["set-a"]
        .history
        .iter()
        .filter(|a| a.call == "set_field")
        .map(|a| a.outcome)
        .collect();
    assert_eq!(writes, vec![AttemptOutcome::Throttled, AttemptOutcome::Success]);
}

// ─── Dry run and fatal errors ───────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn dry_run_writes_nothing() {
    let dir = TempDir::new().unwrap();
    let api = Arc::new(FakeApi::with_items(3));
    let store = FileProgressStore::open(dir.path(), "demo").unwrap();
    let mut orch = orchestrator(&api, two_fields(), store).dry_run(true);

    let summary = orch.run(&(), None).await.unwrap();
    assert!(summary.dry_run);
    assert_eq!(summary.succeeded, 3);
    assert_eq!(api.mutation_calls(), 0);
    assert!(orch.store().records().is_empty());
    assert!(!orch.store().path().exists());
}

#[tokio::test(start_paused = true)]
async fn enumeration_failure_aborts_the_run() {
    let api = Arc::new(FakeApi::with_items(3));
    api.script_list(vec![RemoteError::Permanent("401 unauthorized".into())]);
    let mut orch = orchestrator(&api, two_fields(), MemoryProgressStore::new("demo"));

    let err = orch.run(&(), None).await.unwrap_err();
    assert!(matches!(err, RemedyError::EnumerationRejected(_)), "{err}");
    assert!(orch.store().records().is_empty());
    assert_eq!(api.fetch_calls(), 0);
}

#[tokio::test(start_paused = true)]
async fn corrupt_ledger_aborts_before_any_call() {
    let dir = TempDir::new().unwrap();
    std::fs::write(dir.path().join("demo.json"), b"not json").unwrap();
    let api = Arc::new(FakeApi::with_items(3));
    let store = FileProgressStore::new(dir.path(), "demo").unwrap();
    let mut orch = orchestrator(&api, two_fields(), store);

    let err = orch.run(&(), None).await.unwrap_err();
    assert!(matches!(err, RemedyError::CorruptLedger { .. }), "{err}");
    assert_eq!(api.total_calls(), 0);
}
