//! Per-item progress records as persisted in the ledger.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::retry::AttemptRecord;

/// Most recent attempts kept per sub-step. Older entries are dropped first.
pub const HISTORY_LIMIT: usize = 32;

// ---------------------------------------------------------------------------
// ItemStatus
// ---------------------------------------------------------------------------

/// Lifecycle state of one item in the ledger.
///
/// `Pending` marks an item that was started but never finalized, either
/// because it is in progress or because the process died mid-item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemStatus {
    Pending,
    Succeeded,
    PartiallyFailed,
    Failed,
}

impl ItemStatus {
    /// Status implied by the outcomes of every declared sub-step.
    ///
    /// `Succeeded` iff all succeeded, `Failed` iff none did.
    pub fn from_outcomes(outcomes: impl IntoIterator<Item = StepStatus>) -> Self {
        let (mut ok, mut failed) = (0usize, 0usize);
        for s in outcomes {
            match s {
                StepStatus::Succeeded => ok += 1,
                StepStatus::Failed => failed += 1,
            }
        }
        match (ok, failed) {
            (_, 0) => Self::Succeeded,
            (0, _) => Self::Failed,
            _ => Self::PartiallyFailed,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Succeeded => "succeeded",
            Self::PartiallyFailed => "partially_failed",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for ItemStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// SubStepResult
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Succeeded,
    Failed,
}

/// Outcome of the latest attempt at one sub-step for one item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubStepResult {
    pub status: StepStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    /// What the step wrote, or why nothing was written.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub history: Vec<AttemptRecord>,
}

impl SubStepResult {
    pub fn succeeded(detail: impl Into<String>, history: Vec<AttemptRecord>) -> Self {
        Self {
            status: StepStatus::Succeeded,
            last_error: None,
            detail: Some(detail.into()),
            timestamp: Utc::now(),
            history,
        }
    }

    pub fn failed(error: impl Into<String>, history: Vec<AttemptRecord>) -> Self {
        Self {
            status: StepStatus::Failed,
            last_error: Some(error.into()),
            detail: None,
            timestamp: Utc::now(),
            history,
        }
    }

    pub fn is_succeeded(&self) -> bool {
        self.status == StepStatus::Succeeded
    }
}

// ---------------------------------------------------------------------------
// ProgressRecord
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressRecord {
    pub item_id: String,
    #[serde(default)]
    pub display_name: String,
    pub status: ItemStatus,
    #[serde(default)]
    pub sub_steps: BTreeMap<String, SubStepResult>,
    /// Targets persisted by sub-steps before they wrote.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub pinned_targets: BTreeMap<String, serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    /// Number of runs that started work on this item.
    #[serde(default)]
    pub runs: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ProgressRecord {
    pub fn new(item_id: impl Into<String>, display_name: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            item_id: item_id.into(),
            display_name: display_name.into(),
            status: ItemStatus::Pending,
            sub_steps: BTreeMap::new(),
            pinned_targets: BTreeMap::new(),
            last_error: None,
            runs: 0,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn step_succeeded(&self, step: &str) -> bool {
        self.sub_steps.get(step).is_some_and(SubStepResult::is_succeeded)
    }

    /// Error text of every failed sub-step, `step: error` joined by `; `.
    pub fn failure_summary(&self) -> Option<String> {
        let parts: Vec<String> = self
            .sub_steps
            .iter()
            .filter(|(_, r)| !r.is_succeeded())
            .map(|(name, r)| format!("{name}: {}", r.last_error.as_deref().unwrap_or("failed")))
            .collect();
        if parts.is_empty() {
            None
        } else {
            Some(parts.join("; "))
        }
    }

    /// Merge a new sub-step result, keeping sub-step outcomes monotonic.
    ///
    /// Returns `false` and leaves the record untouched if the step had already
    /// succeeded.
    pub(crate) fn apply_sub_step(&mut self, step: &str, mut result: SubStepResult) -> bool {
        if let Some(existing) = self.sub_steps.get(step) {
            if existing.is_succeeded() {
                return false;
            }
            let mut history = existing.history.clone();
            history.append(&mut result.history);
            result.history = history;
        }
        if result.history.len() > HISTORY_LIMIT {
            let excess = result.history.len() - HISTORY_LIMIT;
            result.history.drain(..excess);
        }
        self.updated_at = result.timestamp;
        self.sub_steps.insert(step.to_string(), result);
        true
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
