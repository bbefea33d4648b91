//! Durable per-item progress.
//!
//! A [`ProgressStore`] owns the ledger for one scope: a map from item id to
//! [`ProgressRecord`]. Every mutating call is durable before it returns, so a
//! crash loses at most the work in flight. The orchestrator consults the
//! store to skip finished items and finished sub-steps on the next run.
//!
//! Two implementations ship:
//!
//! - [`MemoryProgressStore`]: process-local, used by tests and dry runs
//! - [`FileProgressStore`]: one versioned JSON file per scope under
//!   `.remedy/progress/`, rewritten atomically on every change

mod file;
mod ledger;
mod memory;
mod record;

pub use file::FileProgressStore;
pub use ledger::{Ledger, LEDGER_VERSION};
pub use memory::MemoryProgressStore;
pub use record::{ItemStatus, ProgressRecord, StepStatus, SubStepResult, HISTORY_LIMIT};

use crate::error::Result;

/// What a reset clears.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResetScope {
    /// Every scope the store knows about.
    All,
    /// A single named scope.
    Scope(String),
}

pub trait ProgressStore: Send {
    /// Scope this store reads and writes.
    fn scope(&self) -> &str;

    /// Read persisted state. Fails if the ledger exists but cannot be trusted.
    fn load(&mut self) -> Result<()>;

    fn record(&self, item_id: &str) -> Option<&ProgressRecord>;

    /// All records of the current scope, ordered by item id.
    fn records(&self) -> Vec<&ProgressRecord>;

    fn is_item_done(&self, item_id: &str) -> bool {
        self.record(item_id)
            .is_some_and(|r| r.status == ItemStatus::Succeeded)
    }

    /// Create the record if missing, mark it pending and bump its run count.
    fn begin_item(&mut self, item_id: &str, display_name: &str) -> Result<()>;

    /// Persist the target a sub-step is about to write.
    fn pin_target(&mut self, item_id: &str, step: &str, target: serde_json::Value) -> Result<()>;

    /// Persist one sub-step outcome. A succeeded sub-step is never downgraded.
    fn record_sub_step(&mut self, item_id: &str, step: &str, result: SubStepResult) -> Result<()>;

    /// Persist the final item status and its aggregated error text.
    fn finalize_item(&mut self, item_id: &str, status: ItemStatus) -> Result<()>;

    /// Discard progress. Returns the number of scopes cleared.
    fn reset(&mut self, scope: &ResetScope) -> Result<usize>;
}
