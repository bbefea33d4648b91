use serde::Serialize;

use crate::progress::ItemStatus;

/// Per-item failure captured for the summary.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ItemFailure {
    pub item_id: String,
    pub display_name: String,
    pub status: ItemStatus,
    pub error: String,
}

/// Aggregate result of one run. Not persisted.
///
/// `items_total` counts every enumerated item, so it always equals
/// `already_done + succeeded + partially_failed + failed + not_started`.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RunSummary {
    pub run_id: String,
    pub items_total: usize,
    pub succeeded: usize,
    pub partially_failed: usize,
    pub failed: usize,
    /// Items skipped because an earlier run finished them.
    pub already_done: usize,
    /// Items left for a later run by the item limit or cancellation.
    pub not_started: usize,
    pub remote_requests_made: u64,
    pub throttled_count: u64,
    pub cancelled: bool,
    pub dry_run: bool,
    pub failures: Vec<ItemFailure>,
}

impl RunSummary {
    pub fn processed(&self) -> usize {
        self.succeeded + self.partially_failed + self.failed
    }

    /// True when nothing failed and nothing was left behind.
    pub fn is_complete(&self) -> bool {
        self.partially_failed == 0 && self.failed == 0 && self.not_started == 0 && !self.cancelled
    }

    pub(crate) fn count(&mut self, status: ItemStatus) {
        match status {
            ItemStatus::Succeeded => self.succeeded += 1,
            ItemStatus::PartiallyFailed => self.partially_failed += 1,
            ItemStatus::Failed => self.failed += 1,
            ItemStatus::Pending => self.not_started += 1,
        }
    }
}
