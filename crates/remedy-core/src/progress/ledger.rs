use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::record::{ItemStatus, ProgressRecord, SubStepResult};
use crate::error::{RemedyError, Result};

/// On-disk format version. Bump when the ledger shape changes incompatibly.
pub const LEDGER_VERSION: u32 = 1;

/// The full progress document for one scope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Ledger {
    pub version: u32,
    pub scope: String,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub items: BTreeMap<String, ProgressRecord>,
}

impl Ledger {
    pub fn new(scope: impl Into<String>) -> Self {
        Self {
            version: LEDGER_VERSION,
            scope: scope.into(),
            updated_at: Utc::now(),
            items: BTreeMap::new(),
        }
    }

    pub fn get(&self, item_id: &str) -> Option<&ProgressRecord> {
        self.items.get(item_id)
    }

    pub fn records(&self) -> Vec<&ProgressRecord> {
        self.items.values().collect()
    }

    pub fn count(&self, status: ItemStatus) -> usize {
        self.items.values().filter(|r| r.status == status).count()
    }

    pub(crate) fn begin_item(&mut self, item_id: &str, display_name: &str) {
        let record = self
            .items
            .entry(item_id.to_string())
            .or_insert_with(|| ProgressRecord::new(item_id, display_name));
        if !display_name.is_empty() {
            record.display_name = display_name.to_string();
        }
        record.status = ItemStatus::Pending;
        record.runs += 1;
        record.updated_at = Utc::now();
        self.updated_at = record.updated_at;
    }

    pub(crate) fn pin_target(
        &mut self,
        item_id: &str,
        step: &str,
        target: serde_json::Value,
    ) -> Result<()> {
        let record = self.get_mut(item_id)?;
        record.pinned_targets.insert(step.to_string(), target);
        record.updated_at = Utc::now();
        self.updated_at = record.updated_at;
        Ok(())
    }

    /// Returns whether the record changed.
    pub(crate) fn record_sub_step(
        &mut self,
        item_id: &str,
        step: &str,
        result: SubStepResult,
    ) -> Result<bool> {
        let record = self.get_mut(item_id)?;
        let changed = record.apply_sub_step(step, result);
        if changed {
            self.updated_at = Utc::now();
        } else {
            tracing::debug!(item = item_id, step, "sub-step already succeeded, keeping it");
        }
        Ok(changed)
    }

    pub(crate) fn finalize_item(&mut self, item_id: &str, status: ItemStatus) -> Result<()> {
        let record = self.get_mut(item_id)?;
        record.status = status;
        record.last_error = match status {
            ItemStatus::Succeeded => None,
            _ => record.failure_summary(),
        };
        record.updated_at = Utc::now();
        self.updated_at = record.updated_at;
        Ok(())
    }

    pub(crate) fn clear(&mut self) {
        self.items.clear();
        self.updated_at = Utc::now();
    }

    fn get_mut(&mut self, item_id: &str) -> Result<&mut ProgressRecord> {
        self.items
            .get_mut(item_id)
            .ok_or_else(|| RemedyError::UnknownItem(item_id.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn begin_item_is_idempotent_apart_from_run_count() {
        let mut ledger = Ledger::new("demo");
        ledger.begin_item("1", "Chair");
        ledger.begin_item("1", "");
        let rec = ledger.get("1").unwrap();
        assert_eq!(rec.runs, 2);
        assert_eq!(rec.display_name, "Chair");
        assert_eq!(rec.status, ItemStatus::Pending);
        assert_eq!(ledger.items.len(), 1);
    }

    #[test]
    fn mutations_on_unknown_item_fail() {
        let mut ledger = Ledger::new("demo");
        assert!(matches!(
            ledger.finalize_item("nope", ItemStatus::Failed),
            Err(RemedyError::UnknownItem(id)) if id == "nope"
        ));
        assert!(ledger
            .pin_target("nope", "image", serde_json::json!(1))
            .is_err());
    }

    #[test]
    fn finalize_copies_failures_into_last_error() {
        let mut ledger = Ledger::new("demo");
        ledger.begin_item("1", "Chair");
        ledger
            .record_sub_step("1", "price", SubStepResult::failed("422", vec![]))
            .unwrap();
        ledger.finalize_item("1", ItemStatus::Failed).unwrap();
        assert_eq!(ledger.get("1").unwrap().last_error.as_deref(), Some("price: 422"));
        assert_eq!(ledger.count(ItemStatus::Failed), 1);
    }
}
