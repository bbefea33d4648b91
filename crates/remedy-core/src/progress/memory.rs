use std::collections::BTreeMap;

use super::ledger::Ledger;
use super::record::{ItemStatus, ProgressRecord, SubStepResult};
use super::{ProgressStore, ResetScope};
use crate::error::Result;

/// Process-local store. Nothing survives the process.
///
/// Holds ledgers for several scopes so resets behave like the file store.
#[derive(Debug, Clone)]
pub struct MemoryProgressStore {
    scope: String,
    ledgers: BTreeMap<String, Ledger>,
}

impl MemoryProgressStore {
    pub fn new(scope: impl Into<String>) -> Self {
        let scope = scope.into();
        let mut ledgers = BTreeMap::new();
        ledgers.insert(scope.clone(), Ledger::new(scope.clone()));
        Self { scope, ledgers }
    }

    /// Seed the store with an existing ledger, e.g. one read from disk.
    pub fn with_ledger(mut self, ledger: Ledger) -> Self {
        self.ledgers.insert(ledger.scope.clone(), ledger);
        self
    }

    pub fn ledger(&self) -> &Ledger {
        &self.ledgers[&self.scope]
    }

    fn ledger_mut(&mut self) -> &mut Ledger {
        let scope = self.scope.clone();
        self.ledgers
            .entry(scope.clone())
            .or_insert_with(|| Ledger::new(scope))
    }
}

impl ProgressStore for MemoryProgressStore {
    fn scope(&self) -> &str {
        &self.scope
    }

    fn load(&mut self) -> Result<()> {
        Ok(())
    }

    fn record(&self, item_id: &str) -> Option<&ProgressRecord> {
        self.ledgers.get(&self.scope)?.get(item_id)
    }

    fn records(&self) -> Vec<&ProgressRecord> {
        self.ledgers
            .get(&self.scope)
            .map(Ledger::records)
            .unwrap_or_default()
    }

    fn begin_item(&mut self, item_id: &str, display_name: &str) -> Result<()> {
        self.ledger_mut().begin_item(item_id, display_name);
        Ok(())
    }

    fn pin_target(&mut self, item_id: &str, step: &str, target: serde_json::Value) -> Result<()> {
        self.ledger_mut().pin_target(item_id, step, target)
    }

    fn record_sub_step(&mut self, item_id: &str, step: &str, result: SubStepResult) -> Result<()> {
        self.ledger_mut().record_sub_step(item_id, step, result)?;
        Ok(())
    }

    fn finalize_item(&mut self, item_id: &str, status: ItemStatus) -> Result<()> {
        self.ledger_mut().finalize_item(item_id, status)
    }

    fn reset(&mut self, scope: &ResetScope) -> Result<usize> {
        let cleared = match scope {
            ResetScope::All => {
                let n = self.ledgers.values().filter(|l| !l.items.is_empty()).count();
                self.ledgers.values_mut().for_each(Ledger::clear);
                n
            }
            ResetScope::Scope(name) => match self.ledgers.get_mut(name) {
                Some(ledger) if !ledger.items.is_empty() => {
                    ledger.clear();
                    1
                }
                _ => 0,
            },
        };
        Ok(cleared)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn done_only_after_success() {
        let mut store = MemoryProgressStore::new("demo");
        assert!(!store.is_item_done("1"));
        store.begin_item("1", "Chair").unwrap();
        assert!(!store.is_item_done("1"));
        store
            .record_sub_step("1", "price", SubStepResult::succeeded("ok", vec![]))
            .unwrap();
        store.finalize_item("1", ItemStatus::Succeeded).unwrap();
        assert!(store.is_item_done("1"));
    }

    #[test]
    fn reset_scope_leaves_other_scopes() {
        let mut other = Ledger::new("other");
        other.begin_item("9", "Lamp");
        let mut store = MemoryProgressStore::new("demo").with_ledger(other);
        store.begin_item("1", "Chair").unwrap();

        assert_eq!(store.reset(&ResetScope::Scope("demo".into())).unwrap(), 1);
        assert!(store.records().is_empty());
        assert_eq!(store.ledgers["other"].items.len(), 1);

        assert_eq!(store.reset(&ResetScope::All).unwrap(), 1);
        assert!(store.ledgers["other"].items.is_empty());
    }
}
