//! JSON-file ledger, one file per scope.
//!
//! Layout: `<dir>/<scope>.json`, holding a [`Ledger`] as compact JSON.
//! Every mutation rewrites the whole file through [`atomic_write`], so a
//! crash leaves either the previous document or the new one on disk, never
//! a torn write.
//!
//! A missing file is an empty ledger. A file that does not parse, names a
//! different scope, or carries an unknown `version` is refused: resuming
//! from a ledger we cannot trust would redo finished work.

use std::path::{Path, PathBuf};

use super::ledger::{Ledger, LEDGER_VERSION};
use super::record::{ItemStatus, ProgressRecord, SubStepResult};
use super::{ProgressStore, ResetScope};
use crate::error::{RemedyError, Result};
use crate::io::{atomic_write, ensure_dir, remove_if_exists};
use crate::paths::{ledger_path, validate_scope, LEDGER_EXT};

pub struct FileProgressStore {
    dir: PathBuf,
    path: PathBuf,
    ledger: Ledger,
}

impl FileProgressStore {
    /// Create a store without reading disk. Call [`ProgressStore::load`] next.
    pub fn new(dir: impl Into<PathBuf>, scope: &str) -> Result<Self> {
        validate_scope(scope)?;
        let dir = dir.into();
        let path = ledger_path(&dir, scope);
        Ok(Self {
            dir,
            path,
            ledger: Ledger::new(scope),
        })
    }

    /// Create and load in one step.
    pub fn open(dir: impl Into<PathBuf>, scope: &str) -> Result<Self> {
        let mut store = Self::new(dir, scope)?;
        store.load()?;
        Ok(store)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn ledger(&self) -> &Ledger {
        &self.ledger
    }

    /// Scope names with a ledger file in `dir`, sorted.
    pub fn scopes(dir: &Path) -> Result<Vec<String>> {
        if !dir.exists() {
            return Ok(Vec::new());
        }
        let mut scopes = Vec::new();
        for entry in std::fs::read_dir(dir)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some(LEDGER_EXT) {
                continue;
            }
            if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                if validate_scope(stem).is_ok() {
                    scopes.push(stem.to_string());
                }
            }
        }
        scopes.sort();
        Ok(scopes)
    }

    /// Remove every ledger file in `dir`. Returns how many were removed.
    pub fn remove_all(dir: &Path) -> Result<usize> {
        let mut cleared = 0;
        for name in Self::scopes(dir)? {
            if remove_if_exists(&ledger_path(dir, &name))? {
                tracing::info!(scope = %name, "progress ledger removed");
                cleared += 1;
            }
        }
        Ok(cleared)
    }

    /// Read a ledger file without opening a store on it.
    pub fn read_ledger(path: &Path) -> Result<Option<Ledger>> {
        let data = match std::fs::read_to_string(path) {
            Ok(d) => d,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let corrupt = |detail: String| RemedyError::CorruptLedger {
            path: path.to_path_buf(),
            detail,
        };

        let value: serde_json::Value =
            serde_json::from_str(&data).map_err(|e| corrupt(e.to_string()))?;
        let found = value
            .get("version")
            .and_then(serde_json::Value::as_u64)
            .ok_or_else(|| corrupt("missing 'version'".into()))?;
        if found != u64::from(LEDGER_VERSION) {
            return Err(RemedyError::UnsupportedLedgerVersion {
                path: path.to_path_buf(),
                found: u32::try_from(found).unwrap_or(u32::MAX),
                expected: LEDGER_VERSION,
            });
        }
        let ledger: Ledger = serde_json::from_value(value).map_err(|e| corrupt(e.to_string()))?;
        Ok(Some(ledger))
    }

    fn flush(&self) -> Result<()> {
        ensure_dir(&self.dir)?;
        let data = serde_json::to_vec(&self.ledger)?;
        atomic_write(&self.path, &data)
    }
}

impl ProgressStore for FileProgressStore {
    fn scope(&self) -> &str {
        &self.ledger.scope
    }

    fn load(&mut self) -> Result<()> {
        let scope = self.ledger.scope.clone();
        self.ledger = match Self::read_ledger(&self.path)? {
            Some(ledger) if ledger.scope != scope => {
                return Err(RemedyError::CorruptLedger {
                    path: self.path.clone(),
                    detail: format!("ledger belongs to scope '{}'", ledger.scope),
                });
            }
            Some(ledger) => ledger,
            None => Ledger::new(scope),
        };
        tracing::debug!(
            path = %self.path.display(),
            items = self.ledger.items.len(),
            "progress ledger loaded"
        );
        Ok(())
    }

    fn record(&self, item_id: &str) -> Option<&ProgressRecord> {
        self.ledger.get(item_id)
    }

    fn records(&self) -> Vec<&ProgressRecord> {
        self.ledger.records()
    }

    fn begin_item(&mut self, item_id: &str, display_name: &str) -> Result<()> {
        self.ledger.begin_item(item_id, display_name);
        self.flush()
    }

    fn pin_target(&mut self, item_id: &str, step: &str, target: serde_json::Value) -> Result<()> {
        self.ledger.pin_target(item_id, step, target)?;
        self.flush()
    }

    fn record_sub_step(&mut self, item_id: &str, step: &str, result: SubStepResult) -> Result<()> {
        if self.ledger.record_sub_step(item_id, step, result)? {
            self.flush()?;
        }
        Ok(())
    }

    fn finalize_item(&mut self, item_id: &str, status: ItemStatus) -> Result<()> {
        self.ledger.finalize_item(item_id, status)?;
        self.flush()
    }

    fn reset(&mut self, scope: &ResetScope) -> Result<usize> {
        let cleared = match scope {
            ResetScope::All => {
                self.ledger.clear();
                Self::remove_all(&self.dir)?
            }
            ResetScope::Scope(name) => {
                validate_scope(name)?;
                if *name == self.ledger.scope {
                    self.ledger.clear();
                }
                let removed = remove_if_exists(&ledger_path(&self.dir, name))?;
                if removed {
                    tracing::info!(scope = %name, "progress ledger removed");
                }
                usize::from(removed)
            }
        };
        Ok(cleared)
    }
}
