use crate::error::{RemedyError, Result};
use regex::Regex;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

// ---------------------------------------------------------------------------
// Directory constants
// ---------------------------------------------------------------------------

pub const REMEDY_DIR: &str = ".remedy";
pub const PROGRESS_DIR: &str = ".remedy/progress";
pub const CONFIG_FILE: &str = ".remedy/config.yaml";

pub const LEDGER_EXT: &str = "json";

// ---------------------------------------------------------------------------
// Path helpers
// ---------------------------------------------------------------------------

pub fn remedy_dir(root: &Path) -> PathBuf {
    root.join(REMEDY_DIR)
}

pub fn config_path(root: &Path) -> PathBuf {
    root.join(CONFIG_FILE)
}

pub fn progress_dir(root: &Path) -> PathBuf {
    root.join(PROGRESS_DIR)
}

/// Ledger file for one scope inside a progress directory.
pub fn ledger_path(progress_dir: &Path, scope: &str) -> PathBuf {
    progress_dir.join(format!("{scope}.{LEDGER_EXT}"))
}

// ---------------------------------------------------------------------------
// Scope validation
// ---------------------------------------------------------------------------

static SCOPE_RE: OnceLock<Regex> = OnceLock::new();

fn scope_re() -> &'static Regex {
    SCOPE_RE.get_or_init(|| Regex::new(r"^[a-z0-9][a-z0-9\-]*[a-z0-9]$|^[a-z0-9]$").unwrap())
}

/// Scope names become ledger file names, so they are restricted to slugs.
pub fn validate_scope(scope: &str) -> Result<()> {
    if scope.is_empty() || scope.len() > 64 || !scope_re().is_match(scope) {
        return Err(RemedyError::InvalidScope(scope.to_string()));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
