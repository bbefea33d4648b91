use std::path::PathBuf;

use thiserror::Error;

/// Errors that abort a run or a store operation.
///
/// Per-item failures never surface here; the orchestrator records them in the
/// progress ledger and keeps going. Everything in this enum is fatal to the
/// caller.
#[derive(Debug, Error)]
pub enum RemedyError {
    #[error("not initialized: run 'remedy init'")]
    NotInitialized,

    #[error("work enumeration failed after {attempts} attempt(s): {detail}")]
    Enumeration { attempts: u32, detail: String },

    #[error("work enumeration rejected by server: {0}")]
    EnumerationRejected(String),

    #[error("work enumeration repeated cursor '{0}'")]
    CursorLoop(String),

    #[error("progress ledger {path} is unreadable: {detail}")]
    CorruptLedger { path: PathBuf, detail: String },

    #[error("progress ledger {path} has version {found}, expected {expected}")]
    UnsupportedLedgerVersion {
        path: PathBuf,
        found: u32,
        expected: u32,
    },

    #[error("progress ledger has no record for item: {0}")]
    UnknownItem(String),

    #[error("invalid scope name '{0}': must be lowercase alphanumeric with hyphens")]
    InvalidScope(String),

    #[error("invalid config: {0}")]
    InvalidConfig(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, RemedyError>;
