pub mod config;
pub mod init;
pub mod reset;
pub mod run;
pub mod status;

use anyhow::Context;
use remedy_core::{config::Config, paths};
use std::path::Path;

/// Scope named on the command line, or the configured one.
pub fn resolve_scope(root: &Path, explicit: Option<&str>) -> anyhow::Result<String> {
    match explicit {
        Some(scope) => {
            paths::validate_scope(scope)?;
            Ok(scope.to_string())
        }
        None => {
            let config = Config::load(root).context("failed to load config (or pass --scope)")?;
            Ok(config.remediation.scope)
        }
    }
}
