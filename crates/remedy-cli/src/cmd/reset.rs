use crate::output::print_json;
use anyhow::Context;
use remedy_core::{
    paths,
    progress::{FileProgressStore, ProgressStore, ResetScope},
};
use std::path::Path;

pub fn run(root: &Path, scope: Option<&str>, all: bool, json: bool) -> anyhow::Result<()> {
    let dir = paths::progress_dir(root);
    let (cleared, current) = if all {
        let cleared = FileProgressStore::remove_all(&dir).context("failed to reset progress")?;
        (cleared, None)
    } else {
        let current = super::resolve_scope(root, scope)?;
        let mut store = FileProgressStore::new(&dir, &current)?;
        let cleared = store
            .reset(&ResetScope::Scope(current.clone()))
            .context("failed to reset progress")?;
        (cleared, Some(current))
    };

    if json {
        print_json(&serde_json::json!({
            "scope": current,
            "cleared": cleared,
        }))?;
    } else if cleared == 0 {
        println!("Nothing to reset.");
    } else if let Some(current) = current {
        println!("Cleared ledger '{current}'.");
    } else {
        println!("Cleared {cleared} ledger(s).");
    }
    Ok(())
}
