use crate::output::{print_json, print_table};
use anyhow::Context;
use remedy_core::{
    paths,
    progress::{FileProgressStore, ItemStatus, Ledger, ProgressRecord},
};
use serde::Serialize;
use std::path::Path;

#[derive(Serialize)]
struct StatusOutput<'a> {
    scope: &'a str,
    ledger: String,
    total: usize,
    succeeded: usize,
    partially_failed: usize,
    failed: usize,
    pending: usize,
    problems: Vec<Problem<'a>>,
}

#[derive(Serialize)]
struct Problem<'a> {
    item_id: &'a str,
    display_name: &'a str,
    status: ItemStatus,
    runs: u32,
    last_error: Option<&'a str>,
}

pub fn run(root: &Path, scope: Option<&str>, json: bool) -> anyhow::Result<()> {
    let scope = super::resolve_scope(root, scope)?;
    let path = paths::ledger_path(&paths::progress_dir(root), &scope);
    let ledger = FileProgressStore::read_ledger(&path)
        .with_context(|| format!("failed to read {}", path.display()))?
        .unwrap_or_else(|| Ledger::new(scope.as_str()));

    let problems: Vec<Problem> = ledger
        .records()
        .into_iter()
        .filter(|r| matches!(r.status, ItemStatus::PartiallyFailed | ItemStatus::Failed))
        .map(problem)
        .collect();

    let output = StatusOutput {
        scope: &scope,
        ledger: path.display().to_string(),
        total: ledger.items.len(),
        succeeded: ledger.count(ItemStatus::Succeeded),
        partially_failed: ledger.count(ItemStatus::PartiallyFailed),
        failed: ledger.count(ItemStatus::Failed),
        pending: ledger.count(ItemStatus::Pending),
        problems,
    };

    if json {
        return print_json(&output);
    }

    println!("Scope: {} ({})", output.scope, output.ledger);
    if output.total == 0 {
        println!("No items recorded yet.");
        return Ok(());
    }
    println!("  items:            {}", output.total);
    println!("  succeeded:        {}", output.succeeded);
    println!("  partially failed: {}", output.partially_failed);
    println!("  failed:           {}", output.failed);
    println!("  pending:          {}", output.pending);

    if !output.problems.is_empty() {
        println!();
        let rows = output
            .problems
            .iter()
            .map(|p| {
                vec![
                    p.item_id.to_string(),
                    p.display_name.to_string(),
                    p.status.to_string(),
                    p.runs.to_string(),
                    p.last_error.unwrap_or("-").to_string(),
                ]
            })
            .collect();
        print_table(&["ID", "NAME", "STATUS", "RUNS", "LAST ERROR"], rows);
    }
    Ok(())
}

fn problem(record: &ProgressRecord) -> Problem<'_> {
    Problem {
        item_id: &record.item_id,
        display_name: &record.display_name,
        status: record.status,
        runs: record.runs,
        last_error: record.last_error.as_deref(),
    }
}
