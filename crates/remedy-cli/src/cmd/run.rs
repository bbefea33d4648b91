use crate::output::{print_json, print_table};
use anyhow::Context;
use clap::Args;
use remedy_core::{
    config::{Config, WarnLevel},
    orchestrator::{Orchestrator, RunSummary},
    paths,
    progress::FileProgressStore,
    rate_limit::RateLimiter,
    retry::RetryExecutor,
};
use shop_client::{metafield_keys, product_action, ProductFilter, ShopClient, ShopConfig};
use std::path::Path;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

#[derive(Args)]
pub struct RunArgs {
    /// Write changes (default: dry run, nothing is written)
    #[arg(long)]
    pub apply: bool,

    /// Process at most N items not finished by an earlier run
    #[arg(long, value_name = "N")]
    pub limit: Option<usize>,

    /// Shop domain, e.g. my-shop.myshopify.com
    #[arg(long, env = "SHOPIFY_DOMAIN")]
    pub domain: Option<String>,

    /// Admin API access token
    #[arg(long, env = "SHOPIFY_TOKEN", hide_env_values = true)]
    pub token: Option<String>,

    /// Send requests to this base URL instead of https://<domain>
    #[arg(long, env = "REMEDY_API_URL", hide = true)]
    pub api_url: Option<String>,
}

pub fn run(root: &Path, args: RunArgs, json: bool) -> anyhow::Result<()> {
    let config = Config::load(root).context("failed to load config")?;
    config.ensure_valid()?;
    for w in config.validate() {
        if w.level == WarnLevel::Warning {
            tracing::warn!("config: {}", w.message);
        }
    }

    let dry_run = !args.apply;
    let limit = args.limit;
    let shop = ShopConfig::new(
        args.domain.unwrap_or_default(),
        args.token.unwrap_or_default(),
        &config.api,
    )?;
    let shop = match args.api_url {
        Some(url) => shop.with_base_url(url),
        None => shop,
    };
    let client = ShopClient::new(shop)
        .context("failed to build HTTP client")?
        .with_metafields(&metafield_keys(&config.remediation));
    let client = Arc::new(client);
    let limiter = Arc::new(RateLimiter::new(config.rate_limit.policy()));
    let executor = Arc::new(RetryExecutor::new(limiter, config.retry.policy()));
    let action = product_action(&config.remediation);
    let store = FileProgressStore::new(paths::progress_dir(root), &config.remediation.scope)?;
    let filter = ProductFilter {
        vendor: config.remediation.vendor.clone(),
        page_size: config.remediation.page_size,
    };

    let cancel = CancellationToken::new();
    let mut orchestrator = Orchestrator::new(client, executor, action, store)
        .page_max_attempts(config.retry.page_max_attempts)
        .dry_run(dry_run)
        .with_cancellation(cancel.clone());

    tracing::info!(
        scope = %config.remediation.scope,
        vendor = %config.remediation.vendor,
        dry_run,
        "starting run"
    );

    let rt = tokio::runtime::Runtime::new()?;
    let summary = rt.block_on(async {
        let interrupt = tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::warn!("interrupted: finishing the current sub-step, then stopping");
                cancel.cancel();
            }
        });
        let result = orchestrator.run(&filter, limit).await;
        interrupt.abort();
        result
    })?;

    if json {
        print_json(&summary)?;
    } else {
        print_summary(&summary);
    }
    Ok(())
}

fn print_summary(summary: &RunSummary) {
    if summary.dry_run {
        println!("Dry run: nothing was written. Re-run with --apply to write changes.");
    }
    println!(
        "Items: {} total, {} already done",
        summary.items_total, summary.already_done
    );
    println!("  succeeded:        {}", summary.succeeded);
    println!("  partially failed: {}", summary.partially_failed);
    println!("  failed:           {}", summary.failed);
    println!("  not started:      {}", summary.not_started);
    println!(
        "Requests: {} ({} throttled)",
        summary.remote_requests_made, summary.throttled_count
    );

    if !summary.failures.is_empty() {
        println!();
        let rows = summary
            .failures
            .iter()
            .map(|f| {
                vec![
                    f.item_id.clone(),
                    f.display_name.clone(),
                    f.status.to_string(),
                    f.error.clone(),
                ]
            })
            .collect();
        print_table(&["ID", "NAME", "STATUS", "ERROR"], rows);
    }

    if summary.cancelled {
        println!("\nInterrupted. Relaunch to continue where this run stopped.");
    } else if summary.not_started > 0 {
        println!("\n{} item(s) left for the next run.", summary.not_started);
    }
}
