mod cmd;
mod output;
mod root;

use clap::{Parser, Subcommand};
use cmd::{config::ConfigSubcommand, init::InitArgs, run::RunArgs};
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "remedy",
    about = "Resumable batch remediation of shop products (dry run by default, safe to interrupt and relaunch)",
    version,
    propagate_version = true
)]
struct Cli {
    /// Project root (default: auto-detect from .remedy/)
    #[arg(long, global = true, env = "REMEDY_ROOT")]
    root: Option<PathBuf>,

    /// Output as JSON
    #[arg(long, global = true, short = 'j')]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create .remedy/ with a config for one remediation campaign
    Init(InitArgs),

    /// Enumerate products and remediate the ones not done yet
    Run(RunArgs),

    /// Show ledger counts and the items that failed
    Status {
        /// Ledger to report on (default: the configured scope)
        #[arg(long)]
        scope: Option<String>,
    },

    /// Discard recorded progress so the next run starts over
    Reset {
        /// Ledger to discard (default: the configured scope)
        #[arg(long, conflicts_with = "all")]
        scope: Option<String>,

        /// Discard every ledger
        #[arg(long)]
        all: bool,
    },

    /// Inspect and validate the configuration
    Config {
        #[command(subcommand)]
        subcommand: ConfigSubcommand,
    },
}

fn main() {
    let cli = Cli::parse();

    let default_level = match &cli.command {
        Commands::Run(_) => tracing::Level::INFO,
        _ => tracing::Level::WARN,
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive(default_level.into()),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let root = root::resolve_root(cli.root.as_deref());

    let result = match cli.command {
        Commands::Init(args) => cmd::init::run(&root, args),
        Commands::Run(args) => cmd::run::run(&root, args, cli.json),
        Commands::Status { scope } => cmd::status::run(&root, scope.as_deref(), cli.json),
        Commands::Reset { scope, all } => cmd::reset::run(&root, scope.as_deref(), all, cli.json),
        Commands::Config { subcommand } => cmd::config::run(&root, subcommand, cli.json),
    };

    if let Err(e) = result {
        // Print the full error chain (anyhow's alternate Display)
        eprintln!("error: {e:#}");
        std::process::exit(1);
    }
}
