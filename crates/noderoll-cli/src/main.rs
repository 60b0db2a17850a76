use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand, ValueEnum};
use tracing_subscriber::EnvFilter;

mod commands;
mod context;

#[derive(Parser)]
#[command(
    name = "noderoll",
    about = "noderoll — node-by-node upgrades with per-node verification and rollback",
    version,
    propagate_version = true,
)]
struct Cli {
    /// Path to noderoll.toml (built-in defaults when omitted)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Log output format
    #[arg(long, global = true, value_enum, default_value = "text")]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Upgrade the selected nodes one at a time.
    ///
    /// Each node is cordoned, optionally drained, upgraded, verified with
    /// the given workload and uncordoned. The first node that fails is
    /// rolled back and the campaign stops. Re-running the same command
    /// resumes an interrupted campaign.
    Run(commands::run::RunArgs),
    /// Roll one node back to the previous release revision
    Rollback(commands::rollback::RollbackArgs),
    /// Show per-node rollout phase and versions
    Status(commands::status::StatusArgs),
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();
    init_tracing(cli.log_format);

    let config = context::load_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Run(args) => commands::run::run(&config, args).await,
        Commands::Rollback(args) => commands::rollback::rollback(&config, args).await,
        Commands::Status(args) => commands::status::status(&config, args).await,
    }
}

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,kube=warn"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    match format {
        LogFormat::Text => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
}
