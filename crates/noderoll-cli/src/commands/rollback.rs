//! `noderoll rollback` — manual rollback of one node.

use std::process::ExitCode;

use anyhow::Result;
use clap::Args;

use noderoll_core::NoderollConfig;
use noderoll_rollout::NodeOutcome;

use crate::context;

#[derive(Args)]
pub struct RollbackArgs {
    /// Hostname of the node to roll back
    #[arg(short, long)]
    pub node: String,

    /// Release name (default from config)
    #[arg(long)]
    pub release: Option<String>,

    /// Release namespace (default from config)
    #[arg(long)]
    pub release_namespace: Option<String>,
}

pub async fn rollback(config: &NoderollConfig, args: RollbackArgs) -> Result<ExitCode> {
    let release = args.release.unwrap_or_else(|| config.release.name.clone());
    let namespace = args
        .release_namespace
        .unwrap_or_else(|| config.release.namespace.clone());

    let machine = context::machine(config).await?;
    let outcome = machine.manual_rollback(&args.node, &release, &namespace).await;

    match outcome {
        NodeOutcome::RolledBack(_) => {
            println!("✓ {} rolled back", args.node);
            Ok(ExitCode::SUCCESS)
        }
        NodeOutcome::FatalAbort(failure) => {
            eprintln!("✗ rollback of {} failed", args.node);
            println!("{}", serde_json::to_string_pretty(&failure)?);
            Ok(ExitCode::FAILURE)
        }
        NodeOutcome::Completed { .. } => Ok(ExitCode::SUCCESS),
    }
}
