//! `noderoll status` — per-node phase and versions as stored on the nodes.

use std::process::ExitCode;

use anyhow::Result;
use clap::{Args, ValueEnum};

use noderoll_core::{LabelSelector, NodeTarget, NoderollConfig};

use crate::context;

#[derive(Clone, Copy, ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

#[derive(Args)]
pub struct StatusArgs {
    /// Label expression; all nodes with rollout state when omitted
    #[arg(short = 'l', long, default_value = "")]
    pub selector: String,

    /// Only nodes carrying this taint key
    #[arg(long)]
    pub taint_key: Option<String>,

    #[arg(short = 'o', long, value_enum, default_value = "text")]
    pub format: OutputFormat,
}

pub async fn status(config: &NoderollConfig, args: StatusArgs) -> Result<ExitCode> {
    let selector: LabelSelector = args.selector.parse()?;
    let sequencer = context::sequencer(config).await?;
    let nodes = sequencer
        .status(&selector, args.taint_key.as_deref())
        .await?;

    match args.format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&nodes)?),
        OutputFormat::Text => print!("{}", format_table(&nodes)),
    }
    Ok(ExitCode::SUCCESS)
}

fn format_table(nodes: &[NodeTarget]) -> String {
    let width = nodes
        .iter()
        .map(|n| n.hostname.len())
        .max()
        .unwrap_or(0)
        .max("NODE".len());

    let mut out = format!("{:<width$}  {:<13} {:<10} {}\n", "NODE", "PHASE", "CURRENT", "TARGET");
    for n in nodes {
        out.push_str(&format!(
            "{:<width$}  {:<13} {:<10} {}\n",
            n.hostname,
            n.phase.map_or("-", |p| p.as_str()),
            n.current_version.as_deref().unwrap_or("-"),
            n.intent.as_deref().unwrap_or("-"),
        ));
    }
    out
}
