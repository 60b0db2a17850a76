//! `noderoll run` — submit a campaign.

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::Args;
use tracing::info;

use noderoll_core::{Campaign, NoderollConfig, parse_duration, parse_version};

use crate::context;

#[derive(Args)]
pub struct RunArgs {
    /// Version to upgrade to, e.g. 3.27.0 or v3.27.0
    #[arg(short = 't', long)]
    pub target_version: String,

    /// Label expression selecting nodes, e.g. "node-role.kubernetes.io/worker"
    #[arg(short = 'l', long, default_value = "")]
    pub selector: String,

    /// Only nodes carrying this taint key
    #[arg(long)]
    pub taint_key: Option<String>,

    /// Taint value to match together with --taint-key
    #[arg(long, requires = "taint_key")]
    pub taint_value: Option<String>,

    /// Evict pods from each node before upgrading it
    #[arg(long)]
    pub drain: bool,

    /// Drain timeout, e.g. 300s or 5m (default from config)
    #[arg(long)]
    pub drain_timeout: Option<String>,

    /// File holding the verification workload definition
    #[arg(short = 'f', long)]
    pub verification_template: PathBuf,

    /// Namespace for verification workloads (default from config)
    #[arg(long)]
    pub verification_namespace: Option<String>,

    /// Release name (default from config)
    #[arg(long)]
    pub release: Option<String>,

    /// Release namespace (default from config)
    #[arg(long)]
    pub release_namespace: Option<String>,

    /// Print the ordered node plan and exit without changing anything
    #[arg(long)]
    pub dry_run: bool,
}

pub async fn run(config: &NoderollConfig, args: RunArgs) -> Result<ExitCode> {
    let campaign = campaign(config, &args)?;
    let sequencer = context::sequencer(config).await?;

    if args.dry_run {
        let plan = sequencer.plan(&campaign).await?;
        info!(nodes = plan.len(), "dry run, nothing changed");
        println!("{}", serde_json::to_string_pretty(&plan)?);
        return Ok(ExitCode::SUCCESS);
    }

    let sequencer = sequencer.with_cancel(context::cancel_on_interrupt());
    let report = sequencer.run(&campaign).await?;
    println!("{}", serde_json::to_string_pretty(&report)?);

    Ok(if report.succeeded() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

/// Merge flags over config defaults.
fn campaign(config: &NoderollConfig, args: &RunArgs) -> Result<Campaign> {
    let drain_timeout = match &args.drain_timeout {
        Some(s) => parse_duration(s).with_context(|| format!("invalid --drain-timeout {s:?}"))?,
        None => config.rollout.drain_timeout()?,
    };

    let verification_template = std::fs::read_to_string(&args.verification_template)
        .with_context(|| {
            format!(
                "reading verification template {}",
                args.verification_template.display()
            )
        })?;

    Ok(Campaign {
        target_version: parse_version(&args.target_version)?,
        release_name: args
            .release
            .clone()
            .unwrap_or_else(|| config.release.name.clone()),
        release_namespace: args
            .release_namespace
            .clone()
            .unwrap_or_else(|| config.release.namespace.clone()),
        node_selector: args.selector.clone(),
        taint_key: args.taint_key.clone(),
        taint_value: args.taint_value.clone(),
        drain_enabled: args.drain,
        drain_timeout,
        verification_template,
        verification_namespace: args
            .verification_namespace
            .clone()
            .unwrap_or_else(|| config.rollout.verification_namespace.clone()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn args(template: PathBuf) -> RunArgs {
        RunArgs {
            target_version: "v3.27.0".into(),
            selector: "role=worker".into(),
            taint_key: None,
            taint_value: None,
            drain: true,
            drain_timeout: None,
            verification_template: template,
            verification_namespace: None,
            release: Some("calico-custom".into()),
            release_namespace: None,
            dry_run: false,
        }
    }

    #[test]
    fn flags_override_config() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("check.yaml");
        std::fs::write(&path, "node: {{NODE_NAME}}\n").unwrap();

        let config = NoderollConfig::default();
        let mut a = args(path);
        a.drain_timeout = Some("90s".into());
        let c = campaign(&config, &a).unwrap();

        assert_eq!(c.target_version, noderoll_core::Version::new(3, 27, 0));
        assert_eq!(c.release_name, "calico-custom");
        assert_eq!(c.release_namespace, config.release.namespace);
        assert_eq!(c.drain_timeout, Duration::from_secs(90));
        assert_eq!(c.verification_namespace, "default");
        assert!(c.verification_template.contains("{{NODE_NAME}}"));
    }

    #[test]
    fn missing_template_file_is_an_error() {
        let config = NoderollConfig::default();
        let err = campaign(&config, &args(PathBuf::from("/nonexistent/check.yaml")))
            .unwrap_err();
        assert!(err.to_string().contains("verification template"));
    }
}
