//! Wiring: config file → adapters → state machine.

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::sync::watch;
use tracing::{debug, warn};

use noderoll_cluster::{ControlPlane, KubeControlPlane};
use noderoll_core::NoderollConfig;
use noderoll_release::HelmReleaseManager;
use noderoll_rollout::{FleetSequencer, NodeUpgrade};
use noderoll_state::StatusStore;
use noderoll_verify::VerificationRunner;

pub fn load_config(path: Option<&Path>) -> Result<NoderollConfig> {
    let config = NoderollConfig::load(path).with_context(|| match path {
        Some(p) => format!("loading config {}", p.display()),
        None => "loading default config".to_string(),
    })?;
    debug!(release = %config.release.name, namespace = %config.release.namespace, "config loaded");
    Ok(config)
}

/// Build the per-node state machine against the current kubeconfig context.
pub async fn machine(config: &NoderollConfig) -> Result<NodeUpgrade> {
    let rollout = &config.rollout;
    let poll = rollout.poll_interval()?;

    let kube = KubeControlPlane::try_default()
        .await
        .context("connecting to the Kubernetes API")?
        .with_poll_interval(poll);
    let releases = HelmReleaseManager::new(&config.release, kube.client()).with_poll_interval(poll);
    let cluster: Arc<dyn ControlPlane> = Arc::new(kube);

    let store = StatusStore::new(cluster.clone(), &config.status.annotation_prefix);
    let verifier = VerificationRunner::new(cluster.clone(), rollout.verification_timeout()?)
        .with_poll_interval(poll);

    Ok(NodeUpgrade::new(
        cluster,
        Arc::new(releases),
        store,
        verifier,
        rollout.ready_timeout()?,
    ))
}

pub async fn sequencer(config: &NoderollConfig) -> Result<FleetSequencer> {
    let minimum = config.rollout.minimum_version()?;
    Ok(FleetSequencer::new(machine(config).await?, minimum))
}

/// First Ctrl-C stops the campaign at the next node boundary; a second
/// one exits immediately, leaving the node resumable.
pub fn cancel_on_interrupt() -> watch::Receiver<bool> {
    let (tx, rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, stopping after the current node");
            let _ = tx.send(true);
        }
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("second interrupt, exiting now; re-run to resume");
            std::process::exit(130);
        }
    });
    rx
}
