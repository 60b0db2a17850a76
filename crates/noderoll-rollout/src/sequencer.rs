//! Fleet sequencer — one node at a time, stop at the first failure.

use tokio::sync::watch;
use tracing::{error, info, warn};

use noderoll_core::{Campaign, ConfigError, LabelSelector, NodeTarget, Phase, Version};

use crate::error::RolloutResult;
use crate::machine::{NodeOutcome, NodeUpgrade};
use crate::report::{CampaignReport, PlannedAction, PlannedNode};
use crate::selector::resolve;

pub struct FleetSequencer {
    machine: NodeUpgrade,
    minimum_version: Version,
    cancel: watch::Receiver<bool>,
}

impl FleetSequencer {
    pub fn new(machine: NodeUpgrade, minimum_version: Version) -> Self {
        let (_, cancel) = watch::channel(false);
        Self {
            machine,
            minimum_version,
            cancel,
        }
    }

    /// Stop before the next node once `cancel` reads `true`.
    pub fn with_cancel(mut self, cancel: watch::Receiver<bool>) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn machine(&self) -> &NodeUpgrade {
        &self.machine
    }

    /// Run the campaign to completion, the first failing node, or cancellation.
    ///
    /// Configuration problems are returned as errors before any node is
    /// touched. Node failures are reported in the returned report.
    pub async fn run(&self, campaign: &Campaign) -> RolloutResult<CampaignReport> {
        let nodes = self.ordered_nodes(campaign).await?;
        let target = campaign.target_version.to_string();
        let mut report = CampaignReport::new(&target, nodes.len());

        info!(
            target = %target,
            release = %campaign.release_name,
            nodes = nodes.len(),
            "campaign started"
        );

        for mut node in nodes {
            if *self.cancel.borrow() {
                warn!(next = %node.hostname, "campaign cancelled");
                report.cancelled = true;
                break;
            }

            if plan_for(&node, &target) == PlannedAction::Skip {
                info!(node = %node.hostname, "already completed, skipping");
                report.nodes_skipped.push(node.hostname.clone());
                continue;
            }

            match self.machine.advance(&mut node, campaign).await {
                NodeOutcome::Completed { .. } => {
                    report.nodes_completed.push(node.hostname.clone());
                }
                NodeOutcome::RolledBack(failure) => {
                    warn!(
                        node = %failure.hostname,
                        error = %failure.error,
                        "campaign stopped: node rolled back"
                    );
                    report.first_failed_node = Some(failure);
                    report.aborted = true;
                    break;
                }
                NodeOutcome::FatalAbort(failure) => {
                    error!(node = %failure.hostname, error = %failure.error, "campaign aborted");
                    report.first_failed_node = Some(failure);
                    report.aborted = true;
                    break;
                }
            }
        }

        info!(
            target = %target,
            completed = report.nodes_completed.len(),
            skipped = report.nodes_skipped.len(),
            aborted = report.aborted,
            cancelled = report.cancelled,
            "campaign finished"
        );
        Ok(report)
    }

    /// What `run` would do, without touching anything.
    pub async fn plan(&self, campaign: &Campaign) -> RolloutResult<Vec<PlannedNode>> {
        let target = campaign.target_version.to_string();
        Ok(self
            .ordered_nodes(campaign)
            .await?
            .into_iter()
            .map(|node| {
                let action = plan_for(&node, &target);
                PlannedNode { node, action }
            })
            .collect())
    }

    /// Persisted status of every node matching `selector`, or of every node
    /// carrying rollout annotations when the selector is empty.
    pub async fn status(
        &self,
        selector: &LabelSelector,
        taint_key: Option<&str>,
    ) -> RolloutResult<Vec<NodeTarget>> {
        let cluster = self.machine.cluster();
        let store = self.machine.store();
        let everything = selector.is_empty() && taint_key.is_none();

        let mut hostnames = cluster.get_nodes(selector, taint_key, None).await?;
        hostnames.sort();

        let mut nodes = Vec::new();
        for (index, hostname) in hostnames.into_iter().enumerate() {
            let status = store.read(&hostname).await?;
            if everything && status.phase.is_none() && status.current_version.is_none() {
                continue;
            }
            nodes.push(NodeTarget::new(hostname, index).with_status(status));
        }
        Ok(nodes)
    }

    /// Validate, resolve, load persisted state and apply the in-flight guard.
    ///
    /// A node found mid-turn for this campaign is moved to the front.
    async fn ordered_nodes(&self, campaign: &Campaign) -> RolloutResult<Vec<NodeTarget>> {
        let selector = campaign.validate(&self.minimum_version)?;

        let cluster = self.machine.cluster();
        let store = self.machine.store();
        let target = campaign.target_version.to_string();

        let mut nodes = resolve(cluster.as_ref(), campaign, &selector).await?;
        for node in nodes.iter_mut() {
            let status = store.read(&node.hostname).await?;
            node.apply(status);
        }

        // The guard looks past the selection: a half-upgraded node anywhere
        // in the cluster blocks every campaign but the one it belongs to.
        let mut in_flight = Vec::new();
        for hostname in cluster.get_nodes(&LabelSelector::default(), None, None).await? {
            let status = store.read(&hostname).await?;
            if status.in_flight() {
                in_flight.push((hostname, status));
            }
        }

        if in_flight.len() > 1 {
            let hosts: Vec<_> = in_flight.iter().map(|(h, _)| h.as_str()).collect();
            return Err(ConfigError::InFlight {
                hostname: hosts.join(","),
                detail: "more than one node is mid-upgrade".to_string(),
            }
            .into());
        }

        if let Some((hostname, status)) = in_flight.pop() {
            let Some(position) = nodes.iter().position(|n| n.hostname == hostname) else {
                return Err(ConfigError::InFlight {
                    hostname,
                    detail: "node is outside this campaign's selection".to_string(),
                }
                .into());
            };
            let intent = status.target_version.unwrap_or_default();
            if intent != target {
                let detail = if status.phase == Some(Phase::RollingBack) {
                    format!(
                        "node is rolling back from {intent:?}; finish it with `noderoll rollback`"
                    )
                } else {
                    format!("node is mid-upgrade to {intent:?}, not {target}")
                };
                return Err(ConfigError::InFlight { hostname, detail }.into());
            }
            let phase = status.phase.map_or("unknown", Phase::as_str);
            info!(node = %hostname, phase, "resuming in-flight node first");
            let node = nodes.remove(position);
            nodes.insert(0, node);
        }

        Ok(nodes)
    }
}

fn plan_for(node: &NodeTarget, target: &str) -> PlannedAction {
    match node.phase {
        Some(Phase::Completed) if node.current_version.as_deref() == Some(target) => {
            PlannedAction::Skip
        }
        Some(phase) if !phase.is_terminal() => PlannedAction::Resume(phase),
        _ => PlannedAction::Start,
    }
}
