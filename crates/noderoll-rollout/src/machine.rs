//! Node upgrade state machine — drives one node through its turn.
//!
//! Each phase is persisted before its action runs. Resuming a node re-enters
//! at its persisted phase; every action is safe to repeat (cordon, drain,
//! upgrade to the version already deployed, restart, verify).

use std::sync::Arc;
use std::time::Duration;

use tracing::{error, info, warn};

use noderoll_cluster::ControlPlane;
use noderoll_core::{Campaign, NodeTarget, Phase, Version, parse_version};
use noderoll_release::{ReleaseError, ReleaseManager, ReleaseState};
use noderoll_state::StatusStore;
use noderoll_verify::{VerificationRun, VerificationRunner};

use crate::error::NodeError;
use crate::report::NodeFailure;

/// Result of one node's turn.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeOutcome {
    Completed { verification: VerificationRun },
    /// The node was reverted and uncordoned.
    RolledBack(NodeFailure),
    /// The turn stopped without (or while) rolling back.
    FatalAbort(NodeFailure),
}

impl NodeOutcome {
    pub fn is_completed(&self) -> bool {
        matches!(self, NodeOutcome::Completed { .. })
    }

    pub fn failure(&self) -> Option<&NodeFailure> {
        match self {
            NodeOutcome::Completed { .. } => None,
            NodeOutcome::RolledBack(f) | NodeOutcome::FatalAbort(f) => Some(f),
        }
    }
}

/// How a failed step must be handled.
enum Failure {
    /// Nothing destructive happened yet; stop here.
    Abort(NodeError),
    /// The node was touched; take the rollback branch.
    Revert {
        error: NodeError,
        revert_release: bool,
        verification: Option<VerificationRun>,
    },
}

impl Failure {
    fn revert(error: impl Into<NodeError>, revert_release: bool) -> Self {
        Failure::Revert {
            error: error.into(),
            revert_release,
            verification: None,
        }
    }
}

/// Release coordinates plus the version the node is moving away from.
struct RollbackPlan<'a> {
    release: &'a str,
    namespace: &'a str,
    /// The release is reverted only while it still deploys this version, and
    /// the instance is restarted only while it still runs it.
    reverts_from: &'a Version,
    revert_release: bool,
}

/// Position on the happy path, for resume decisions.
fn progress(phase: Phase) -> u8 {
    match phase {
        Phase::Preparing => 0,
        Phase::Cordoned => 1,
        Phase::Draining => 2,
        Phase::Upgrading => 3,
        Phase::Verifying => 4,
        Phase::Completed | Phase::RollingBack | Phase::RolledBack => 5,
    }
}

pub struct NodeUpgrade {
    cluster: Arc<dyn ControlPlane>,
    releases: Arc<dyn ReleaseManager>,
    store: StatusStore,
    verifier: VerificationRunner,
    ready_timeout: Duration,
}

impl NodeUpgrade {
    pub fn new(
        cluster: Arc<dyn ControlPlane>,
        releases: Arc<dyn ReleaseManager>,
        store: StatusStore,
        verifier: VerificationRunner,
        ready_timeout: Duration,
    ) -> Self {
        Self {
            cluster,
            releases,
            store,
            verifier,
            ready_timeout,
        }
    }

    pub fn cluster(&self) -> &Arc<dyn ControlPlane> {
        &self.cluster
    }

    pub fn releases(&self) -> &Arc<dyn ReleaseManager> {
        &self.releases
    }

    pub fn store(&self) -> &StatusStore {
        &self.store
    }

    /// Drive `node` to a terminal phase for `campaign`.
    ///
    /// A node with no phase, or a terminal one, starts a fresh turn. A node
    /// mid-turn for the same target resumes from its persisted phase.
    pub async fn advance(&self, node: &mut NodeTarget, campaign: &Campaign) -> NodeOutcome {
        let target = &campaign.target_version;

        match self.store.read(&node.hostname).await {
            Ok(status) => node.apply(status),
            Err(e) => return self.abort(node, e.into()),
        }

        let start = match node.phase {
            Some(phase) if !phase.is_terminal() => {
                let intent = node.intent.clone().unwrap_or_default();
                if intent != target.to_string() {
                    return self.abort(
                        node,
                        NodeError::ForeignIntent {
                            intent,
                            target: target.to_string(),
                        },
                    );
                }
                info!(node = %node.hostname, %phase, "resuming node");
                phase
            }
            _ => Phase::Preparing,
        };

        if start == Phase::RollingBack {
            if let Err(e) = self.cluster.cordon(&node.hostname).await {
                return self.abort(node, e.into());
            }
            let plan = RollbackPlan {
                release: &campaign.release_name,
                namespace: &campaign.release_namespace,
                reverts_from: target,
                revert_release: node.revert_release,
            };
            return self.roll_back(node, plan, NodeError::Interrupted, None).await;
        }

        match self.drive(node, campaign, start).await {
            Ok(verification) => self.complete(node, target, verification).await,
            Err(Failure::Abort(e)) => self.abort(node, e),
            Err(Failure::Revert {
                error,
                revert_release,
                verification,
            }) => {
                warn!(
                    node = %node.hostname,
                    phase = ?node.phase,
                    error = %error,
                    revert_release,
                    "node failed, rolling back"
                );
                let plan = RollbackPlan {
                    release: &campaign.release_name,
                    namespace: &campaign.release_namespace,
                    reverts_from: target,
                    revert_release,
                };
                self.roll_back(node, plan, error, verification).await
            }
        }
    }

    /// Operator-requested rollback of one node, outside any campaign.
    ///
    /// The release is reverted only when the node runs what the release
    /// currently deploys; a node ahead of the release is restarted onto it.
    /// A node with nothing to revert is refused before it is cordoned. A
    /// node left in `rolling-back` has that rollback finished instead.
    pub async fn manual_rollback(
        &self,
        hostname: &str,
        release: &str,
        namespace: &str,
    ) -> NodeOutcome {
        let mut node = NodeTarget::new(hostname, 0);
        match self.store.read(hostname).await {
            Ok(status) => node.apply(status),
            Err(e) => return self.abort(&node, e.into()),
        }

        let deployed = match self.releases.deployed(release, namespace).await {
            Ok(info) => info,
            Err(e) => return self.abort(&node, e.into()),
        };
        if let Some(status) = busy_status(&deployed.state) {
            return self.abort(
                &node,
                NodeError::ReleaseBusy {
                    release: release.to_string(),
                    status,
                },
            );
        }
        let reported = match self
            .releases
            .current_reported_version(release, namespace, hostname)
            .await
        {
            Ok(v) => v,
            Err(e) => return self.abort(&node, e.into()),
        };

        if node.phase == Some(Phase::RollingBack) {
            let reverts_from = node
                .intent
                .as_deref()
                .and_then(|intent| parse_version(intent).ok())
                .unwrap_or_else(|| reported.clone());
            if let Err(e) = self.cluster.cordon(hostname).await {
                return self.abort(&node, e.into());
            }
            info!(node = %hostname, %reverts_from, "finishing interrupted rollback");
            let plan = RollbackPlan {
                release,
                namespace,
                reverts_from: &reverts_from,
                revert_release: node.revert_release,
            };
            return self.roll_back(&mut node, plan, NodeError::Interrupted, None).await;
        }

        let already_reverted = node.phase == Some(Phase::RolledBack)
            && node.current_version.as_deref() == Some(reported.to_string().as_str());
        if already_reverted || reported < deployed.version {
            return self.abort(
                &node,
                NodeError::NothingToRevert {
                    reported,
                    deployed: deployed.version,
                },
            );
        }
        let revert_release = reported == deployed.version;
        if revert_release && deployed.revision < 2 {
            return self.abort(
                &node,
                ReleaseError::NoPreviousRevision {
                    release: release.to_string(),
                    namespace: namespace.to_string(),
                }
                .into(),
            );
        }

        if let Err(e) = self.cluster.cordon(hostname).await {
            return self.abort(&node, e.into());
        }
        info!(node = %hostname, %reported, deployed = %deployed.version, "manual rollback");

        let plan = RollbackPlan {
            release,
            namespace,
            reverts_from: &reported,
            revert_release,
        };
        self.roll_back(&mut node, plan, NodeError::Manual, None).await
    }

    /// The happy path from `start` up to a passed verification.
    async fn drive(
        &self,
        node: &mut NodeTarget,
        campaign: &Campaign,
        start: Phase,
    ) -> Result<VerificationRun, Failure> {
        let host = node.hostname.clone();
        let target = &campaign.target_version;
        let from = progress(start);

        if start == Phase::Preparing {
            self.prepare(node, campaign).await.map_err(Failure::Abort)?;
        }

        // Cordoned: the first destructive step. Re-applied on every resume.
        if from <= progress(Phase::Cordoned) {
            self.transition(node, Phase::Cordoned)
                .await
                .map_err(Failure::Abort)?;
        }
        self.cluster
            .cordon(&host)
            .await
            .map_err(|e| Failure::Abort(e.into()))?;

        if campaign.drain_enabled && from <= progress(Phase::Draining) {
            self.transition(node, Phase::Draining)
                .await
                .map_err(|e| Failure::revert(e, false))?;
            let evicted = self
                .cluster
                .evict_pods(&host, campaign.drain_timeout)
                .await
                .map_err(|e| Failure::revert(e, false))?;
            info!(node = %host, evicted, "node drained");
        }

        if from <= progress(Phase::Upgrading) {
            self.transition(node, Phase::Upgrading)
                .await
                .map_err(|e| Failure::revert(e, false))?;
            self.upgrade(&host, campaign).await?;
        }

        self.transition(node, Phase::Verifying)
            .await
            .map_err(|e| Failure::revert(e, true))?;
        let run = self
            .verifier
            .run(&host, campaign)
            .await
            .map_err(|e| Failure::revert(e, true))?;
        if run.succeeded() {
            return Ok(run);
        }
        warn!(node = %host, %target, outcome = %run.outcome, "verification did not pass");
        Err(Failure::Revert {
            error: NodeError::VerificationFailed {
                outcome: run.outcome,
                exit_code: run.exit_code,
            },
            revert_release: true,
            verification: Some(run),
        })
    }

    /// Checks and the intent write. Nothing here touches the node itself.
    async fn prepare(&self, node: &mut NodeTarget, campaign: &Campaign) -> Result<(), NodeError> {
        let host = node.hostname.clone();
        let target = &campaign.target_version;
        let release = &campaign.release_name;
        let namespace = &campaign.release_namespace;

        let deployed = self.releases.deployed(release, namespace).await?;
        if let Some(status) = busy_status(&deployed.state) {
            return Err(NodeError::ReleaseBusy {
                release: release.clone(),
                status,
            });
        }

        let reported = self
            .releases
            .current_reported_version(release, namespace, &host)
            .await?;
        if reported > *target {
            return Err(NodeError::DowngradeRefused {
                reported,
                target: target.clone(),
            });
        }

        let known_good = node.current_version.is_none().then_some(&reported);
        self.store.prepare(&host, target, known_good).await?;
        node.phase = Some(Phase::Preparing);
        node.intent = Some(target.to_string());
        node.revert_release = false;
        if known_good.is_some() {
            node.current_version = Some(reported.to_string());
        }
        info!(node = %host, %reported, %target, "node prepared");
        Ok(())
    }

    /// Move the release to the target and cycle only this node's instance.
    async fn upgrade(&self, host: &str, campaign: &Campaign) -> Result<(), Failure> {
        let target = &campaign.target_version;
        let release = &campaign.release_name;
        let namespace = &campaign.release_namespace;

        let reported = self
            .releases
            .current_reported_version(release, namespace, host)
            .await
            .map_err(|e| Failure::revert(e, true))?;

        if reported >= *target {
            info!(node = %host, %reported, "node already at target, skipping upgrade");
        } else {
            let revision = self
                .releases
                .upgrade(release, namespace, target)
                .await
                .map_err(|e| {
                    // A busy release was not modified by this call.
                    let touched = !matches!(e, ReleaseError::Busy { .. });
                    Failure::revert(e, touched)
                })?;
            info!(node = %host, %release, revision, "release upgraded");
            self.releases
                .restart_instance(release, namespace, host)
                .await
                .map_err(|e| Failure::revert(e, true))?;
        }

        self.releases
            .wait_ready(release, namespace, host, self.ready_timeout)
            .await
            .map_err(|e| Failure::revert(e, true))?;

        let running = self
            .releases
            .current_reported_version(release, namespace, host)
            .await
            .map_err(|e| Failure::revert(e, true))?;
        if running != *target {
            warn!(node = %host, %running, %target, "instance did not pick up the target");
            return Err(Failure::revert(
                NodeError::VersionMismatch {
                    expected: target.clone(),
                    reported: running,
                },
                true,
            ));
        }
        Ok(())
    }

    async fn complete(
        &self,
        node: &mut NodeTarget,
        target: &Version,
        verification: VerificationRun,
    ) -> NodeOutcome {
        let host = node.hostname.clone();
        if let Err(e) = self.cluster.uncordon(&host).await {
            return self.abort_with(node, e.into(), Some(verification));
        }
        if let Err(e) = self.store.complete(&host, target).await {
            return self.abort_with(node, e.into(), Some(verification));
        }
        node.phase = Some(Phase::Completed);
        node.current_version = Some(target.to_string());
        info!(node = %host, version = %target, "node completed");
        NodeOutcome::Completed { verification }
    }

    /// The rollback branch: revert, restore the instance, uncordon.
    ///
    /// If any step fails the node keeps `rolling-back` and stays cordoned,
    /// so a later run resumes the rollback.
    async fn roll_back(
        &self,
        node: &mut NodeTarget,
        plan: RollbackPlan<'_>,
        cause: NodeError,
        verification: Option<VerificationRun>,
    ) -> NodeOutcome {
        let host = node.hostname.clone();
        match self.revert(node, &plan).await {
            Ok(running) => {
                warn!(node = %host, %running, "node rolled back");
                NodeOutcome::RolledBack(NodeFailure {
                    hostname: host,
                    phase: node.phase,
                    error: cause.to_string(),
                    verification,
                })
            }
            Err(e) => {
                let error = NodeError::RollbackFailed {
                    cause: Box::new(cause),
                    error: Box::new(e),
                };
                self.abort_with(node, error, verification)
            }
        }
    }

    async fn revert(
        &self,
        node: &mut NodeTarget,
        plan: &RollbackPlan<'_>,
    ) -> Result<Version, NodeError> {
        let host = node.hostname.clone();
        self.store
            .begin_rollback(&host, plan.reverts_from, plan.revert_release)
            .await?;
        node.phase = Some(Phase::RollingBack);
        node.intent = Some(plan.reverts_from.to_string());
        node.revert_release = plan.revert_release;
        info!(
            node = %host,
            phase = %Phase::RollingBack,
            reverts_from = %plan.reverts_from,
            revert_release = plan.revert_release,
            "phase entered"
        );

        if plan.revert_release {
            let deployed = self.releases.deployed(plan.release, plan.namespace).await?;
            if deployed.version == *plan.reverts_from {
                let revision = self.releases.rollback(plan.release, plan.namespace).await?;
                info!(node = %host, release = %plan.release, revision, "release reverted");
            }
        }

        let desired = self.releases.deployed(plan.release, plan.namespace).await?.version;
        let reported = self
            .releases
            .current_reported_version(plan.release, plan.namespace, &host)
            .await?;
        let restart = reported == *plan.reverts_from && reported != desired;
        if restart {
            self.releases
                .restart_instance(plan.release, plan.namespace, &host)
                .await?;
        }
        if restart || plan.revert_release {
            self.releases
                .wait_ready(plan.release, plan.namespace, &host, self.ready_timeout)
                .await?;
        }

        let running = self
            .releases
            .current_reported_version(plan.release, plan.namespace, &host)
            .await?;
        if restart && running != desired {
            return Err(NodeError::VersionMismatch {
                expected: desired,
                reported: running,
            });
        }

        self.cluster.uncordon(&host).await?;
        self.store.finish_rollback(&host, Some(&running)).await?;
        node.phase = Some(Phase::RolledBack);
        node.revert_release = false;
        node.current_version = Some(running.to_string());
        Ok(running)
    }

    async fn transition(&self, node: &mut NodeTarget, phase: Phase) -> Result<(), NodeError> {
        self.store.set_phase(&node.hostname, phase).await?;
        node.phase = Some(phase);
        info!(node = %node.hostname, %phase, "phase entered");
        Ok(())
    }

    fn abort(&self, node: &NodeTarget, error: NodeError) -> NodeOutcome {
        self.abort_with(node, error, None)
    }

    fn abort_with(
        &self,
        node: &NodeTarget,
        error: NodeError,
        verification: Option<VerificationRun>,
    ) -> NodeOutcome {
        error!(node = %node.hostname, phase = ?node.phase, error = %error, "node turn aborted");
        NodeOutcome::FatalAbort(NodeFailure {
            hostname: node.hostname.clone(),
            phase: node.phase,
            error: error.to_string(),
            verification,
        })
    }
}

fn busy_status(state: &ReleaseState) -> Option<String> {
    match state {
        ReleaseState::Pending(status) => Some(status.clone()),
        _ => None,
    }
}
