//! Campaign results and dry-run plans.

use serde::Serialize;

use noderoll_core::{NodeTarget, Phase};
use noderoll_verify::VerificationRun;

/// A node turn that ended in `rolled-back` or aborted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NodeFailure {
    pub hostname: String,
    /// Last phase persisted for the node before the failure was handled.
    pub phase: Option<Phase>,
    pub error: String,
    /// Present when the failure came out of (or after) verification.
    pub verification: Option<VerificationRun>,
}

/// Summary of one campaign run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CampaignReport {
    pub target_version: String,
    pub nodes_total: usize,
    /// Nodes that completed during this run, in order.
    pub nodes_completed: Vec<String>,
    /// Nodes already completed for this target by an earlier run.
    pub nodes_skipped: Vec<String>,
    pub first_failed_node: Option<NodeFailure>,
    /// The campaign stopped at `first_failed_node`.
    pub aborted: bool,
    /// The campaign stopped at a node boundary on request.
    pub cancelled: bool,
}

impl CampaignReport {
    pub fn new(target_version: impl Into<String>, nodes_total: usize) -> Self {
        Self {
            target_version: target_version.into(),
            nodes_total,
            ..Default::default()
        }
    }

    /// Every selected node is on the target version.
    pub fn succeeded(&self) -> bool {
        !self.aborted
            && !self.cancelled
            && self.nodes_completed.len() + self.nodes_skipped.len() == self.nodes_total
    }
}

/// What a run would do with a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "action", content = "phase", rename_all = "kebab-case")]
pub enum PlannedAction {
    /// Already completed for this target.
    Skip,
    /// Mid-turn for this target; continue from the persisted phase.
    Resume(Phase),
    /// Start a fresh turn at `preparing`.
    Start,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PlannedNode {
    #[serde(flatten)]
    pub node: NodeTarget,
    pub action: PlannedAction,
}
