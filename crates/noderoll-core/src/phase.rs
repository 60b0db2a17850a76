//! Per-node upgrade phases and the node records built from them.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Persisted upgrade phase of a single node.
///
/// The happy path climbs `preparing → cordoned → [draining] → upgrading →
/// verifying → completed`. The failure branch is `rolling-back →
/// rolled-back`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Phase {
    Preparing,
    Cordoned,
    Draining,
    Upgrading,
    Verifying,
    Completed,
    RollingBack,
    RolledBack,
}

impl Phase {
    pub const ALL: [Phase; 8] = [
        Phase::Preparing,
        Phase::Cordoned,
        Phase::Draining,
        Phase::Upgrading,
        Phase::Verifying,
        Phase::Completed,
        Phase::RollingBack,
        Phase::RolledBack,
    ];

    /// Annotation value for this phase.
    pub fn as_str(self) -> &'static str {
        match self {
            Phase::Preparing => "preparing",
            Phase::Cordoned => "cordoned",
            Phase::Draining => "draining",
            Phase::Upgrading => "upgrading",
            Phase::Verifying => "verifying",
            Phase::Completed => "completed",
            Phase::RollingBack => "rolling-back",
            Phase::RolledBack => "rolled-back",
        }
    }

    /// `completed` and `rolled-back` end a node's turn.
    pub fn is_terminal(self) -> bool {
        matches!(self, Phase::Completed | Phase::RolledBack)
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Phase {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Phase::ALL
            .into_iter()
            .find(|p| p.as_str() == s)
            .ok_or_else(|| format!("unknown phase {s:?}"))
    }
}

/// Durable per-node state as read back from node metadata.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeStatus {
    pub phase: Option<Phase>,
    /// Last known-good version running on the node.
    pub current_version: Option<String>,
    /// Target version of the campaign that last prepared this node.
    pub target_version: Option<String>,
    /// Set on entering `rolling-back`: whether the release must be reverted.
    pub revert_release: bool,
}

impl NodeStatus {
    /// True when the node is mid-turn (a phase is recorded and it is not terminal).
    pub fn in_flight(&self) -> bool {
        self.phase.is_some_and(|p| !p.is_terminal())
    }
}

/// One node within a campaign's ordered node list.
///
/// An in-memory cache of what the status store holds for the node; always
/// reconstructible by re-reading the node's metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NodeTarget {
    pub hostname: String,
    /// Position in the resolved node order.
    pub index: usize,
    pub phase: Option<Phase>,
    pub current_version: Option<String>,
    pub intent: Option<String>,
    pub revert_release: bool,
}

impl NodeTarget {
    pub fn new(hostname: impl Into<String>, index: usize) -> Self {
        Self {
            hostname: hostname.into(),
            index,
            phase: None,
            current_version: None,
            intent: None,
            revert_release: false,
        }
    }

    /// Refresh the cached fields from a persisted status.
    pub fn apply(&mut self, status: NodeStatus) {
        self.phase = status.phase;
        self.current_version = status.current_version;
        self.intent = status.target_version;
        self.revert_release = status.revert_release;
    }

    pub fn with_status(mut self, status: NodeStatus) -> Self {
        self.apply(status);
        self
    }
}
