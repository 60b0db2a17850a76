//! Error types for the rollout orchestrator.

use thiserror::Error;

use noderoll_cluster::ClusterError;
use noderoll_core::{ConfigError, Version};
use noderoll_release::ReleaseError;
use noderoll_state::StateError;
use noderoll_verify::{Outcome, VerifyError};

pub type RolloutResult<T> = Result<T, RolloutError>;

/// Campaign-level failures. Raised before the first node is touched.
#[derive(Debug, Error)]
pub enum RolloutError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("failed to resolve nodes: {0}")]
    Selection(#[from] ClusterError),

    #[error(transparent)]
    State(#[from] StateError),

    #[error(transparent)]
    Release(#[from] ReleaseError),
}

/// Why a single node's turn did not complete.
#[derive(Debug, Error)]
pub enum NodeError {
    #[error("node reports {reported}, above target {target}; downgrades are refused")]
    DowngradeRefused { reported: Version, target: Version },

    #[error("node is mid-upgrade to {intent}, not {target}")]
    ForeignIntent { intent: String, target: String },

    #[error("release {release} is busy: {status}")]
    ReleaseBusy { release: String, status: String },

    #[error("status store: {0}")]
    State(#[from] StateError),

    #[error("control plane: {0}")]
    Cluster(#[from] ClusterError),

    #[error("release: {0}")]
    Release(#[from] ReleaseError),

    #[error("verification: {0}")]
    Verify(#[from] VerifyError),

    #[error("verification {outcome} (exit code {exit_code:?})")]
    VerificationFailed {
        outcome: Outcome,
        exit_code: Option<i32>,
    },

    #[error("instance reports {reported}, expected {expected}")]
    VersionMismatch { expected: Version, reported: Version },

    #[error("node runs {reported} and the release deploys {deployed}; nothing to roll back")]
    NothingToRevert { reported: Version, deployed: Version },

    #[error("resumed an interrupted rollback")]
    Interrupted,

    #[error("manual rollback requested")]
    Manual,

    #[error("rollback after \"{cause}\" failed: {error}")]
    RollbackFailed {
        cause: Box<NodeError>,
        error: Box<NodeError>,
    },
}
