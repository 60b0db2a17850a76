//! StatusStore — node annotations as the rollout's durable log.
//!
//! Every write is a single annotation patch so the fields that belong
//! together (phase and intent, phase and version) never appear half-written.

use std::sync::Arc;

use tracing::debug;

use noderoll_cluster::{AnnotationPatch, ControlPlane};
use noderoll_core::{NodeStatus, Phase, Version};

use crate::error::{StateError, StateResult};

/// Fully-qualified annotation keys for one prefix.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnnotationKeys {
    pub phase: String,
    pub current_version: String,
    pub target_version: String,
    pub revert_release: String,
}

impl AnnotationKeys {
    pub fn new(prefix: &str) -> Self {
        let prefix = prefix.trim_end_matches('/');
        Self {
            phase: format!("{prefix}/phase"),
            current_version: format!("{prefix}/current-version"),
            target_version: format!("{prefix}/target-version"),
            revert_release: format!("{prefix}/revert-release"),
        }
    }
}

#[derive(Clone)]
pub struct StatusStore {
    cluster: Arc<dyn ControlPlane>,
    keys: AnnotationKeys,
}

impl StatusStore {
    pub fn new(cluster: Arc<dyn ControlPlane>, prefix: &str) -> Self {
        Self {
            cluster,
            keys: AnnotationKeys::new(prefix),
        }
    }

    pub fn keys(&self) -> &AnnotationKeys {
        &self.keys
    }

    /// Read the persisted status of a node. Missing annotations read as `None`.
    pub async fn read(&self, hostname: &str) -> StateResult<NodeStatus> {
        let annotations = self.cluster.annotations(hostname).await?;

        let phase = match annotations.get(&self.keys.phase) {
            Some(value) => Some(value.parse::<Phase>().map_err(|_| StateError::Corrupt {
                hostname: hostname.to_string(),
                key: self.keys.phase.clone(),
                value: value.clone(),
            })?),
            None => None,
        };

        let revert_release = match annotations.get(&self.keys.revert_release).map(String::as_str) {
            None | Some("false") => false,
            Some("true") => true,
            Some(other) => {
                return Err(StateError::Corrupt {
                    hostname: hostname.to_string(),
                    key: self.keys.revert_release.clone(),
                    value: other.to_string(),
                });
            }
        };

        Ok(NodeStatus {
            phase,
            current_version: annotations.get(&self.keys.current_version).cloned(),
            target_version: annotations.get(&self.keys.target_version).cloned(),
            revert_release,
        })
    }

    /// Record that `hostname` is being prepared for `target`.
    ///
    /// `known_good` seeds the current-version annotation when the node has
    /// never been through a rollout.
    pub async fn prepare(
        &self,
        hostname: &str,
        target: &Version,
        known_good: Option<&Version>,
    ) -> StateResult<()> {
        let mut patch = self.phase_patch(Phase::Preparing);
        patch.insert(self.keys.target_version.clone(), Some(target.to_string()));
        patch.insert(self.keys.revert_release.clone(), None);
        if let Some(version) = known_good {
            patch.insert(self.keys.current_version.clone(), Some(version.to_string()));
        }
        self.write(hostname, patch).await
    }

    /// Advance the node to `phase`.
    pub async fn set_phase(&self, hostname: &str, phase: Phase) -> StateResult<()> {
        self.write(hostname, self.phase_patch(phase)).await
    }

    /// Enter the rollback branch away from `reverts_from`, recording whether
    /// the release must be reverted.
    ///
    /// `reverts_from` is stored as the node's intent, so an interrupted
    /// rollback is resumed by whoever holds the same intent.
    pub async fn begin_rollback(
        &self,
        hostname: &str,
        reverts_from: &Version,
        revert_release: bool,
    ) -> StateResult<()> {
        let mut patch = self.phase_patch(Phase::RollingBack);
        patch.insert(self.keys.target_version.clone(), Some(reverts_from.to_string()));
        patch.insert(
            self.keys.revert_release.clone(),
            Some(revert_release.to_string()),
        );
        self.write(hostname, patch).await
    }

    /// Terminal success: the node runs `version`.
    pub async fn complete(&self, hostname: &str, version: &Version) -> StateResult<()> {
        let mut patch = self.phase_patch(Phase::Completed);
        patch.insert(self.keys.current_version.clone(), Some(version.to_string()));
        self.write(hostname, patch).await
    }

    /// Terminal failure: the node was reverted, and runs `version` if known.
    pub async fn finish_rollback(&self, hostname: &str, version: Option<&Version>) -> StateResult<()> {
        let mut patch = self.phase_patch(Phase::RolledBack);
        patch.insert(self.keys.revert_release.clone(), None);
        if let Some(version) = version {
            patch.insert(self.keys.current_version.clone(), Some(version.to_string()));
        }
        self.write(hostname, patch).await
    }

    fn phase_patch(&self, phase: Phase) -> AnnotationPatch {
        let mut patch = AnnotationPatch::new();
        patch.insert(self.keys.phase.clone(), Some(phase.as_str().to_string()));
        patch
    }

    async fn write(&self, hostname: &str, patch: AnnotationPatch) -> StateResult<()> {
        self.cluster.annotate(hostname, &patch).await?;
        debug!(node = %hostname, ?patch, "node status persisted");
        Ok(())
    }
}
