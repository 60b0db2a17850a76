//! The release manager trait.

use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;

use noderoll_core::Version;

use crate::error::ReleaseResult;

/// Lifecycle state of the release object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ReleaseState {
    Deployed,
    Failed,
    /// An install, upgrade or rollback is in progress elsewhere.
    Pending(String),
    Other(String),
}

impl ReleaseState {
    /// Map a Helm status string.
    pub fn from_helm(status: &str) -> Self {
        match status {
            "deployed" => ReleaseState::Deployed,
            "failed" => ReleaseState::Failed,
            s if s.starts_with("pending") => ReleaseState::Pending(s.to_string()),
            s => ReleaseState::Other(s.to_string()),
        }
    }

    pub fn is_pending(&self) -> bool {
        matches!(self, ReleaseState::Pending(_))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReleaseInfo {
    pub name: String,
    pub namespace: String,
    pub revision: u32,
    /// Component version the release currently asks for.
    pub version: Version,
    pub state: ReleaseState,
}

#[async_trait]
pub trait ReleaseManager: Send + Sync {
    /// Current revision, desired version and state of the release.
    async fn deployed(&self, release: &str, namespace: &str) -> ReleaseResult<ReleaseInfo>;

    /// Move the release's desired spec to `version`. Running instances are
    /// not restarted. Returns the resulting revision; asking for the version
    /// already deployed creates no new revision.
    async fn upgrade(&self, release: &str, namespace: &str, version: &Version)
    -> ReleaseResult<u32>;

    /// Revert the desired spec to the previous revision.
    async fn rollback(&self, release: &str, namespace: &str) -> ReleaseResult<u32>;

    /// Version the instance on `hostname` is actually running.
    async fn current_reported_version(
        &self,
        release: &str,
        namespace: &str,
        hostname: &str,
    ) -> ReleaseResult<Version>;

    /// Restart only the instance on `hostname`, so it picks up the desired spec.
    async fn restart_instance(&self, release: &str, namespace: &str, hostname: &str)
    -> ReleaseResult<()>;

    /// Block until the instance on `hostname` reports ready, or `timeout`.
    async fn wait_ready(
        &self,
        release: &str,
        namespace: &str,
        hostname: &str,
        timeout: Duration,
    ) -> ReleaseResult<()>;
}
