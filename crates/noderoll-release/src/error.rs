//! Error types for release operations.

use std::time::Duration;

use thiserror::Error;

/// Result type alias for release operations.
pub type ReleaseResult<T> = Result<T, ReleaseError>;

#[derive(Debug, Error)]
pub enum ReleaseError {
    #[error("release {namespace}/{release} not found")]
    NotFound { release: String, namespace: String },

    /// Someone else is mid-operation on the release. Never retried through.
    #[error("release {namespace}/{release} is being modified concurrently (status {status})")]
    Busy {
        release: String,
        namespace: String,
        status: String,
    },

    #[error("release {namespace}/{release} has no previous revision to roll back to")]
    NoPreviousRevision { release: String, namespace: String },

    #[error("no managed instance found on node {0}")]
    NoInstance(String),

    #[error("cannot determine version from {0:?}")]
    UnknownVersion(String),

    #[error("instance on {hostname} not ready after {after:?}")]
    Timeout { hostname: String, after: Duration },

    #[error("`{command}` failed: {stderr}")]
    Command { command: String, stderr: String },

    #[error("unexpected release manager output: {0}")]
    Parse(String),

    #[error("control plane request failed: {0}")]
    Cluster(String),
}

impl From<kube::Error> for ReleaseError {
    fn from(e: kube::Error) -> Self {
        ReleaseError::Cluster(e.to_string())
    }
}
