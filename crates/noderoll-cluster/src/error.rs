//! Error types for control plane operations.

use std::time::Duration;

use thiserror::Error;

/// Result type alias for control plane operations.
pub type ClusterResult<T> = Result<T, ClusterError>;

#[derive(Debug, Error)]
pub enum ClusterError {
    #[error("node not found: {0}")]
    NodeNotFound(String),

    #[error("workload not found: {0}")]
    WorkloadNotFound(String),

    #[error("invalid workload definition: {0}")]
    InvalidWorkload(String),

    #[error("{operation} timed out after {after:?}")]
    Timeout { operation: String, after: Duration },

    #[error("control plane request failed: {0}")]
    Api(String),
}

impl From<kube::Error> for ClusterError {
    fn from(e: kube::Error) -> Self {
        ClusterError::Api(e.to_string())
    }
}
