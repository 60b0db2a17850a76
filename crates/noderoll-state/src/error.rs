//! Error types for the status store.

use thiserror::Error;

use noderoll_cluster::ClusterError;

/// Result type alias for status store operations.
pub type StateResult<T> = Result<T, StateError>;

#[derive(Debug, Error)]
pub enum StateError {
    #[error(transparent)]
    Cluster(#[from] ClusterError),

    #[error("node {hostname} has unreadable annotation {key}={value:?}")]
    Corrupt {
        hostname: String,
        key: String,
        value: String,
    },
}
