//! Error types for verification runs.

use thiserror::Error;

use noderoll_cluster::{ClusterError, WorkloadId};

pub type VerifyResult<T> = Result<T, VerifyError>;

/// The run could not produce an outcome at all.
///
/// A check that ran and failed is not an error; it is
/// [`Outcome::Failed`](crate::Outcome::Failed).
#[derive(Debug, Error)]
pub enum VerifyError {
    #[error("failed to create verification workload: {0}")]
    Create(#[source] ClusterError),

    #[error("lost track of verification workload {id}: {source}")]
    Poll {
        id: WorkloadId,
        #[source]
        source: ClusterError,
    },
}
