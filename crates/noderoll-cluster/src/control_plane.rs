//! The control plane trait and the workload types it speaks.

use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;

use noderoll_core::LabelSelector;

use crate::error::ClusterResult;

/// Annotation writes applied in one request. `None` removes the key.
pub type AnnotationPatch = BTreeMap<String, Option<String>>;

/// Identity of a created workload instance.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct WorkloadId {
    pub namespace: String,
    pub name: String,
}

impl fmt::Display for WorkloadId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// Observed state of a run-to-completion workload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "kebab-case")]
pub enum WorkloadStatus {
    Pending,
    Running,
    Succeeded,
    /// Terminated unsuccessfully. `exit_code` is absent when the workload
    /// crashed or never started.
    Failed {
        exit_code: Option<i32>,
        reason: Option<String>,
    },
}

impl WorkloadStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, WorkloadStatus::Succeeded | WorkloadStatus::Failed { .. })
    }
}

/// Operator-facing evidence gathered from a finished workload.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct WorkloadDiagnostics {
    pub conditions: Vec<String>,
    pub events: Vec<String>,
    pub logs: String,
}

/// Read-write access to nodes and workloads.
#[async_trait]
pub trait ControlPlane: Send + Sync {
    /// Hostnames matching `selector` that also carry the taint `taint_key`
    /// (with `taint_value`, when given). Order is unspecified.
    async fn get_nodes(
        &self,
        selector: &LabelSelector,
        taint_key: Option<&str>,
        taint_value: Option<&str>,
    ) -> ClusterResult<Vec<String>>;

    /// Mark the node unschedulable. A no-op if it already is.
    async fn cordon(&self, hostname: &str) -> ClusterResult<()>;

    /// Mark the node schedulable. A no-op if it already is.
    async fn uncordon(&self, hostname: &str) -> ClusterResult<()>;

    async fn is_cordoned(&self, hostname: &str) -> ClusterResult<bool>;

    async fn annotations(&self, hostname: &str) -> ClusterResult<BTreeMap<String, String>>;

    /// Apply all entries of `patch` to the node's annotations in one write.
    async fn annotate(&self, hostname: &str, patch: &AnnotationPatch) -> ClusterResult<()>;

    /// Evict every evictable pod from the node and wait until they are gone.
    ///
    /// Returns the number of pods evicted. Exceeding `timeout` is
    /// [`ClusterError::Timeout`](crate::ClusterError::Timeout).
    async fn evict_pods(&self, hostname: &str, timeout: Duration) -> ClusterResult<usize>;

    /// Create a workload from a rendered definition.
    async fn create_workload(&self, namespace: &str, spec: &str) -> ClusterResult<WorkloadId>;

    async fn workload_status(&self, id: &WorkloadId) -> ClusterResult<WorkloadStatus>;

    /// Best-effort: pieces that cannot be fetched are left empty.
    async fn workload_diagnostics(&self, id: &WorkloadId) -> ClusterResult<WorkloadDiagnostics>;

    /// Delete the workload. Deleting one that is already gone succeeds.
    async fn delete_workload(&self, id: &WorkloadId) -> ClusterResult<()>;
}
