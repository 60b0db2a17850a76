//! In-process [`ControlPlane`] for tests and dry runs.
//!
//! Nodes, annotations and workloads live in a mutex-guarded map. Every
//! mutating call is appended to a journal so tests can assert exactly which
//! nodes were touched and in which order. Failure injection hooks let a test
//! make one node's cordon fail, its drain hang, or its verification workload
//! exit non-zero.

use std::collections::{BTreeMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

use noderoll_core::LabelSelector;

use crate::control_plane::{
    AnnotationPatch, ControlPlane, WorkloadDiagnostics, WorkloadId, WorkloadStatus,
};
use crate::error::{ClusterError, ClusterResult};

/// A mutating call observed by the memory cluster.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClusterOp {
    Cordon(String),
    Uncordon(String),
    Annotate(String),
    Evict(String),
    CreateWorkload(WorkloadId),
    DeleteWorkload(WorkloadId),
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MemoryNode {
    pub labels: BTreeMap<String, String>,
    pub taints: Vec<(String, Option<String>)>,
    pub unschedulable: bool,
    pub annotations: BTreeMap<String, String>,
    /// Evictable pods currently scheduled on the node.
    pub pods: usize,
}

#[derive(Debug, Clone)]
struct MemoryWorkload {
    spec: String,
    status: WorkloadStatus,
}

#[derive(Default)]
struct Inner {
    nodes: BTreeMap<String, MemoryNode>,
    workloads: BTreeMap<WorkloadId, MemoryWorkload>,
    deleted: BTreeMap<WorkloadId, MemoryWorkload>,
    /// First script whose needle appears in a workload spec decides its status.
    scripts: Vec<(String, WorkloadStatus)>,
    failing_cordons: HashSet<String>,
    stuck_drains: HashSet<String>,
    journal: Vec<ClusterOp>,
    next_workload: u64,
}

#[derive(Clone, Default)]
pub struct MemoryCluster {
    inner: Arc<Mutex<Inner>>,
}

impl MemoryCluster {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Add (or replace) a node with the given labels.
    pub fn add_node(&self, hostname: &str, labels: &[(&str, &str)]) {
        let node = MemoryNode {
            labels: labels
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            ..Default::default()
        };
        self.lock().nodes.insert(hostname.to_string(), node);
    }

    pub fn add_taint(&self, hostname: &str, key: &str, value: Option<&str>) {
        if let Some(node) = self.lock().nodes.get_mut(hostname) {
            node.taints
                .push((key.to_string(), value.map(str::to_string)));
        }
    }

    pub fn set_pods(&self, hostname: &str, pods: usize) {
        if let Some(node) = self.lock().nodes.get_mut(hostname) {
            node.pods = pods;
        }
    }

    /// Make cordoning this node fail.
    pub fn fail_cordon(&self, hostname: &str) {
        self.lock().failing_cordons.insert(hostname.to_string());
    }

    /// Make draining this node never finish.
    pub fn block_drain(&self, hostname: &str) {
        self.lock().stuck_drains.insert(hostname.to_string());
    }

    /// Workloads whose spec contains `needle` report `status`.
    ///
    /// Later scripts for the same needle take precedence. Unscripted
    /// workloads succeed.
    pub fn script_workload(&self, needle: &str, status: WorkloadStatus) {
        let mut inner = self.lock();
        inner.scripts.retain(|(n, _)| n != needle);
        inner.scripts.insert(0, (needle.to_string(), status));
    }

    pub fn node(&self, hostname: &str) -> Option<MemoryNode> {
        self.lock().nodes.get(hostname).cloned()
    }

    pub fn journal(&self) -> Vec<ClusterOp> {
        self.lock().journal.clone()
    }

    /// Hostnames in the order they were first cordoned.
    pub fn cordon_order(&self) -> Vec<String> {
        let mut seen = Vec::new();
        for op in self.lock().journal.iter() {
            if let ClusterOp::Cordon(host) = op {
                if !seen.contains(host) {
                    seen.push(host.clone());
                }
            }
        }
        seen
    }

    /// Workloads created and not yet deleted.
    pub fn live_workloads(&self) -> Vec<WorkloadId> {
        self.lock().workloads.keys().cloned().collect()
    }

    /// Rendered specs of every workload ever created, in creation order.
    pub fn created_specs(&self) -> Vec<String> {
        let inner = self.lock();
        inner
            .journal
            .iter()
            .filter_map(|op| match op {
                ClusterOp::CreateWorkload(id) => Some(id.clone()),
                _ => None,
            })
            .filter_map(|id| {
                inner
                    .workloads
                    .get(&id)
                    .or_else(|| inner.deleted.get(&id))
                    .map(|w| w.spec.clone())
            })
            .collect()
    }
}

#[async_trait]
impl ControlPlane for MemoryCluster {
    async fn get_nodes(
        &self,
        selector: &LabelSelector,
        taint_key: Option<&str>,
        taint_value: Option<&str>,
    ) -> ClusterResult<Vec<String>> {
        let inner = self.lock();
        Ok(inner
            .nodes
            .iter()
            .filter(|(_, node)| selector.matches(&node.labels))
            .filter(|(_, node)| match taint_key {
                None => true,
                Some(key) => node.taints.iter().any(|(k, v)| {
                    k == key && taint_value.is_none_or(|want| v.as_deref() == Some(want))
                }),
            })
            .map(|(name, _)| name.clone())
            .collect())
    }

    async fn cordon(&self, hostname: &str) -> ClusterResult<()> {
        let mut inner = self.lock();
        if inner.failing_cordons.contains(hostname) {
            return Err(ClusterError::Api(format!("cordon of {hostname} rejected")));
        }
        let node = inner
            .nodes
            .get_mut(hostname)
            .ok_or_else(|| ClusterError::NodeNotFound(hostname.to_string()))?;
        node.unschedulable = true;
        inner.journal.push(ClusterOp::Cordon(hostname.to_string()));
        Ok(())
    }

    async fn uncordon(&self, hostname: &str) -> ClusterResult<()> {
        let mut inner = self.lock();
        let node = inner
            .nodes
            .get_mut(hostname)
            .ok_or_else(|| ClusterError::NodeNotFound(hostname.to_string()))?;
        node.unschedulable = false;
        inner.journal.push(ClusterOp::Uncordon(hostname.to_string()));
        Ok(())
    }

    async fn is_cordoned(&self, hostname: &str) -> ClusterResult<bool> {
        self.lock()
            .nodes
            .get(hostname)
            .map(|n| n.unschedulable)
            .ok_or_else(|| ClusterError::NodeNotFound(hostname.to_string()))
    }

    async fn annotations(&self, hostname: &str) -> ClusterResult<BTreeMap<String, String>> {
        self.lock()
            .nodes
            .get(hostname)
            .map(|n| n.annotations.clone())
            .ok_or_else(|| ClusterError::NodeNotFound(hostname.to_string()))
    }

    async fn annotate(&self, hostname: &str, patch: &AnnotationPatch) -> ClusterResult<()> {
        let mut inner = self.lock();
        let node = inner
            .nodes
            .get_mut(hostname)
            .ok_or_else(|| ClusterError::NodeNotFound(hostname.to_string()))?;
        for (key, value) in patch {
            match value {
                Some(v) => {
                    node.annotations.insert(key.clone(), v.clone());
                }
                None => {
                    node.annotations.remove(key);
                }
            }
        }
        inner.journal.push(ClusterOp::Annotate(hostname.to_string()));
        Ok(())
    }

    async fn evict_pods(&self, hostname: &str, timeout: Duration) -> ClusterResult<usize> {
        let stuck = {
            let mut inner = self.lock();
            if !inner.nodes.contains_key(hostname) {
                return Err(ClusterError::NodeNotFound(hostname.to_string()));
            }
            inner.journal.push(ClusterOp::Evict(hostname.to_string()));
            inner.stuck_drains.contains(hostname)
        };

        if stuck {
            tokio::time::sleep(timeout).await;
            return Err(ClusterError::Timeout {
                operation: format!("drain of {hostname}"),
                after: timeout,
            });
        }

        let mut inner = self.lock();
        let node = inner
            .nodes
            .get_mut(hostname)
            .ok_or_else(|| ClusterError::NodeNotFound(hostname.to_string()))?;
        let evicted = std::mem::take(&mut node.pods);
        debug!(node = %hostname, evicted, "memory drain");
        Ok(evicted)
    }

    async fn create_workload(&self, namespace: &str, spec: &str) -> ClusterResult<WorkloadId> {
        if spec.trim().is_empty() {
            return Err(ClusterError::InvalidWorkload("empty definition".to_string()));
        }
        let mut inner = self.lock();
        inner.next_workload += 1;
        let id = WorkloadId {
            namespace: namespace.to_string(),
            name: format!("workload-{}", inner.next_workload),
        };
        let status = inner
            .scripts
            .iter()
            .find(|(needle, _)| spec.contains(needle.as_str()))
            .map(|(_, status)| status.clone())
            .unwrap_or(WorkloadStatus::Succeeded);
        inner.workloads.insert(
            id.clone(),
            MemoryWorkload {
                spec: spec.to_string(),
                status,
            },
        );
        inner.journal.push(ClusterOp::CreateWorkload(id.clone()));
        Ok(id)
    }

    async fn workload_status(&self, id: &WorkloadId) -> ClusterResult<WorkloadStatus> {
        self.lock()
            .workloads
            .get(id)
            .map(|w| w.status.clone())
            .ok_or_else(|| ClusterError::WorkloadNotFound(id.to_string()))
    }

    async fn workload_diagnostics(&self, id: &WorkloadId) -> ClusterResult<WorkloadDiagnostics> {
        let inner = self.lock();
        let workload = inner
            .workloads
            .get(id)
            .ok_or_else(|| ClusterError::WorkloadNotFound(id.to_string()))?;
        Ok(WorkloadDiagnostics {
            conditions: vec![format!("status={:?}", workload.status)],
            events: Vec::new(),
            logs: format!("memory workload {id}"),
        })
    }

    async fn delete_workload(&self, id: &WorkloadId) -> ClusterResult<()> {
        let mut inner = self.lock();
        // Specs stay readable for created_specs(); only the live entry goes.
        if let Some(mut workload) = inner.workloads.remove(id) {
            workload.status = WorkloadStatus::Pending;
            inner.deleted.insert(id.clone(), workload);
        }
        inner.journal.push(ClusterOp::DeleteWorkload(id.clone()));
        Ok(())
    }
}
