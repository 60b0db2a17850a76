//! [`ControlPlane`] backed by a live Kubernetes API server.

use std::collections::{BTreeMap, HashSet};
use std::time::Duration;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::{Event, Node, Pod};
use kube::api::{Api, DeleteParams, EvictParams, ListParams, LogParams, Patch, PatchParams, PostParams};
use kube::Client;
use serde_json::json;
use tracing::{debug, info, warn};

use noderoll_core::LabelSelector;

use crate::control_plane::{
    AnnotationPatch, ControlPlane, WorkloadDiagnostics, WorkloadId, WorkloadStatus,
};
use crate::error::{ClusterError, ClusterResult};

/// Annotation the kubelet puts on static (mirror) pods.
const MIRROR_POD_ANNOTATION: &str = "kubernetes.io/config.mirror";

const LOG_TAIL_LINES: i64 = 200;
const MAX_EVENTS: usize = 20;

/// Waiting reasons that mean the container will not produce an exit code on its own.
const FATAL_WAITING_REASONS: &[&str] = &[
    "CrashLoopBackOff",
    "ErrImagePull",
    "ImagePullBackOff",
    "InvalidImageName",
    "CreateContainerConfigError",
    "CreateContainerError",
];

#[derive(Clone)]
pub struct KubeControlPlane {
    client: Client,
    poll_interval: Duration,
}

impl KubeControlPlane {
    pub fn new(client: Client) -> Self {
        Self {
            client,
            poll_interval: Duration::from_secs(5),
        }
    }

    /// Connect using the ambient kubeconfig or in-cluster service account.
    pub async fn try_default() -> ClusterResult<Self> {
        let client = Client::try_default().await?;
        Ok(Self::new(client))
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn client(&self) -> Client {
        self.client.clone()
    }

    fn nodes(&self) -> Api<Node> {
        Api::all(self.client.clone())
    }

    fn pods(&self, namespace: &str) -> Api<Pod> {
        Api::namespaced(self.client.clone(), namespace)
    }

    async fn get_node(&self, hostname: &str) -> ClusterResult<Node> {
        self.nodes()
            .get_opt(hostname)
            .await?
            .ok_or_else(|| ClusterError::NodeNotFound(hostname.to_string()))
    }

    async fn patch_node(&self, hostname: &str, patch: serde_json::Value) -> ClusterResult<()> {
        match self
            .nodes()
            .patch(hostname, &PatchParams::default(), &Patch::Merge(&patch))
            .await
        {
            Ok(_) => Ok(()),
            Err(e) if is_not_found(&e) => Err(ClusterError::NodeNotFound(hostname.to_string())),
            Err(e) => Err(e.into()),
        }
    }

    /// Pods on the node that a drain must wait for.
    async fn pods_to_drain(&self, hostname: &str) -> ClusterResult<Vec<Pod>> {
        let all: Api<Pod> = Api::all(self.client.clone());
        let lp = ListParams::default().fields(&format!("spec.nodeName={hostname}"));
        let pods = all.list(&lp).await?;
        Ok(pods.items.into_iter().filter(is_evictable).collect())
    }

    async fn get_pod(&self, id: &WorkloadId) -> ClusterResult<Pod> {
        self.pods(&id.namespace)
            .get_opt(&id.name)
            .await?
            .ok_or_else(|| ClusterError::WorkloadNotFound(id.to_string()))
    }
}

#[async_trait]
impl ControlPlane for KubeControlPlane {
    async fn get_nodes(
        &self,
        selector: &LabelSelector,
        taint_key: Option<&str>,
        taint_value: Option<&str>,
    ) -> ClusterResult<Vec<String>> {
        let mut lp = ListParams::default();
        if !selector.is_empty() {
            lp = lp.labels(selector.as_str());
        }
        let nodes = self.nodes().list(&lp).await?;
        Ok(nodes
            .items
            .into_iter()
            .filter(|node| has_taint(node, taint_key, taint_value))
            .filter_map(|node| node.metadata.name)
            .collect())
    }

    async fn cordon(&self, hostname: &str) -> ClusterResult<()> {
        self.patch_node(hostname, json!({ "spec": { "unschedulable": true } }))
            .await?;
        debug!(node = %hostname, "cordoned");
        Ok(())
    }

    async fn uncordon(&self, hostname: &str) -> ClusterResult<()> {
        // `null` clears the field, which is how kubectl leaves an uncordoned node.
        self.patch_node(hostname, json!({ "spec": { "unschedulable": null } }))
            .await?;
        debug!(node = %hostname, "uncordoned");
        Ok(())
    }

    async fn is_cordoned(&self, hostname: &str) -> ClusterResult<bool> {
        let node = self.get_node(hostname).await?;
        Ok(node.spec.and_then(|s| s.unschedulable).unwrap_or(false))
    }

    async fn annotations(&self, hostname: &str) -> ClusterResult<BTreeMap<String, String>> {
        let node = self.get_node(hostname).await?;
        Ok(node.metadata.annotations.unwrap_or_default())
    }

    async fn annotate(&self, hostname: &str, patch: &AnnotationPatch) -> ClusterResult<()> {
        self.patch_node(hostname, json!({ "metadata": { "annotations": patch } }))
            .await
    }

    async fn evict_pods(&self, hostname: &str, timeout: Duration) -> ClusterResult<usize> {
        let mut requested: HashSet<WorkloadId> = HashSet::new();

        let drain = async {
            loop {
                let remaining = self.pods_to_drain(hostname).await?;
                if remaining.is_empty() {
                    return Ok::<_, ClusterError>(());
                }

                for pod in remaining {
                    // Already terminating: just wait for it.
                    if pod.metadata.deletion_timestamp.is_some() {
                        continue;
                    }
                    let (Some(namespace), Some(name)) = (pod.metadata.namespace, pod.metadata.name)
                    else {
                        continue;
                    };
                    match self.pods(&namespace).evict(&name, &EvictParams::default()).await {
                        Ok(_) => {
                            requested.insert(WorkloadId { namespace, name });
                        }
                        Err(kube::Error::Api(ae)) if ae.code == 429 => {
                            debug!(node = %hostname, pod = %name, "eviction blocked by disruption budget, retrying");
                        }
                        Err(e) if is_not_found(&e) => {}
                        Err(e) => return Err(e.into()),
                    }
                }

                tokio::time::sleep(self.poll_interval).await;
            }
        };

        match tokio::time::timeout(timeout, drain).await {
            Ok(result) => result?,
            Err(_) => {
                warn!(node = %hostname, ?timeout, "drain timed out");
                return Err(ClusterError::Timeout {
                    operation: format!("drain of {hostname}"),
                    after: timeout,
                });
            }
        }

        info!(node = %hostname, evicted = requested.len(), "node drained");
        Ok(requested.len())
    }

    async fn create_workload(&self, namespace: &str, spec: &str) -> ClusterResult<WorkloadId> {
        let mut pod: Pod = serde_yaml::from_str(spec)
            .map_err(|e| ClusterError::InvalidWorkload(e.to_string()))?;
        if pod.metadata.name.is_none() && pod.metadata.generate_name.is_none() {
            return Err(ClusterError::InvalidWorkload(
                "metadata.name or metadata.generateName is required".to_string(),
            ));
        }
        pod.metadata.namespace = Some(namespace.to_string());

        let created = self.pods(namespace).create(&PostParams::default(), &pod).await?;
        let name = created
            .metadata
            .name
            .ok_or_else(|| ClusterError::Api("created pod has no name".to_string()))?;
        Ok(WorkloadId {
            namespace: namespace.to_string(),
            name,
        })
    }

    async fn workload_status(&self, id: &WorkloadId) -> ClusterResult<WorkloadStatus> {
        let pod = self.get_pod(id).await?;
        Ok(classify_pod(&pod))
    }

    async fn workload_diagnostics(&self, id: &WorkloadId) -> ClusterResult<WorkloadDiagnostics> {
        let pod = self.get_pod(id).await?;

        let conditions = pod
            .status
            .as_ref()
            .and_then(|s| s.conditions.as_ref())
            .map(|conds| {
                conds
                    .iter()
                    .map(|c| {
                        let mut line = format!("{}={}", c.type_, c.status);
                        if let Some(reason) = &c.reason {
                            line.push_str(&format!(" reason={reason}"));
                        }
                        if let Some(message) = &c.message {
                            line.push_str(&format!(" message={message:?}"));
                        }
                        line
                    })
                    .collect()
            })
            .unwrap_or_default();

        let events_api: Api<Event> = Api::namespaced(self.client.clone(), &id.namespace);
        let lp = ListParams::default().fields(&format!("involvedObject.name={}", id.name));
        let events = match events_api.list(&lp).await {
            Ok(list) => {
                let mut lines: Vec<String> = list
                    .items
                    .into_iter()
                    .map(|e| {
                        format!(
                            "{} {}: {}",
                            e.type_.unwrap_or_default(),
                            e.reason.unwrap_or_default(),
                            e.message.unwrap_or_default()
                        )
                    })
                    .collect();
                let skip = lines.len().saturating_sub(MAX_EVENTS);
                lines.drain(..skip);
                lines
            }
            Err(e) => vec![format!("events unavailable: {e}")],
        };

        let lp = LogParams {
            tail_lines: Some(LOG_TAIL_LINES),
            ..Default::default()
        };
        let logs = match self.pods(&id.namespace).logs(&id.name, &lp).await {
            Ok(logs) => logs,
            Err(e) => format!("logs unavailable: {e}"),
        };

        Ok(WorkloadDiagnostics {
            conditions,
            events,
            logs,
        })
    }

    async fn delete_workload(&self, id: &WorkloadId) -> ClusterResult<()> {
        match self
            .pods(&id.namespace)
            .delete(&id.name, &DeleteParams::background())
            .await
        {
            Ok(_) => Ok(()),
            Err(e) if is_not_found(&e) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

fn is_not_found(e: &kube::Error) -> bool {
    matches!(e, kube::Error::Api(ae) if ae.code == 404)
}

fn has_taint(node: &Node, key: Option<&str>, value: Option<&str>) -> bool {
    let Some(key) = key else {
        return true;
    };
    node.spec
        .as_ref()
        .and_then(|s| s.taints.as_ref())
        .is_some_and(|taints| {
            taints
                .iter()
                .any(|t| t.key == key && value.is_none_or(|v| t.value.as_deref() == Some(v)))
        })
}

/// DaemonSet pods and static pods are left alone by a drain, as are pods
/// that have already finished.
fn is_evictable(pod: &Pod) -> bool {
    let daemonset_owned = pod
        .metadata
        .owner_references
        .as_ref()
        .is_some_and(|refs| refs.iter().any(|r| r.kind == "DaemonSet"));
    let mirror = pod
        .metadata
        .annotations
        .as_ref()
        .is_some_and(|a| a.contains_key(MIRROR_POD_ANNOTATION));
    let finished = matches!(
        pod.status.as_ref().and_then(|s| s.phase.as_deref()),
        Some("Succeeded") | Some("Failed")
    );
    !daemonset_owned && !mirror && !finished
}

fn classify_pod(pod: &Pod) -> WorkloadStatus {
    let Some(status) = pod.status.as_ref() else {
        return WorkloadStatus::Pending;
    };
    let containers = status.container_statuses.as_deref().unwrap_or_default();

    match status.phase.as_deref() {
        Some("Succeeded") => WorkloadStatus::Succeeded,
        Some("Failed") => {
            let terminated = containers
                .iter()
                .filter_map(|c| c.state.as_ref().and_then(|s| s.terminated.as_ref()))
                .find(|t| t.exit_code != 0);
            WorkloadStatus::Failed {
                exit_code: terminated.map(|t| t.exit_code),
                reason: terminated
                    .and_then(|t| t.reason.clone())
                    .or_else(|| status.reason.clone()),
            }
        }
        _ => {
            // A container stuck in a crash loop or image pull error never
            // reaches a terminal pod phase under OnFailure/Always restarts.
            let stuck = containers.iter().find_map(|c| {
                let waiting = c.state.as_ref()?.waiting.as_ref()?;
                let reason = waiting.reason.as_deref()?;
                FATAL_WAITING_REASONS.contains(&reason).then(|| {
                    let exit_code = c
                        .last_state
                        .as_ref()
                        .and_then(|s| s.terminated.as_ref())
                        .map(|t| t.exit_code);
                    (exit_code, reason.to_string())
                })
            });
            match stuck {
                Some((exit_code, reason)) => WorkloadStatus::Failed {
                    exit_code,
                    reason: Some(reason),
                },
                None if status.phase.as_deref() == Some("Running") => WorkloadStatus::Running,
                None => WorkloadStatus::Pending,
            }
        }
    }
}
