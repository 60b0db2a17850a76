//! [`ReleaseManager`] driving the `helm` CLI.
//!
//! The release itself is read and mutated through `helm`; the per-node
//! instances (the managed DaemonSet's pods) are found, restarted and
//! watched through the Kubernetes API.

use std::time::Duration;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Pod;
use kube::api::{Api, DeleteParams, ListParams};
use kube::Client;
use serde::Deserialize;
use tokio::process::Command;
use tracing::{debug, info, warn};

use noderoll_core::{ReleaseConfig, Version, parse_version, version_from_image};

use crate::error::{ReleaseError, ReleaseResult};
use crate::manager::{ReleaseInfo, ReleaseManager, ReleaseState};

/// Fragment helm prints when another client holds the release lock.
const HELM_BUSY_MARKER: &str = "another operation (install/upgrade/rollback) is in progress";

/// One row of `helm list -o json`.
#[derive(Debug, Deserialize)]
struct HelmListEntry {
    name: String,
    namespace: String,
    revision: String,
    status: String,
    chart: String,
    app_version: String,
}

pub struct HelmReleaseManager {
    helm: String,
    chart: String,
    chart_version_prefix: String,
    client: Client,
    instance_namespace: String,
    instance_selector: String,
    container: Option<String>,
    poll_interval: Duration,
}

impl HelmReleaseManager {
    pub fn new(config: &ReleaseConfig, client: Client) -> Self {
        Self {
            helm: config.helm_binary.clone(),
            chart: config.chart.clone(),
            chart_version_prefix: config.chart_version_prefix.clone(),
            client,
            instance_namespace: config.instance_namespace.clone(),
            instance_selector: config.instance_selector.clone(),
            container: config.container.clone(),
            poll_interval: Duration::from_secs(5),
        }
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    async fn helm(&self, args: &[&str]) -> ReleaseResult<String> {
        let command = format!("{} {}", self.helm, args.join(" "));
        debug!(%command, "running helm");

        let output = Command::new(&self.helm)
            .args(args)
            .output()
            .await
            .map_err(|e| ReleaseError::Command {
                command: command.clone(),
                stderr: e.to_string(),
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            return Err(ReleaseError::Command { command, stderr });
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    /// Refuse to touch a release someone else is mid-way through changing.
    async fn ensure_idle(&self, release: &str, namespace: &str) -> ReleaseResult<ReleaseInfo> {
        let info = self.deployed(release, namespace).await?;
        if let ReleaseState::Pending(status) = &info.state {
            return Err(ReleaseError::Busy {
                release: release.to_string(),
                namespace: namespace.to_string(),
                status: status.clone(),
            });
        }
        Ok(info)
    }

    fn busy_or(&self, release: &str, namespace: &str, err: ReleaseError) -> ReleaseError {
        match err {
            ReleaseError::Command { stderr, .. } if stderr.contains(HELM_BUSY_MARKER) => {
                ReleaseError::Busy {
                    release: release.to_string(),
                    namespace: namespace.to_string(),
                    status: "locked".to_string(),
                }
            }
            other => other,
        }
    }

    /// Managed instance pods scheduled on `hostname`.
    async fn instances(&self, hostname: &str) -> ReleaseResult<Vec<Pod>> {
        let pods: Api<Pod> = Api::namespaced(self.client.clone(), &self.instance_namespace);
        let lp = ListParams::default()
            .labels(&self.instance_selector)
            .fields(&format!("spec.nodeName={hostname}"));
        Ok(pods.list(&lp).await?.items)
    }

    fn pod_image<'a>(&self, pod: &'a Pod) -> Option<&'a str> {
        let containers = &pod.spec.as_ref()?.containers;
        let container = match &self.container {
            Some(name) => containers.iter().find(|c| &c.name == name),
            None => containers.first(),
        }?;
        container.image.as_deref()
    }
}

#[async_trait]
impl ReleaseManager for HelmReleaseManager {
    async fn deployed(&self, release: &str, namespace: &str) -> ReleaseResult<ReleaseInfo> {
        let filter = format!("^{release}$");
        let out = self
            .helm(&["list", "--all", "-n", namespace, "--filter", filter.as_str(), "-o", "json"])
            .await?;
        let entries: Vec<HelmListEntry> =
            serde_json::from_str(&out).map_err(|e| ReleaseError::Parse(e.to_string()))?;
        let entry = entries
            .into_iter()
            .find(|e| e.name == release && e.namespace == namespace)
            .ok_or_else(|| ReleaseError::NotFound {
                release: release.to_string(),
                namespace: namespace.to_string(),
            })?;
        entry_to_info(entry)
    }

    async fn upgrade(
        &self,
        release: &str,
        namespace: &str,
        version: &Version,
    ) -> ReleaseResult<u32> {
        let current = self.ensure_idle(release, namespace).await?;
        if current.version == *version && current.state == ReleaseState::Deployed {
            debug!(%release, %version, revision = current.revision, "release already at target");
            return Ok(current.revision);
        }

        let chart_version = format!("{}{}", self.chart_version_prefix, version);
        self.helm(&[
            "upgrade",
            release,
            self.chart.as_str(),
            "-n",
            namespace,
            "--version",
            chart_version.as_str(),
            "--reuse-values",
        ])
        .await
        .map_err(|e| self.busy_or(release, namespace, e))?;

        let after = self.deployed(release, namespace).await?;
        info!(%release, %version, revision = after.revision, "release upgraded");
        Ok(after.revision)
    }

    async fn rollback(&self, release: &str, namespace: &str) -> ReleaseResult<u32> {
        let current = self.ensure_idle(release, namespace).await?;
        if current.revision <= 1 {
            return Err(ReleaseError::NoPreviousRevision {
                release: release.to_string(),
                namespace: namespace.to_string(),
            });
        }

        self.helm(&["rollback", release, "-n", namespace])
            .await
            .map_err(|e| self.busy_or(release, namespace, e))?;

        let after = self.deployed(release, namespace).await?;
        info!(
            %release,
            from = %current.version,
            to = %after.version,
            revision = after.revision,
            "release rolled back"
        );
        Ok(after.revision)
    }

    async fn current_reported_version(
        &self,
        _release: &str,
        _namespace: &str,
        hostname: &str,
    ) -> ReleaseResult<Version> {
        let pods = self.instances(hostname).await?;
        let pod = pods
            .iter()
            .find(|p| p.metadata.deletion_timestamp.is_none())
            .or_else(|| pods.first())
            .ok_or_else(|| ReleaseError::NoInstance(hostname.to_string()))?;
        let image = self
            .pod_image(pod)
            .ok_or_else(|| ReleaseError::NoInstance(hostname.to_string()))?;
        version_from_image(image).ok_or_else(|| ReleaseError::UnknownVersion(image.to_string()))
    }

    async fn restart_instance(
        &self,
        _release: &str,
        _namespace: &str,
        hostname: &str,
    ) -> ReleaseResult<()> {
        let pods: Api<Pod> = Api::namespaced(self.client.clone(), &self.instance_namespace);
        let instances = self.instances(hostname).await?;
        if instances.is_empty() {
            warn!(node = %hostname, "no managed instance to restart");
        }
        for pod in instances {
            if pod.metadata.deletion_timestamp.is_some() {
                continue;
            }
            let Some(name) = pod.metadata.name else {
                continue;
            };
            pods.delete(&name, &DeleteParams::default()).await?;
            info!(node = %hostname, pod = %name, "instance restarted");
        }
        Ok(())
    }

    async fn wait_ready(
        &self,
        _release: &str,
        _namespace: &str,
        hostname: &str,
        timeout: Duration,
    ) -> ReleaseResult<()> {
        let wait = async {
            loop {
                let instances = self.instances(hostname).await?;
                if instances
                    .iter()
                    .any(|p| p.metadata.deletion_timestamp.is_none() && is_ready(p))
                {
                    return Ok::<_, ReleaseError>(());
                }
                debug!(node = %hostname, "waiting for instance to become ready");
                tokio::time::sleep(self.poll_interval).await;
            }
        };

        match tokio::time::timeout(timeout, wait).await {
            Ok(result) => result,
            Err(_) => Err(ReleaseError::Timeout {
                hostname: hostname.to_string(),
                after: timeout,
            }),
        }
    }
}

fn is_ready(pod: &Pod) -> bool {
    pod.status
        .as_ref()
        .and_then(|s| s.conditions.as_ref())
        .is_some_and(|conds| conds.iter().any(|c| c.type_ == "Ready" && c.status == "True"))
}

fn entry_to_info(entry: HelmListEntry) -> ReleaseResult<ReleaseInfo> {
    let revision = entry
        .revision
        .parse::<u32>()
        .map_err(|_| ReleaseError::Parse(format!("revision {:?}", entry.revision)))?;

    // app_version is authoritative; fall back to the chart's version suffix.
    let version = parse_version(&entry.app_version)
        .ok()
        .or_else(|| {
            entry
                .chart
                .rsplit_once('-')
                .and_then(|(_, v)| parse_version(v).ok())
        })
        .ok_or_else(|| ReleaseError::UnknownVersion(entry.chart.clone()))?;

    Ok(ReleaseInfo {
        name: entry.name,
        namespace: entry.namespace,
        revision,
        version,
        state: ReleaseState::from_helm(&entry.status),
    })
}
