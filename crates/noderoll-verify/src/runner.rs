//! Verification runner — one health-check workload per node turn.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tracing::{debug, info, warn};

use noderoll_cluster::{
    ClusterError, ControlPlane, WorkloadDiagnostics, WorkloadId, WorkloadStatus,
};
use noderoll_core::Campaign;

use crate::error::{VerifyError, VerifyResult};
use crate::template::render;

/// Classified result of a verification run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Outcome {
    Pending,
    Succeeded,
    /// Non-zero exit, or a crash without an exit code.
    Failed,
    /// No terminal state within the verification timeout.
    TimedOut,
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Outcome::Pending => "pending",
            Outcome::Succeeded => "succeeded",
            Outcome::Failed => "failed",
            Outcome::TimedOut => "timed-out",
        })
    }
}

/// One execution of the health check on one node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VerificationRun {
    pub check_id: String,
    pub workload: WorkloadId,
    pub node_hostname: String,
    pub outcome: Outcome,
    pub exit_code: Option<i32>,
    pub diagnostics: WorkloadDiagnostics,
}

impl VerificationRun {
    pub fn succeeded(&self) -> bool {
        self.outcome == Outcome::Succeeded
    }
}

pub struct VerificationRunner {
    cluster: Arc<dyn ControlPlane>,
    timeout: Duration,
    poll_interval: Duration,
}

impl VerificationRunner {
    pub fn new(cluster: Arc<dyn ControlPlane>, timeout: Duration) -> Self {
        Self {
            cluster,
            timeout,
            poll_interval: Duration::from_secs(5),
        }
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Run the campaign's verification workload against `hostname`.
    ///
    /// The workload is deleted before this returns, on every path that got
    /// as far as creating it.
    pub async fn run(&self, hostname: &str, campaign: &Campaign) -> VerifyResult<VerificationRun> {
        let check_id = new_check_id();
        let spec = render(&campaign.verification_template, hostname, &check_id);

        let id = self
            .cluster
            .create_workload(&campaign.verification_namespace, &spec)
            .await
            .map_err(VerifyError::Create)?;
        info!(node = %hostname, workload = %id, %check_id, "verification started");

        let polled = self.wait_terminal(&id).await;

        let diagnostics = match self.cluster.workload_diagnostics(&id).await {
            Ok(d) => d,
            Err(e) => {
                debug!(workload = %id, error = %e, "diagnostics unavailable");
                WorkloadDiagnostics::default()
            }
        };

        if let Err(e) = self.cluster.delete_workload(&id).await {
            warn!(workload = %id, error = %e, "failed to delete verification workload");
        }

        let (outcome, exit_code) = match polled {
            Ok(Some(status)) => classify(&status),
            Ok(None) => (Outcome::TimedOut, None),
            Err(source) => return Err(VerifyError::Poll { id, source }),
        };

        let run = VerificationRun {
            check_id,
            workload: id,
            node_hostname: hostname.to_string(),
            outcome,
            exit_code,
            diagnostics,
        };
        log_run(&run, self.timeout);
        Ok(run)
    }

    /// Poll until terminal. `Ok(None)` means the timeout expired first.
    async fn wait_terminal(
        &self,
        id: &WorkloadId,
    ) -> Result<Option<WorkloadStatus>, ClusterError> {
        let poll = async {
            loop {
                let status = self.cluster.workload_status(id).await?;
                if status.is_terminal() {
                    return Ok::<_, ClusterError>(status);
                }
                debug!(workload = %id, ?status, "verification still running");
                tokio::time::sleep(self.poll_interval).await;
            }
        };

        match tokio::time::timeout(self.timeout, poll).await {
            Ok(result) => result.map(Some),
            Err(_) => Ok(None),
        }
    }
}

fn classify(status: &WorkloadStatus) -> (Outcome, Option<i32>) {
    match status {
        WorkloadStatus::Succeeded => (Outcome::Succeeded, Some(0)),
        WorkloadStatus::Failed {
            exit_code: Some(0), ..
        } => (Outcome::Succeeded, Some(0)),
        WorkloadStatus::Failed { exit_code, .. } => (Outcome::Failed, *exit_code),
        WorkloadStatus::Pending | WorkloadStatus::Running => (Outcome::Pending, None),
    }
}

fn log_run(run: &VerificationRun, timeout: Duration) {
    let d = &run.diagnostics;
    match run.outcome {
        Outcome::Succeeded => info!(
            node = %run.node_hostname,
            workload = %run.workload,
            "verification succeeded"
        ),
        Outcome::TimedOut => warn!(
            node = %run.node_hostname,
            workload = %run.workload,
            ?timeout,
            conditions = ?d.conditions,
            events = ?d.events,
            logs = %d.logs,
            "verification timed out"
        ),
        Outcome::Failed | Outcome::Pending => warn!(
            node = %run.node_hostname,
            workload = %run.workload,
            exit_code = ?run.exit_code,
            conditions = ?d.conditions,
            events = ?d.events,
            logs = %d.logs,
            "verification failed"
        ),
    }
}

/// Short unique id, valid inside a DNS-1123 object name.
fn new_check_id() -> String {
    let mut id = uuid::Uuid::new_v4().simple().to_string();
    id.truncate(12);
    id
}
