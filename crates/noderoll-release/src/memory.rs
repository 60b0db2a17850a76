//! In-process [`ReleaseManager`] for tests and dry runs.
//!
//! Models Helm's revision history (a rollback appends a copy of the previous
//! revision) and an `OnDelete` DaemonSet: an instance only picks up the
//! release's desired version when it is restarted.

use std::collections::{BTreeMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

use noderoll_core::Version;

use crate::error::{ReleaseError, ReleaseResult};
use crate::manager::{ReleaseInfo, ReleaseManager, ReleaseState};

/// A mutating call observed by the memory release manager.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReleaseOp {
    Upgrade(Version),
    Rollback,
    Restart(String),
}

#[derive(Debug, Clone)]
struct MemoryRelease {
    /// Desired version per revision; revision N is `history[N - 1]`.
    history: Vec<Version>,
    pending: Option<String>,
}

#[derive(Debug, Clone)]
struct Instance {
    version: Version,
    ready: bool,
}

#[derive(Default)]
struct Inner {
    releases: BTreeMap<(String, String), MemoryRelease>,
    instances: BTreeMap<String, Instance>,
    never_ready: HashSet<String>,
    pinned: BTreeMap<String, Version>,
    failing_upgrades: bool,
    journal: Vec<ReleaseOp>,
}

#[derive(Clone, Default)]
pub struct MemoryReleases {
    inner: Arc<Mutex<Inner>>,
}

impl MemoryReleases {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Create a release at revision 1.
    pub fn install(&self, release: &str, namespace: &str, version: Version) {
        self.lock().releases.insert(
            (release.to_string(), namespace.to_string()),
            MemoryRelease {
                history: vec![version],
                pending: None,
            },
        );
    }

    /// Place a ready instance running `version` on `hostname`.
    pub fn add_instance(&self, hostname: &str, version: Version) {
        self.lock().instances.insert(
            hostname.to_string(),
            Instance {
                version,
                ready: true,
            },
        );
    }

    /// Simulate an external actor holding the release mid-operation.
    pub fn set_pending(&self, release: &str, namespace: &str, status: Option<&str>) {
        let key = (release.to_string(), namespace.to_string());
        if let Some(r) = self.lock().releases.get_mut(&key) {
            r.pending = status.map(str::to_string);
        }
    }

    /// Restarted instances on `hostname` never become ready.
    pub fn never_ready(&self, hostname: &str) {
        self.lock().never_ready.insert(hostname.to_string());
    }

    /// Restarts on `hostname` come back at `version` whatever the release
    /// asks for, like a chart whose values never change the image.
    pub fn pin_version(&self, hostname: &str, version: Version) {
        self.lock().pinned.insert(hostname.to_string(), version);
    }

    pub fn fail_upgrades(&self) {
        self.lock().failing_upgrades = true;
    }

    pub fn instance_version(&self, hostname: &str) -> Option<Version> {
        self.lock().instances.get(hostname).map(|i| i.version.clone())
    }

    pub fn desired_version(&self, release: &str, namespace: &str) -> Option<Version> {
        let key = (release.to_string(), namespace.to_string());
        self.lock()
            .releases
            .get(&key)
            .and_then(|r| r.history.last().cloned())
    }

    pub fn journal(&self) -> Vec<ReleaseOp> {
        self.lock().journal.clone()
    }

    pub fn upgrade_count(&self) -> usize {
        self.lock()
            .journal
            .iter()
            .filter(|op| matches!(op, ReleaseOp::Upgrade(_)))
            .count()
    }
}

fn not_found(release: &str, namespace: &str) -> ReleaseError {
    ReleaseError::NotFound {
        release: release.to_string(),
        namespace: namespace.to_string(),
    }
}

fn busy(release: &str, namespace: &str, status: &str) -> ReleaseError {
    ReleaseError::Busy {
        release: release.to_string(),
        namespace: namespace.to_string(),
        status: status.to_string(),
    }
}

impl Inner {
    fn release_mut(&mut self, release: &str, namespace: &str) -> ReleaseResult<&mut MemoryRelease> {
        let r = self
            .releases
            .get_mut(&(release.to_string(), namespace.to_string()))
            .ok_or_else(|| not_found(release, namespace))?;
        if let Some(status) = &r.pending {
            return Err(busy(release, namespace, status));
        }
        Ok(r)
    }
}

#[async_trait]
impl ReleaseManager for MemoryReleases {
    async fn deployed(&self, release: &str, namespace: &str) -> ReleaseResult<ReleaseInfo> {
        let inner = self.lock();
        let r = inner
            .releases
            .get(&(release.to_string(), namespace.to_string()))
            .ok_or_else(|| not_found(release, namespace))?;
        let version = r
            .history
            .last()
            .cloned()
            .ok_or_else(|| not_found(release, namespace))?;
        Ok(ReleaseInfo {
            name: release.to_string(),
            namespace: namespace.to_string(),
            revision: r.history.len() as u32,
            version,
            state: match &r.pending {
                Some(status) => ReleaseState::Pending(status.clone()),
                None => ReleaseState::Deployed,
            },
        })
    }

    async fn upgrade(
        &self,
        release: &str,
        namespace: &str,
        version: &Version,
    ) -> ReleaseResult<u32> {
        let mut inner = self.lock();
        if inner.failing_upgrades {
            return Err(ReleaseError::Command {
                command: format!("upgrade {release}"),
                stderr: "chart not found".to_string(),
            });
        }
        let r = inner.release_mut(release, namespace)?;
        if r.history.last() != Some(version) {
            r.history.push(version.clone());
        }
        let revision = r.history.len() as u32;
        inner.journal.push(ReleaseOp::Upgrade(version.clone()));
        Ok(revision)
    }

    async fn rollback(&self, release: &str, namespace: &str) -> ReleaseResult<u32> {
        let mut inner = self.lock();
        let r = inner.release_mut(release, namespace)?;
        if r.history.len() < 2 {
            return Err(ReleaseError::NoPreviousRevision {
                release: release.to_string(),
                namespace: namespace.to_string(),
            });
        }
        let previous = r.history[r.history.len() - 2].clone();
        r.history.push(previous);
        let revision = r.history.len() as u32;
        inner.journal.push(ReleaseOp::Rollback);
        Ok(revision)
    }

    async fn current_reported_version(
        &self,
        _release: &str,
        _namespace: &str,
        hostname: &str,
    ) -> ReleaseResult<Version> {
        self.instance_version(hostname)
            .ok_or_else(|| ReleaseError::NoInstance(hostname.to_string()))
    }

    async fn restart_instance(
        &self,
        release: &str,
        namespace: &str,
        hostname: &str,
    ) -> ReleaseResult<()> {
        let desired = self
            .desired_version(release, namespace)
            .ok_or_else(|| not_found(release, namespace))?;
        let mut inner = self.lock();
        let ready = !inner.never_ready.contains(hostname);
        let version = inner.pinned.get(hostname).cloned().unwrap_or(desired);
        let instance = inner
            .instances
            .get_mut(hostname)
            .ok_or_else(|| ReleaseError::NoInstance(hostname.to_string()))?;
        instance.version = version.clone();
        instance.ready = ready;
        inner.journal.push(ReleaseOp::Restart(hostname.to_string()));
        debug!(node = %hostname, %version, "memory instance restarted");
        Ok(())
    }

    async fn wait_ready(
        &self,
        _release: &str,
        _namespace: &str,
        hostname: &str,
        timeout: Duration,
    ) -> ReleaseResult<()> {
        let ready = self
            .lock()
            .instances
            .get(hostname)
            .map(|i| i.ready)
            .ok_or_else(|| ReleaseError::NoInstance(hostname.to_string()))?;
        if ready {
            return Ok(());
        }
        tokio::time::sleep(timeout).await;
        Err(ReleaseError::Timeout {
            hostname: hostname.to_string(),
            after: timeout,
        })
    }
}
