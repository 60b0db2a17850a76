//! noderoll.toml configuration parser.

use std::path::Path;
use std::time::Duration;

use semver::Version;
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::version::parse_version;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct NoderollConfig {
    pub release: ReleaseConfig,
    pub rollout: RolloutConfig,
    pub status: StatusConfig,
}

/// Where the managed component lives and how to find its per-node instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReleaseConfig {
    pub name: String,
    pub namespace: String,
    /// Chart reference passed to `helm upgrade`.
    pub chart: String,
    /// Prepended to the target version for `helm upgrade --version`.
    pub chart_version_prefix: String,
    /// Namespace of the per-node instance pods.
    pub instance_namespace: String,
    /// Label selector matching the per-node instance pods.
    pub instance_selector: String,
    /// Container whose image tag is the reported version. First container if unset.
    pub container: Option<String>,
    pub helm_binary: String,
}

impl Default for ReleaseConfig {
    fn default() -> Self {
        Self {
            name: "calico".to_string(),
            namespace: "tigera-operator".to_string(),
            chart: "projectcalico/tigera-operator".to_string(),
            chart_version_prefix: "v".to_string(),
            instance_namespace: "calico-system".to_string(),
            instance_selector: "k8s-app=calico-node".to_string(),
            container: None,
            helm_binary: "helm".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RolloutConfig {
    /// Campaigns targeting anything older are rejected.
    pub minimum_version: String,
    pub ready_timeout: String,
    pub verification_timeout: String,
    pub drain_timeout: String,
    pub poll_interval: String,
    pub verification_namespace: String,
}

impl Default for RolloutConfig {
    fn default() -> Self {
        Self {
            minimum_version: "0.0.0".to_string(),
            ready_timeout: "5m".to_string(),
            verification_timeout: "10m".to_string(),
            drain_timeout: "5m".to_string(),
            poll_interval: "5s".to_string(),
            verification_namespace: "default".to_string(),
        }
    }
}

impl RolloutConfig {
    pub fn minimum_version(&self) -> Result<Version, ConfigError> {
        parse_version(&self.minimum_version)
    }

    pub fn ready_timeout(&self) -> Result<Duration, ConfigError> {
        required_duration(&self.ready_timeout)
    }

    pub fn verification_timeout(&self) -> Result<Duration, ConfigError> {
        required_duration(&self.verification_timeout)
    }

    pub fn drain_timeout(&self) -> Result<Duration, ConfigError> {
        required_duration(&self.drain_timeout)
    }

    pub fn poll_interval(&self) -> Result<Duration, ConfigError> {
        required_duration(&self.poll_interval)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StatusConfig {
    /// Prefix for the node annotations holding rollout state.
    pub annotation_prefix: String,
}

impl Default for StatusConfig {
    fn default() -> Self {
        Self {
            annotation_prefix: "noderoll.io".to_string(),
        }
    }
}

impl NoderollConfig {
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config: NoderollConfig = toml::from_str(&content)?;
        Ok(config)
    }

    /// Load from `path` if given, otherwise fall back to built-in defaults.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        match path {
            Some(p) => Self::from_file(p),
            None => Ok(Self::default()),
        }
    }
}

fn required_duration(s: &str) -> Result<Duration, ConfigError> {
    parse_duration(s).ok_or_else(|| ConfigError::InvalidDuration(s.to_string()))
}

/// Parse a duration string like "5s", "500ms", "1m", "2h".
///
/// A bare number is taken as seconds.
pub fn parse_duration(s: &str) -> Option<Duration> {
    let s = s.trim();
    if let Some(ms) = s.strip_suffix("ms") {
        ms.parse::<u64>().ok().map(Duration::from_millis)
    } else if let Some(secs) = s.strip_suffix('s') {
        secs.parse::<u64>().ok().map(Duration::from_secs)
    } else if let Some(mins) = s.strip_suffix('m') {
        mins
            .parse::<u64>()
            .ok()
            .and_then(|m| m.checked_mul(60))
            .map(Duration::from_secs)
    } else if let Some(hours) = s.strip_suffix('h') {
        hours
            .parse::<u64>()
            .ok()
            .and_then(|h| h.checked_mul(3600))
            .map(Duration::from_secs)
    } else {
        s.parse::<u64>().ok().map(Duration::from_secs)
    }
}
