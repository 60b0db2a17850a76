//! Campaign — one rollout request for a target component version.

use std::time::Duration;

use semver::Version;

use crate::error::ConfigError;
use crate::selector::LabelSelector;

/// Template token replaced with the node hostname.
pub const NODE_NAME_TOKEN: &str = "{{NODE_NAME}}";
/// Template token replaced with a per-run unique identifier.
pub const CHECK_ID_TOKEN: &str = "{{CHECK_ID}}";

/// Operator-supplied parameters for one rollout.
///
/// Immutable once submitted; the sequencer and state machine only read it.
#[derive(Debug, Clone)]
pub struct Campaign {
    pub target_version: Version,
    pub release_name: String,
    pub release_namespace: String,
    /// Label expression; may be empty when a taint key is given.
    pub node_selector: String,
    pub taint_key: Option<String>,
    pub taint_value: Option<String>,
    pub drain_enabled: bool,
    pub drain_timeout: Duration,
    /// Opaque workload definition containing the placeholder tokens.
    pub verification_template: String,
    pub verification_namespace: String,
}

impl Campaign {
    /// Check the campaign against the configured minimum version.
    ///
    /// Returns the parsed label selector so callers don't parse it twice.
    pub fn validate(&self, minimum: &Version) -> Result<LabelSelector, ConfigError> {
        let selector: LabelSelector = self.node_selector.parse()?;
        let has_taint = self.taint_key.as_deref().is_some_and(|k| !k.trim().is_empty());
        if selector.is_empty() && !has_taint {
            return Err(ConfigError::NoSelectionCriteria);
        }

        if self.target_version < *minimum {
            return Err(ConfigError::VersionBelowMinimum {
                target: self.target_version.to_string(),
                minimum: minimum.to_string(),
            });
        }

        if self.verification_template.trim().is_empty() {
            return Err(ConfigError::MissingVerificationTemplate);
        }

        Ok(selector)
    }

    /// Taint key with blank values treated as absent.
    pub fn taint_key(&self) -> Option<&str> {
        self.taint_key.as_deref().map(str::trim).filter(|k| !k.is_empty())
    }

    pub fn taint_value(&self) -> Option<&str> {
        self.taint_value.as_deref().map(str::trim).filter(|v| !v.is_empty())
    }
}
