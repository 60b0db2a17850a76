//! Configuration errors.
//!
//! Everything here is raised before a single node is touched, so every
//! variant is recoverable by resubmitting with corrected input.

use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("no selection criteria: a label expression or a taint key is required")]
    NoSelectionCriteria,

    #[error("target version {target} is below the configured minimum {minimum}")]
    VersionBelowMinimum { target: String, minimum: String },

    #[error("verification template is missing or empty")]
    MissingVerificationTemplate,

    #[error("invalid version {value:?}: {reason}")]
    InvalidVersion { value: String, reason: String },

    #[error("invalid label selector {expr:?}: {reason}")]
    InvalidSelector { expr: String, reason: String },

    #[error("invalid duration {0:?}")]
    InvalidDuration(String),

    #[error("node {hostname} is already mid-upgrade: {detail}")]
    InFlight { hostname: String, detail: String },

    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
}
