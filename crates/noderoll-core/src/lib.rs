//! noderoll-core — shared types for the node-by-node rollout orchestrator.
//!
//! Everything in here is plain data: the immutable [`Campaign`] an operator
//! submits, the persisted [`Phase`] ladder each node climbs, the label
//! selector grammar used to pick nodes, and the `noderoll.toml` config.
//! No I/O beyond reading the config file.

pub mod campaign;
pub mod config;
pub mod error;
pub mod phase;
pub mod selector;
pub mod version;

pub use campaign::Campaign;
pub use config::{NoderollConfig, ReleaseConfig, RolloutConfig, StatusConfig, parse_duration};
pub use error::ConfigError;
pub use phase::{NodeStatus, NodeTarget, Phase};
pub use selector::{LabelSelector, Requirement};
pub use version::{parse_version, version_from_image};

pub use semver::Version;
