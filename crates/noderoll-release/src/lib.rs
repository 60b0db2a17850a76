//! noderoll-release — the managed component's release and its per-node instances.
//!
//! The release is the shared desired spec (one Helm release for the whole
//! fleet). Upgrading it must not restart anything by itself: the managed
//! DaemonSet is expected to use the `OnDelete` update strategy, so the
//! orchestrator restarts exactly one node's instance at a time.
//!
//! ```text
//! ReleaseManager (trait)
//!   ├── HelmReleaseManager   `helm` CLI for the release, kube-rs for instances
//!   └── MemoryReleases       in-process revisions and instances
//! ```

pub mod error;
pub mod helm;
pub mod manager;
pub mod memory;

pub use error::{ReleaseError, ReleaseResult};
pub use helm::HelmReleaseManager;
pub use manager::{ReleaseInfo, ReleaseManager, ReleaseState};
pub use memory::{MemoryReleases, ReleaseOp};
