//! noderoll-state — durable per-node rollout state.
//!
//! There is no database. A node's upgrade phase, its last known-good
//! version, the campaign target it was prepared for, and the rollback
//! marker are stored as annotations on the node object itself:
//!
//! ```text
//! noderoll.io/phase            preparing | cordoned | ... | rolled-back
//! noderoll.io/current-version  3.26.4
//! noderoll.io/target-version   3.27.0
//! noderoll.io/revert-release   true | false
//! ```
//!
//! Anything an operator can read with `kubectl get node -o yaml` is the
//! whole truth; a crashed orchestrator rebuilds its view from it.

pub mod error;
pub mod store;

pub use error::{StateError, StateResult};
pub use store::{AnnotationKeys, StatusStore};
