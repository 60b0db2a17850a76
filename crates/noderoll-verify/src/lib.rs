//! noderoll-verify — the post-upgrade health gate for one node.
//!
//! The operator supplies a workload definition containing two tokens,
//! `{{NODE_NAME}}` and `{{CHECK_ID}}`. For each run the template is rendered
//! for the node under test, created through the control plane, polled until
//! it terminates or the verification timeout expires, and then deleted
//! whatever the outcome.
//!
//! ```text
//! VerificationRunner::run(hostname, campaign)
//!   ├── render()            exactly two tokens, nothing is evaluated
//!   ├── create_workload()
//!   ├── poll workload_status() under tokio::time::timeout
//!   ├── workload_diagnostics()   conditions, events, logs
//!   └── delete_workload()        always
//! ```

pub mod error;
pub mod runner;
pub mod template;

pub use error::{VerifyError, VerifyResult};
pub use runner::{Outcome, VerificationRun, VerificationRunner};
pub use template::render;
