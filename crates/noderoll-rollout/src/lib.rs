//! noderoll-rollout — node-by-node upgrade of a privileged per-node component.
//!
//! # Architecture
//!
//! ```text
//! FleetSequencer::run(campaign)
//!   ├── Campaign::validate()         config errors before any node is touched
//!   ├── selector::resolve()          ordered by hostname
//!   ├── in-flight guard              at most one node mid-turn, cluster wide
//!   └── for each node, strictly in order
//!       └── NodeUpgrade::advance()
//!             preparing → cordoned → [draining] → upgrading → verifying → completed
//!                                          └──────────┴────────────┴──→ rolling-back → rolled-back
//! ```
//!
//! Every phase is written to the node's annotations before its action runs,
//! so a crashed or interrupted run resumes each node from where it stopped.
//! The first node that does not complete stops the campaign.

pub mod error;
pub mod machine;
pub mod report;
pub mod selector;
pub mod sequencer;

pub use error::{NodeError, RolloutError, RolloutResult};
pub use machine::{NodeOutcome, NodeUpgrade};
pub use report::{CampaignReport, NodeFailure, PlannedAction, PlannedNode};
pub use selector::resolve;
pub use sequencer::FleetSequencer;
