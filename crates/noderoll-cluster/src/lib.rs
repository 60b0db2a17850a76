//! noderoll-cluster — the control plane as seen by the rollout orchestrator.
//!
//! # Architecture
//!
//! ```text
//! ControlPlane (trait)
//!   ├── KubeControlPlane   kube-rs client against a live API server
//!   └── MemoryCluster      in-process nodes and workloads (tests, dry runs)
//! ```
//!
//! Everything the orchestrator mutates on a node goes through this trait:
//! schedulability, annotations, pod eviction, and the verification
//! workload's lifecycle. Cordon and uncordon are idempotent in both
//! implementations.

pub mod control_plane;
pub mod error;
pub mod kube_impl;
pub mod memory;

pub use control_plane::{
    AnnotationPatch, ControlPlane, WorkloadDiagnostics, WorkloadId, WorkloadStatus,
};
pub use error::{ClusterError, ClusterResult};
pub use kube_impl::KubeControlPlane;
pub use memory::{ClusterOp, MemoryCluster, MemoryNode};
