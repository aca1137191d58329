//! # Slice control plane
//!
//! Resources the controller reads (Workloads, Nodes, Jobs) and writes
//! (Slices), the declarative store holding them, and the loop that keeps
//! every admitted workload backed by one Slice per replica.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                  tpuslice control plane                      │
//! │                     (tpuslice serve)                         │
//! │  ┌────────────┐   ┌────────────────┐   ┌──────────────────┐  │
//! │  │ API server │──▶│ ClusterStore   │──▶│ Orchestrator     │  │
//! │  │ + /mutate  │   │ (events)       │   │ workqueue +      │  │
//! │  │ :8181      │◀──│                │◀──│ SliceController  │  │
//! │  └────────────┘   └────────────────┘   └──────────────────┘  │
//! └──────────────────────────────────────────────────────────────┘
//!        ▲                    ▲
//!        │ AdmissionReview    │ workloads, nodes, slice conditions
//!   API server            queueing subsystem / health agent
//! ```

pub mod api;
pub mod assignment;
pub mod controller;
pub mod job;
pub mod node;
pub mod orchestrator;
pub mod reconciler;
pub mod resources;
pub mod retry;
pub mod store;
pub mod workload;
pub mod workqueue;

pub use api::{create_control_plane_router, ControlPlaneState, SliceView};
pub use assignment::{
    is_relevant, partition_ids, relevant_topology, AssignmentError, TopologyAssignment,
    TopologyDomain,
};
pub use controller::{ControllerError, ControllerSettings, SliceController};
pub use job::Job;
pub use node::Node;
pub use orchestrator::{spawn_orchestrator, OrchestratorConfig};
pub use reconciler::{reconcile, ReconcileContext, ReconcileInput, ReconcileOutcome, Write};
pub use resources::*;
pub use retry::{with_backoff, RetryPolicy};
pub use store::{ClusterStats, ClusterStore, SliceClient, StoreError};
pub use workload::{AdmissionCheckState, CheckState, PodSet, Workload};
pub use workqueue::WorkQueue;
