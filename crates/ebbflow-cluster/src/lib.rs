//! ebbflow-cluster — the cluster view consumed by the autoscaler.
//!
//! Defines the contracts of the two remote collaborators the autoscaler
//! talks to, the snapshot types it reads every tick, and an in-memory
//! implementation of both contracts.
//!
//! # Architecture
//!
//! ```text
//! ClusterController            SchedulerProxy
//!   ├── status()                 ├── adaptive_target(duration)
//!   ├── plan / requested /       ├── workers_to_close(CloseRequest)
//!   │   observed                 ├── retire_workers(RetireRequest)
//!   ├── scale(n)                 ├── worker_stats()
//!   ├── scale_down(workers)      └── tasks()
//!   └── reconcile()
//!
//! LocalCluster implements both (tests, simulation).
//! ```

pub mod controller;
pub mod error;
pub mod local;
pub mod types;

pub use controller::{BoxFuture, ClusterController, ClusterState, SchedulerProxy};
pub use error::{ClusterError, ClusterResult};
pub use local::LocalCluster;
pub use types::*;
