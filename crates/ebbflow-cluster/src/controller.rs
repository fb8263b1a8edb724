//! Contracts for the collaborators the autoscaler drives.
//!
//! Every remote operation returns a boxed future. Implementations that finish
//! synchronously return an already-completed future
//! (`Box::pin(std::future::ready(..))`), so callers never branch on the shape
//! of the return value.

use std::collections::BTreeSet;
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use crate::error::ClusterResult;
use crate::types::*;

/// Boxed future alias for collaborator operations.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Point-in-time copy of the three worker sets of a cluster.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClusterState {
    /// Workers the cluster intends to have.
    pub plan: BTreeSet<WorkerId>,
    /// Workers whose provisioning has been issued.
    pub requested: BTreeSet<WorkerId>,
    /// Workers confirmed running.
    pub observed: BTreeSet<WorkerId>,
}

impl ClusterState {
    /// Whether plan and requested agree in size.
    pub fn is_reconciled(&self) -> bool {
        self.plan.len() == self.requested.len()
    }

    /// Requested workers that have not shown up yet.
    pub fn not_yet_arrived(&self) -> impl Iterator<Item = &WorkerId> {
        self.requested.difference(&self.observed)
    }
}

/// The component that owns worker provisioning for a cluster.
pub trait ClusterController: Send + Sync {
    fn status(&self) -> ClusterStatus;

    fn plan(&self) -> BTreeSet<WorkerId>;

    fn requested(&self) -> BTreeSet<WorkerId>;

    fn observed(&self) -> BTreeSet<WorkerId>;

    /// Snapshot all three worker sets at once.
    fn state(&self) -> ClusterState {
        ClusterState {
            plan: self.plan(),
            requested: self.requested(),
            observed: self.observed(),
        }
    }

    /// Request that the plan grows (or shrinks) to `n` workers.
    ///
    /// Completes once the request is accepted, not once workers arrive.
    fn scale(&self, n: usize) -> BoxFuture<'_, ClusterResult<()>>;

    /// Forcefully remove the named workers.
    fn scale_down<'a>(&'a self, workers: &'a [WorkerId]) -> BoxFuture<'a, ClusterResult<()>>;

    /// Wait until requested workers match the plan.
    fn reconcile(&self) -> BoxFuture<'_, ClusterResult<()>>;
}

/// RPC surface of the scheduler that tracks tasks and connected workers.
pub trait SchedulerProxy: Send + Sync {
    /// Number of workers needed to drain the queue within `target_duration`.
    fn adaptive_target(&self, target_duration: Duration) -> BoxFuture<'_, ClusterResult<usize>>;

    /// Workers that could be removed to shrink towards `request.target`.
    fn workers_to_close<'a>(
        &'a self,
        request: &'a CloseRequest,
    ) -> BoxFuture<'a, ClusterResult<Vec<WorkerId>>>;

    /// Drain the named workers and close them.
    fn retire_workers<'a>(&'a self, request: &'a RetireRequest)
    -> BoxFuture<'a, ClusterResult<()>>;

    /// Memory statistics of every connected worker.
    fn worker_stats(&self) -> BoxFuture<'_, ClusterResult<Vec<WorkerStats>>>;

    /// State and dependents of every task in the graph.
    fn tasks(&self) -> BoxFuture<'_, ClusterResult<Vec<TaskSummary>>>;
}
