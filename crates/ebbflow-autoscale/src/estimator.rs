//! Target estimators — how many workers the cluster should have right now.
//!
//! Two strategies are provided and chosen at construction:
//!
//! - [`DurationEstimator`] asks the scheduler how many workers it needs to
//!   finish the current queue within `target_duration`.
//! - [`QueueEstimator`] works without task duration estimates, from the
//!   backlog of unblocked tasks, their dependents, and memory pressure.

use std::sync::Arc;
use std::time::Duration;

use ebbflow_cluster::{BoxFuture, ClusterController, SchedulerProxy, TaskSummary, WorkerStats};
use tracing::debug;

use crate::error::{AutoscaleError, AutoscaleResult};

/// Produces the raw (unclamped) target worker count for a tick.
pub trait TargetEstimator: Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &'static str;

    fn target(&self) -> BoxFuture<'_, AutoscaleResult<usize>>;
}

/// Delegates to the scheduler's queue-time estimate.
pub struct DurationEstimator {
    scheduler: Arc<dyn SchedulerProxy>,
    target_duration: Duration,
}

impl DurationEstimator {
    pub fn new(scheduler: Arc<dyn SchedulerProxy>, target_duration: Duration) -> Self {
        Self {
            scheduler,
            target_duration,
        }
    }
}

impl TargetEstimator for DurationEstimator {
    fn name(&self) -> &'static str {
        "duration"
    }

    fn target(&self) -> BoxFuture<'_, AutoscaleResult<usize>> {
        Box::pin(async move {
            self.scheduler
                .adaptive_target(self.target_duration)
                .await
                .map_err(AutoscaleError::Estimate)
        })
    }
}

/// Estimates from task backlog and memory pressure.
pub struct QueueEstimator {
    cluster: Arc<dyn ClusterController>,
    scheduler: Arc<dyn SchedulerProxy>,
}

impl QueueEstimator {
    pub fn new(cluster: Arc<dyn ClusterController>, scheduler: Arc<dyn SchedulerProxy>) -> Self {
        Self { cluster, scheduler }
    }
}

impl TargetEstimator for QueueEstimator {
    fn name(&self) -> &'static str {
        "queue"
    }

    fn target(&self) -> BoxFuture<'_, AutoscaleResult<usize>> {
        Box::pin(async move {
            let tasks = self
                .scheduler
                .tasks()
                .await
                .map_err(AutoscaleError::Estimate)?;
            let workers = self
                .scheduler
                .worker_stats()
                .await
                .map_err(AutoscaleError::Estimate)?;
            let observed = self.cluster.observed().len();

            let target = queue_target(&tasks, &workers, observed);
            if target != workers.len() {
                debug!(desired = target, workers = workers.len(), "queue target");
            }
            Ok(target)
        })
    }
}

/// Target from the task backlog and worker memory.
///
/// `workers` are the workers the scheduler knows about; `observed` is the
/// number of workers the cluster has confirmed running.
pub fn queue_target(tasks: &[TaskSummary], workers: &[WorkerStats], observed: usize) -> usize {
    let unblocked: Vec<&TaskSummary> = tasks.iter().filter(|t| t.state.is_unblocked()).collect();
    let mut target = unblocked.len();

    // Look ahead: a wide layer of dependents means a burst once current
    // work clears. Duplicates are counted.
    let future_pending: usize = unblocked.iter().map(|t| t.dependents.len()).sum();
    if future_pending > 2 * workers.len() {
        target *= 2;
    }

    target.max(memory_target(workers, observed))
}

/// Twice the observed worker count when more than 60% of the summed memory
/// limit is in use, otherwise zero.
pub fn memory_target(workers: &[WorkerStats], observed: usize) -> usize {
    let limit: u128 = workers.iter().map(|w| w.memory_limit as u128).sum();
    let used: u128 = workers.iter().map(|w| w.memory_used as u128).sum();

    if limit > 0 && used * 10 > limit * 6 {
        2 * observed
    } else {
        0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ebbflow_cluster::{LocalCluster, TaskState};

    fn task(key: &str, state: TaskState, dependents: &[&str]) -> TaskSummary {
        TaskSummary::new(key, state).with_dependents(dependents.iter().copied())
    }

    fn workers(n: usize, used: u64, limit: u64) -> Vec<WorkerStats> {
        (0..n)
            .map(|i| WorkerStats::new(format!("w{i}"), used, limit))
            .collect()
    }

    #[test]
    fn counts_only_unblocked_tasks() {
        let tasks = vec![
            task("a", TaskState::NoWorker, &[]),
            task("b", TaskState::Waiting, &[]),
            task("c", TaskState::Processing, &[]),
            task("d", TaskState::Memory, &[]),
            task("e", TaskState::Queued, &[]),
            task("f", TaskState::Released, &[]),
        ];
        assert_eq!(queue_target(&tasks, &workers(3, 0, 100), 3), 3);
    }

    #[test]
    fn empty_graph_targets_zero() {
        assert_eq!(queue_target(&[], &workers(4, 10, 100), 4), 0);
        assert_eq!(queue_target(&[], &[], 0), 0);
    }

    #[test]
    fn look_ahead_doubles_target() {
        // 4 unblocked tasks with 9 dependents between them, 4 workers.
        let tasks = vec![
            task("a", TaskState::Processing, &["x", "y", "z"]),
            task("b", TaskState::Processing, &["x", "y"]),
            task("c", TaskState::Waiting, &["x", "y"]),
            task("d", TaskState::NoWorker, &["z", "z"]),
        ];
        assert_eq!(queue_target(&tasks, &workers(4, 0, 100), 4), 8);
    }

    #[test]
    fn look_ahead_needs_strictly_more_than_twice_workers() {
        let tasks = vec![
            task("a", TaskState::Processing, &["x", "y", "z", "w"]),
            task("b", TaskState::Processing, &["x", "y", "z", "w"]),
        ];
        // 8 dependents, 4 workers: not a burst.
        assert_eq!(queue_target(&tasks, &workers(4, 0, 100), 4), 2);
    }

    #[test]
    fn dependents_of_blocked_tasks_are_ignored() {
        let tasks = vec![
            task("a", TaskState::Processing, &[]),
            task("b", TaskState::Memory, &["x", "y", "z", "w", "v"]),
        ];
        assert_eq!(queue_target(&tasks, &workers(1, 0, 100), 1), 1);
    }

    #[test]
    fn memory_pressure_dominates_queue() {
        // used 61 of 100, 5 observed workers, queue target 3.
        let mut stats = workers(5, 0, 20);
        stats[0].memory_used = 61;
        assert_eq!(memory_target(&stats, 5), 10);

        let tasks = vec![
            task("a", TaskState::Processing, &[]),
            task("b", TaskState::Processing, &[]),
            task("c", TaskState::Processing, &[]),
        ];
        assert_eq!(queue_target(&tasks, &stats, 5), 10);
    }

    #[test]
    fn memory_at_threshold_is_not_pressure() {
        let stats = workers(1, 60, 100);
        assert_eq!(memory_target(&stats, 1), 0);
    }

    #[test]
    fn no_workers_means_no_memory_target() {
        assert_eq!(memory_target(&[], 5), 0);
        // Usage without any limit never counts as pressure.
        assert_eq!(memory_target(&workers(2, 500, 0), 2), 0);
    }

    #[tokio::test]
    async fn duration_estimator_passes_through() {
        let cluster = LocalCluster::new("test", 100);
        cluster.add_worker(WorkerStats::new("w0", 0, 100));
        let mut tasks = Vec::new();
        for i in 0..6 {
            let mut t = TaskSummary::new(format!("t{i}"), TaskState::Processing);
            t.expected_duration_ms = Some(2_000);
            tasks.push(t);
        }
        cluster.set_tasks(tasks);

        let estimator = DurationEstimator::new(Arc::new(cluster), Duration::from_secs(4));
        assert_eq!(estimator.name(), "duration");
        assert_eq!(estimator.target().await.unwrap(), 3);
    }

    #[tokio::test]
    async fn queue_estimator_reads_fresh_snapshot() {
        let cluster = LocalCluster::new("test", 100);
        cluster.add_worker(WorkerStats::new("w0", 0, 100));
        cluster.set_tasks(vec![task("a", TaskState::Waiting, &[])]);

        let shared = Arc::new(cluster.clone());
        let estimator = QueueEstimator::new(shared.clone(), shared);
        assert_eq!(estimator.target().await.unwrap(), 1);

        cluster.set_tasks(vec![
            task("a", TaskState::Waiting, &[]),
            task("b", TaskState::Waiting, &[]),
        ]);
        assert_eq!(estimator.target().await.unwrap(), 2);
    }
}
