//! LocalCluster — an in-process cluster controller and scheduler proxy.
//!
//! Workers are plain records; nothing is actually launched. Provisioning is
//! modelled in three explicit steps so callers can observe every skew the
//! autoscaler has to cope with:
//!
//! ```text
//! scale(n)      plan      ← n workers
//! reconcile()   requested ← plan       (launch / cancel)
//! arrive_all()  observed  ← requested  (workers connect)
//! ```
//!
//! Used by tests and by the `ebbflowd simulate` driver.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tracing::debug;

use crate::controller::{BoxFuture, ClusterController, SchedulerProxy};
use crate::error::{ClusterError, ClusterResult};
use crate::types::*;

/// Default duration assumed for tasks without an estimate.
const UNKNOWN_TASK_DURATION_MS: u64 = 500;

struct Inner {
    name: String,
    status: ClusterStatus,
    plan: BTreeSet<WorkerId>,
    requested: BTreeSet<WorkerId>,
    /// Connected workers (the observed set).
    workers: BTreeMap<WorkerId, WorkerStats>,
    /// Launch batch of each planned worker, stamped when it was planned.
    batches: BTreeMap<WorkerId, u64>,
    tasks: Vec<TaskSummary>,
    next_id: u64,
    next_batch: u64,
    memory_limit: u64,
    retired: Vec<WorkerId>,
}

impl Inner {
    fn new_worker_id(&mut self) -> WorkerId {
        let id = format!("{}-worker-{}", self.name, self.next_id);
        self.next_id += 1;
        id
    }

    fn forget(&mut self, id: &str) {
        self.plan.remove(id);
        self.requested.remove(id);
        self.workers.remove(id);
        self.batches.remove(id);
    }
}

/// Thread-safe in-memory cluster.
#[derive(Clone)]
pub struct LocalCluster {
    inner: Arc<Mutex<Inner>>,
}

impl LocalCluster {
    /// Create an empty running cluster whose new workers get `memory_limit` bytes.
    pub fn new(name: &str, memory_limit: u64) -> Self {
        let inner = Inner {
            name: name.to_string(),
            status: ClusterStatus::Running,
            plan: BTreeSet::new(),
            requested: BTreeSet::new(),
            workers: BTreeMap::new(),
            batches: BTreeMap::new(),
            tasks: Vec::new(),
            next_id: 0,
            next_batch: 0,
            memory_limit,
            retired: Vec::new(),
        };
        debug!(%name, "local cluster created");
        Self {
            inner: Arc::new(Mutex::new(inner)),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Add a worker that is planned, requested and connected.
    pub fn add_worker(&self, stats: WorkerStats) {
        let mut inner = self.lock();
        inner.plan.insert(stats.id.clone());
        inner.requested.insert(stats.id.clone());
        inner.batches.insert(stats.id.clone(), stats.launch_batch);
        inner.workers.insert(stats.id.clone(), stats);
    }

    /// Replace the task graph summary.
    pub fn set_tasks(&self, tasks: Vec<TaskSummary>) {
        self.lock().tasks = tasks;
    }

    /// Update the memory and processing load reported by a worker.
    pub fn set_load(&self, id: &str, memory_used: u64, processing: usize) -> ClusterResult<()> {
        let mut inner = self.lock();
        let worker = inner
            .workers
            .get_mut(id)
            .ok_or_else(|| ClusterError::UnknownWorker(id.to_string()))?;
        worker.memory_used = memory_used;
        worker.processing = processing;
        Ok(())
    }

    /// Connect every requested worker that has not connected yet.
    pub fn arrive_all(&self) -> usize {
        let mut inner = self.lock();
        let pending: Vec<WorkerId> = inner
            .requested
            .iter()
            .filter(|id| !inner.workers.contains_key(*id))
            .cloned()
            .collect();
        for id in &pending {
            let mut stats = WorkerStats::new(id.clone(), 0, inner.memory_limit);
            stats.host = "127.0.0.1".to_string();
            stats.launch_batch = inner.batches.get(id).copied().unwrap_or_default();
            inner.workers.insert(id.clone(), stats);
        }
        pending.len()
    }

    /// Mark the cluster closed; the autoscaler stops acting on it.
    pub fn close(&self) {
        self.set_status(ClusterStatus::Closed);
    }

    pub fn set_status(&self, status: ClusterStatus) {
        self.lock().status = status;
    }

    /// Workers that were gracefully retired, in order.
    pub fn retired(&self) -> Vec<WorkerId> {
        self.lock().retired.clone()
    }
}

impl ClusterController for LocalCluster {
    fn status(&self) -> ClusterStatus {
        self.lock().status
    }

    fn plan(&self) -> BTreeSet<WorkerId> {
        self.lock().plan.clone()
    }

    fn requested(&self) -> BTreeSet<WorkerId> {
        self.lock().requested.clone()
    }

    fn observed(&self) -> BTreeSet<WorkerId> {
        self.lock().workers.keys().cloned().collect()
    }

    fn scale(&self, n: usize) -> BoxFuture<'_, ClusterResult<()>> {
        let mut inner = self.lock();
        if !inner.status.is_running() {
            return Box::pin(std::future::ready(Err(ClusterError::NotRunning)));
        }

        if n > inner.plan.len() {
            let batch = inner.next_batch;
            inner.next_batch += 1;
            while inner.plan.len() < n {
                let id = inner.new_worker_id();
                inner.batches.insert(id.clone(), batch);
                inner.plan.insert(id);
            }
        } else {
            // Drop workers that have not connected before connected ones.
            let mut surplus: Vec<WorkerId> = inner
                .plan
                .iter()
                .filter(|id| !inner.workers.contains_key(*id))
                .cloned()
                .collect();
            surplus.extend(
                inner
                    .plan
                    .iter()
                    .rev()
                    .filter(|id| inner.workers.contains_key(*id))
                    .cloned(),
            );
            let excess = inner.plan.len() - n;
            for id in surplus.into_iter().take(excess) {
                inner.plan.remove(&id);
            }
        }

        debug!(cluster = %inner.name, plan = inner.plan.len(), "plan scaled");
        Box::pin(std::future::ready(Ok(())))
    }

    fn scale_down<'a>(&'a self, workers: &'a [WorkerId]) -> BoxFuture<'a, ClusterResult<()>> {
        let mut inner = self.lock();
        for id in workers {
            inner.forget(id);
        }
        debug!(cluster = %inner.name, removed = workers.len(), "workers removed");
        Box::pin(std::future::ready(Ok(())))
    }

    fn reconcile(&self) -> BoxFuture<'_, ClusterResult<()>> {
        let mut inner = self.lock();
        let cancelled: Vec<WorkerId> = inner
            .requested
            .difference(&inner.plan)
            .cloned()
            .collect();
        for id in &cancelled {
            inner.requested.remove(id);
            inner.workers.remove(id);
            inner.batches.remove(id);
        }
        let launched: Vec<WorkerId> = inner
            .plan
            .difference(&inner.requested)
            .cloned()
            .collect();
        inner.requested.extend(launched.iter().cloned());
        debug!(
            cluster = %inner.name,
            launched = launched.len(),
            cancelled = cancelled.len(),
            "reconciled"
        );
        Box::pin(std::future::ready(Ok(())))
    }
}

impl SchedulerProxy for LocalCluster {
    fn adaptive_target(&self, target_duration: Duration) -> BoxFuture<'_, ClusterResult<usize>> {
        let inner = self.lock();
        let unblocked: Vec<&TaskSummary> =
            inner.tasks.iter().filter(|t| t.state.is_unblocked()).collect();

        let total_ms: u64 = unblocked
            .iter()
            .map(|t| t.expected_duration_ms.unwrap_or(UNKNOWN_TASK_DURATION_MS))
            .sum();
        let window_ms = target_duration.as_millis().max(1) as u64;
        let cpu = total_ms.div_ceil(window_ms) as usize;
        let cpu = cpu.min(unblocked.len());

        let workers: Vec<&WorkerStats> = inner.workers.values().collect();
        let memory = if under_memory_pressure(&workers) {
            2 * workers.len()
        } else {
            0
        };

        Box::pin(std::future::ready(Ok(cpu.max(memory))))
    }

    fn workers_to_close<'a>(
        &'a self,
        request: &'a CloseRequest,
    ) -> BoxFuture<'a, ClusterResult<Vec<WorkerId>>> {
        let inner = self.lock();
        let limit = inner.workers.len().saturating_sub(request.target);

        let mut groups: BTreeMap<String, Vec<&WorkerStats>> = BTreeMap::new();
        for worker in inner.workers.values() {
            let group = match &request.key {
                Some(key) => key.group_of(worker),
                None => worker.id.clone(),
            };
            groups.entry(group).or_default().push(worker);
        }

        // Only groups that are entirely idle can go, cheapest memory first.
        let mut idle: Vec<(u64, String, Vec<&WorkerStats>)> = groups
            .into_iter()
            .filter(|(_, members)| members.iter().all(|w| w.processing == 0))
            .map(|(group, members)| {
                let memory: u64 = members.iter().map(|w| w.memory_used).sum();
                (memory, group, members)
            })
            .collect();
        idle.sort_by(|a, b| a.0.cmp(&b.0).then_with(|| a.1.cmp(&b.1)));

        let mut to_close = Vec::new();
        for (_, _, members) in idle {
            if to_close.len() + members.len() > limit {
                continue;
            }
            to_close.extend(members.iter().map(|w| w.id.clone()));
        }

        Box::pin(std::future::ready(Ok(to_close)))
    }

    fn retire_workers<'a>(
        &'a self,
        request: &'a RetireRequest,
    ) -> BoxFuture<'a, ClusterResult<()>> {
        let mut inner = self.lock();
        for name in &request.names {
            if request.remove && inner.workers.remove(name).is_some() {
                inner.retired.push(name.clone());
            }
        }
        Box::pin(std::future::ready(Ok(())))
    }

    fn worker_stats(&self) -> BoxFuture<'_, ClusterResult<Vec<WorkerStats>>> {
        let stats = self.lock().workers.values().cloned().collect();
        Box::pin(std::future::ready(Ok(stats)))
    }

    fn tasks(&self) -> BoxFuture<'_, ClusterResult<Vec<TaskSummary>>> {
        let tasks = self.lock().tasks.clone();
        Box::pin(std::future::ready(Ok(tasks)))
    }
}

/// More than 60% of the summed memory limit is in use.
fn under_memory_pressure(workers: &[&WorkerStats]) -> bool {
    let limit: u128 = workers.iter().map(|w| w.memory_limit as u128).sum();
    let used: u128 = workers.iter().map(|w| w.memory_used as u128).sum();
    limit > 0 && used * 10 > limit * 6
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cluster_with(n: usize) -> LocalCluster {
        let cluster = LocalCluster::new("test", 100);
        for i in 0..n {
            cluster.add_worker(WorkerStats::new(format!("w{i}"), 0, 100));
        }
        cluster
    }

    #[tokio::test]
    async fn scale_up_then_reconcile_then_arrive() {
        let cluster = cluster_with(1);
        cluster.scale(3).await.unwrap();

        let state = cluster.state();
        assert_eq!(state.plan.len(), 3);
        assert_eq!(state.requested.len(), 1);
        assert!(!state.is_reconciled());

        cluster.reconcile().await.unwrap();
        let state = cluster.state();
        assert!(state.is_reconciled());
        assert_eq!(state.observed.len(), 1);

        assert_eq!(cluster.arrive_all(), 2);
        assert_eq!(cluster.observed().len(), 3);
    }

    #[tokio::test]
    async fn scale_down_in_plan_prefers_unarrived_workers() {
        let cluster = cluster_with(2);
        cluster.scale(4).await.unwrap();
        cluster.reconcile().await.unwrap();

        cluster.scale(2).await.unwrap();
        assert_eq!(
            cluster.plan(),
            ["w0", "w1"].iter().map(|s| s.to_string()).collect()
        );

        cluster.reconcile().await.unwrap();
        assert_eq!(cluster.requested().len(), 2);
    }

    #[tokio::test]
    async fn scale_on_closed_cluster_fails() {
        let cluster = cluster_with(1);
        cluster.close();
        assert!(!cluster.status().is_running());
        assert!(matches!(
            cluster.scale(2).await,
            Err(ClusterError::NotRunning)
        ));
    }

    #[tokio::test]
    async fn workers_to_close_skips_busy_and_respects_target() {
        let cluster = cluster_with(4);
        cluster.set_load("w0", 50, 1).unwrap();
        cluster.set_load("w1", 30, 0).unwrap();
        cluster.set_load("w2", 10, 0).unwrap();
        cluster.set_load("w3", 20, 0).unwrap();

        let to_close = cluster
            .workers_to_close(&CloseRequest::new(2))
            .await
            .unwrap();
        assert_eq!(to_close, vec!["w2".to_string(), "w3".to_string()]);
    }

    #[tokio::test]
    async fn workers_to_close_keeps_groups_together() {
        let cluster = LocalCluster::new("test", 100);
        for (id, host) in [("a1", "h1"), ("a2", "h1"), ("b1", "h2"), ("c1", "h3")] {
            let mut stats = WorkerStats::new(id, 0, 100);
            stats.host = host.to_string();
            cluster.add_worker(stats);
        }

        let mut request = CloseRequest::new(2);
        request.key = Some(WorkerKey::Host);
        let to_close = cluster.workers_to_close(&request).await.unwrap();
        assert_eq!(to_close, vec!["a1".to_string(), "a2".to_string()]);
    }

    #[tokio::test]
    async fn retire_removes_from_observed_only() {
        let cluster = cluster_with(2);
        cluster
            .retire_workers(&RetireRequest::close(vec!["w0".to_string()]))
            .await
            .unwrap();

        assert_eq!(cluster.retired(), vec!["w0".to_string()]);
        assert_eq!(cluster.observed().len(), 1);
        assert_eq!(cluster.plan().len(), 2);

        cluster.scale_down(&["w0".to_string()]).await.unwrap();
        assert_eq!(cluster.plan().len(), 1);
    }

    #[tokio::test]
    async fn adaptive_target_from_durations() {
        let cluster = cluster_with(1);
        let mut tasks = Vec::new();
        for i in 0..10 {
            let mut task = TaskSummary::new(format!("t{i}"), TaskState::Processing);
            task.expected_duration_ms = Some(1_000);
            tasks.push(task);
        }
        cluster.set_tasks(tasks);

        // 10s of work in a 2s window needs 5 workers.
        let target = cluster
            .adaptive_target(Duration::from_secs(2))
            .await
            .unwrap();
        assert_eq!(target, 5);
    }

    #[tokio::test]
    async fn adaptive_target_memory_pressure() {
        let cluster = cluster_with(3);
        for id in ["w0", "w1", "w2"] {
            cluster.set_load(id, 70, 0).unwrap();
        }
        let target = cluster
            .adaptive_target(Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(target, 6);
    }
}
