//! Scale executor — carries out recommendations against the cluster.

use std::collections::BTreeSet;
use std::sync::Arc;

use ebbflow_cluster::{ClusterController, RetireRequest, SchedulerProxy, WorkerId};
use tracing::{error, info};

use crate::error::{AutoscaleError, AutoscaleResult};

pub struct ScaleExecutor {
    cluster: Arc<dyn ClusterController>,
    scheduler: Arc<dyn SchedulerProxy>,
}

impl ScaleExecutor {
    pub fn new(cluster: Arc<dyn ClusterController>, scheduler: Arc<dyn SchedulerProxy>) -> Self {
        Self { cluster, scheduler }
    }

    /// Ask the cluster to grow its plan to `n` workers.
    pub async fn scale_up(&self, n: usize) -> AutoscaleResult<()> {
        info!(n, "scaling up");
        self.cluster
            .scale(n)
            .await
            .map_err(|source| AutoscaleError::ScaleUp { n, source })
    }

    /// Retire `workers`: gracefully through the scheduler, then forcefully
    /// through the cluster.
    ///
    /// Failures are logged and swallowed so the next tick still runs.
    pub async fn scale_down(&self, workers: &BTreeSet<WorkerId>) {
        if workers.is_empty() {
            return;
        }

        let names: Vec<WorkerId> = workers.iter().cloned().collect();
        info!(workers = ?names, "retiring workers");

        let request = RetireRequest::close(names.clone());
        if let Err(e) = self.scheduler.retire_workers(&request).await {
            error!(workers = ?names, error = %e, "graceful retirement failed");
        }

        // Retirement may leave the process behind; remove it at the cluster level too.
        if let Err(e) = self.cluster.scale_down(&names).await {
            error!(workers = ?names, error = %e, "forced removal failed");
        }
    }
}
