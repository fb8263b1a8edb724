//! Scenario files for driving the autoscaler against a `LocalCluster`.
//!
//! ```toml
//! [adaptive]
//! strategy = "queue"
//! maximum = 20
//!
//! [scenario]
//! workers = 2
//!
//! [[scenario.phases]]
//! ticks = 5
//! tasks = 12
//! dependents = 3
//! ```

use std::path::Path;
use std::sync::Arc;

use ebbflow_autoscale::{Adaptive, AdaptiveConfig, ScaleHistory, TickOutcome};
use ebbflow_cluster::{
    ClusterController, ClusterState, LocalCluster, TaskState, TaskSummary, WorkerStats,
};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DaemonConfig {
    #[serde(default)]
    pub adaptive: AdaptiveConfig,
    #[serde(default)]
    pub scenario: Scenario,
}

impl DaemonConfig {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Ok(toml::from_str(&content)?)
    }

    pub fn to_toml_string(&self) -> anyhow::Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Build the scenario's cluster and an autoscaler bound to it.
    pub fn build(self) -> anyhow::Result<(Adaptive, LocalCluster, Scenario)> {
        let cluster = self.scenario.build_cluster();
        let shared = Arc::new(cluster.clone());
        let adaptive = Adaptive::from_config(self.adaptive, shared.clone(), shared)?;
        Ok((adaptive, cluster, self.scenario))
    }
}

/// Outcome of a simulated run.
#[derive(Debug)]
pub struct SimulationReport {
    pub history: ScaleHistory,
    /// Cluster worker sets after the last tick.
    pub state: ClusterState,
    pub retired: usize,
}

/// Step the autoscaler through `ticks` ticks of the scenario (all of it by
/// default). Requested workers come online between ticks.
pub async fn simulate(
    config: DaemonConfig,
    ticks: Option<u32>,
) -> anyhow::Result<SimulationReport> {
    let (mut adaptive, cluster, scenario) = config.build()?;
    let ticks = ticks.unwrap_or_else(|| scenario.total_ticks());
    info!(scenario = %scenario.name, ticks, "simulation starting");

    for tick in 0..ticks {
        if let Some(phase) = scenario.phase_at(tick) {
            phase.apply(&cluster, scenario.memory_limit)?;
        }

        match adaptive.adapt().await {
            Ok(TickOutcome::NoOp) | Ok(TickOutcome::Skipped) => {}
            Ok(outcome) => info!(tick, ?outcome, "scaling action"),
            Err(e) => warn!(tick, error = %e, "tick failed"),
        }

        cluster.reconcile().await?;
        cluster.arrive_all();
    }

    Ok(SimulationReport {
        history: adaptive.history().clone(),
        state: cluster.state(),
        retired: cluster.retired().len(),
    })
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Scenario {
    pub name: String,
    /// Workers running before the first tick.
    pub workers: usize,
    /// Memory limit of every worker, in bytes.
    pub memory_limit: u64,
    pub phases: Vec<Phase>,
}

impl Default for Scenario {
    fn default() -> Self {
        Self {
            name: "local".to_string(),
            workers: 1,
            memory_limit: 4 * 1024 * 1024 * 1024,
            phases: vec![Phase::default()],
        }
    }
}

/// A stretch of ticks with constant load.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Phase {
    pub ticks: u32,
    /// Unblocked (processing) tasks.
    pub tasks: usize,
    /// Dependents of each task.
    pub dependents: usize,
    /// Expected duration of each task.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub task_ms: Option<u64>,
    /// Fraction of its memory limit every worker is using.
    pub memory_fraction: f64,
}

impl Default for Phase {
    fn default() -> Self {
        Self {
            ticks: 10,
            tasks: 0,
            dependents: 0,
            task_ms: None,
            memory_fraction: 0.0,
        }
    }
}

impl Scenario {
    /// Create a cluster with the initial workers.
    pub fn build_cluster(&self) -> LocalCluster {
        let cluster = LocalCluster::new(&self.name, self.memory_limit);
        for i in 0..self.workers {
            let id = format!("{}-seed-{i}", self.name);
            let mut stats = WorkerStats::new(id, 0, self.memory_limit);
            stats.host = "127.0.0.1".to_string();
            cluster.add_worker(stats);
        }
        cluster
    }

    /// Phase active at `tick` (0-based); the last phase repeats.
    pub fn phase_at(&self, tick: u32) -> Option<&Phase> {
        let mut start = 0;
        for phase in &self.phases {
            if tick < start + phase.ticks {
                return Some(phase);
            }
            start += phase.ticks;
        }
        self.phases.last()
    }

    /// Total ticks across all phases.
    pub fn total_ticks(&self) -> u32 {
        self.phases.iter().map(|p| p.ticks).sum()
    }
}

impl Phase {
    /// Load the phase's tasks and memory usage into `cluster`, whose workers
    /// each have `memory_limit` bytes.
    pub fn apply(&self, cluster: &LocalCluster, memory_limit: u64) -> anyhow::Result<()> {
        let tasks = (0..self.tasks)
            .map(|i| {
                let mut task = TaskSummary::new(format!("task-{i}"), TaskState::Processing)
                    .with_dependents((0..self.dependents).map(|d| format!("task-{i}-dep-{d}")));
                task.expected_duration_ms = self.task_ms;
                task
            })
            .collect();
        cluster.set_tasks(tasks);

        // Spread processing tasks round-robin over connected workers.
        let observed: Vec<_> = cluster.observed().into_iter().collect();
        let used = (memory_limit as f64 * self.memory_fraction) as u64;
        for (i, id) in observed.iter().enumerate() {
            let processing =
                self.tasks / observed.len() + usize::from(i < self.tasks % observed.len());
            cluster.set_load(id, used, processing)?;
        }
        Ok(())
    }
}
