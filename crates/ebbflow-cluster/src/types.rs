//! Domain types shared between the autoscaler and its collaborators.
//!
//! Everything here is a plain value: snapshots are read fresh each tick and
//! requests are serializable so they can cross an RPC boundary unchanged.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Unique identifier (name) of a worker in the cluster.
pub type WorkerId = String;

// ── Cluster ───────────────────────────────────────────────────────

/// Lifecycle state of a managed cluster.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum ClusterStatus {
    #[default]
    Created,
    Running,
    Closing,
    Closed,
}

impl ClusterStatus {
    /// Whether the autoscaler may act on the cluster.
    pub fn is_running(self) -> bool {
        matches!(self, ClusterStatus::Created | ClusterStatus::Running)
    }
}

// ── Workers ───────────────────────────────────────────────────────

/// Read-only statistics for a single worker, as reported by the scheduler.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct WorkerStats {
    pub id: WorkerId,
    /// Host the worker process runs on.
    #[serde(default)]
    pub host: String,
    /// Provisioning batch the worker was launched in.
    #[serde(default)]
    pub launch_batch: u64,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    /// Bytes currently held in worker memory.
    pub memory_used: u64,
    /// Configured memory limit in bytes (0 = unlimited/unknown).
    pub memory_limit: u64,
    /// Number of tasks currently processing on this worker.
    #[serde(default)]
    pub processing: usize,
}

impl WorkerStats {
    pub fn new(id: impl Into<WorkerId>, memory_used: u64, memory_limit: u64) -> Self {
        Self {
            id: id.into(),
            host: String::new(),
            launch_batch: 0,
            labels: BTreeMap::new(),
            memory_used,
            memory_limit,
            processing: 0,
        }
    }
}

/// Declarative grouping of workers that must be retired together.
///
/// Evaluated on the scheduler side; only the name of the strategy crosses
/// the wire, never code.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum WorkerKey {
    /// All workers on the same host.
    Host,
    /// All workers started by the same provisioning request.
    LaunchBatch,
    /// Workers sharing the value of the named label.
    Label(String),
}

impl WorkerKey {
    /// Group identifier of `worker` under this key.
    pub fn group_of(&self, worker: &WorkerStats) -> String {
        match self {
            WorkerKey::Host => worker.host.clone(),
            WorkerKey::LaunchBatch => worker.launch_batch.to_string(),
            WorkerKey::Label(name) => worker.labels.get(name).cloned().unwrap_or_default(),
        }
    }
}

// ── Tasks ─────────────────────────────────────────────────────────

/// Scheduler-side state of a task.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "kebab-case")]
pub enum TaskState {
    Released,
    Waiting,
    NoWorker,
    Queued,
    Processing,
    Memory,
    Erred,
    Forgotten,
}

impl TaskState {
    /// Tasks that are runnable now or about to be: they count as backlog.
    pub fn is_unblocked(self) -> bool {
        matches!(
            self,
            TaskState::NoWorker | TaskState::Waiting | TaskState::Processing
        )
    }
}

/// Read-only summary of one task in the graph.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TaskSummary {
    pub key: String,
    pub state: TaskState,
    /// Keys of tasks that depend on this one.
    #[serde(default)]
    pub dependents: Vec<String>,
    /// Expected runtime, if the scheduler has an estimate.
    #[serde(default)]
    pub expected_duration_ms: Option<u64>,
}

impl TaskSummary {
    pub fn new(key: impl Into<String>, state: TaskState) -> Self {
        Self {
            key: key.into(),
            state,
            dependents: Vec::new(),
            expected_duration_ms: None,
        }
    }

    pub fn with_dependents<I, S>(mut self, dependents: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.dependents = dependents.into_iter().map(Into::into).collect();
        self
    }
}

// ── Requests ──────────────────────────────────────────────────────

/// Parameters for asking the scheduler which workers could be closed.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CloseRequest {
    /// Number of workers the cluster should shrink to.
    pub target: usize,
    pub key: Option<WorkerKey>,
    /// Worker attribute to report candidates by.
    pub attribute: String,
    /// Extra parameters forwarded verbatim.
    #[serde(default)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

impl CloseRequest {
    pub fn new(target: usize) -> Self {
        Self {
            target,
            key: None,
            attribute: "name".to_string(),
            extra: BTreeMap::new(),
        }
    }
}

/// Parameters for a graceful retirement of named workers.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RetireRequest {
    pub names: Vec<WorkerId>,
    /// Remove the workers from the scheduler once drained.
    pub remove: bool,
    /// Ask the workers to shut down once drained.
    pub close_workers: bool,
}

impl RetireRequest {
    pub fn close(names: Vec<WorkerId>) -> Self {
        Self {
            names,
            remove: true,
            close_workers: true,
        }
    }
}
