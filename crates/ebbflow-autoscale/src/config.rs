//! Adaptive scaling configuration.
//!
//! `AdaptiveConfig` is the serde-facing shape (the `[adaptive]` table of a
//! TOML file, all fields optional). `AdaptivePolicy` is the validated,
//! immutable form the control loop runs with.

use std::collections::BTreeMap;
use std::time::Duration;

use ebbflow_cluster::WorkerKey;
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// How the target worker count is estimated, and how removal candidates
/// are sourced.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    /// Ask the scheduler how many workers drain the queue in `target_duration`.
    #[default]
    Duration,
    /// Derive the target from the task backlog and memory pressure.
    Queue,
}

impl Strategy {
    pub fn as_str(self) -> &'static str {
        match self {
            Strategy::Duration => "duration",
            Strategy::Queue => "queue",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AdaptiveConfig {
    /// Time between ticks (e.g. "1s", "1000 ms").
    pub interval: String,
    pub minimum: usize,
    /// Upper bound on the plan size; unbounded when absent.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub maximum: Option<usize>,
    /// Consecutive removal suggestions before a worker is closed.
    pub wait_count: u32,
    /// Desired time to drain the queue (duration strategy only).
    pub target_duration: String,
    /// How long to wait for plan and requested workers to converge.
    pub reconcile_timeout: String,
    pub strategy: Strategy,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub worker_key: Option<WorkerKey>,
    /// Forwarded verbatim to the scheduler's close-candidate query.
    pub close_options: BTreeMap<String, serde_json::Value>,
}

impl Default for AdaptiveConfig {
    fn default() -> Self {
        Self {
            interval: "1s".to_string(),
            minimum: 0,
            maximum: None,
            wait_count: 3,
            target_duration: "5s".to_string(),
            reconcile_timeout: "30s".to_string(),
            strategy: Strategy::Duration,
            worker_key: None,
            close_options: BTreeMap::new(),
        }
    }
}

impl AdaptiveConfig {
    /// Validate and convert into an immutable policy.
    pub fn into_policy(self) -> Result<AdaptivePolicy, ConfigError> {
        let interval = parse_duration(&self.interval)?;
        if interval.is_zero() {
            return Err(ConfigError::ZeroInterval);
        }
        if self.wait_count == 0 {
            return Err(ConfigError::WaitCount);
        }
        let maximum = self.maximum.unwrap_or(usize::MAX);
        if self.minimum > maximum {
            return Err(ConfigError::Bounds {
                minimum: self.minimum,
                maximum,
            });
        }

        Ok(AdaptivePolicy {
            interval,
            minimum: self.minimum,
            maximum,
            wait_count: self.wait_count,
            target_duration: parse_duration(&self.target_duration)?,
            reconcile_timeout: parse_duration(&self.reconcile_timeout)?,
            strategy: self.strategy,
            worker_key: self.worker_key,
            close_options: self.close_options,
        })
    }
}

/// Validated adaptive scaling parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct AdaptivePolicy {
    pub interval: Duration,
    pub minimum: usize,
    pub maximum: usize,
    pub wait_count: u32,
    pub target_duration: Duration,
    pub reconcile_timeout: Duration,
    pub strategy: Strategy,
    pub worker_key: Option<WorkerKey>,
    pub close_options: BTreeMap<String, serde_json::Value>,
}

impl AdaptivePolicy {
    /// Bound a raw target to `[minimum, maximum]`.
    pub fn clamp(&self, target: usize) -> usize {
        target.clamp(self.minimum, self.maximum)
    }
}

impl Default for AdaptivePolicy {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(1),
            minimum: 0,
            maximum: usize::MAX,
            wait_count: 3,
            target_duration: Duration::from_secs(5),
            reconcile_timeout: Duration::from_secs(30),
            strategy: Strategy::Duration,
            worker_key: None,
            close_options: BTreeMap::new(),
        }
    }
}

/// Parse a duration string like "500ms", "1000 ms", "1.5s", "5m", "1h".
///
/// A bare number is taken as seconds.
pub fn parse_duration(s: &str) -> Result<Duration, ConfigError> {
    let invalid = || ConfigError::InvalidDuration(s.to_string());

    let s = s.trim();
    let split = s
        .find(|c: char| !(c.is_ascii_digit() || c == '.'))
        .unwrap_or(s.len());
    let (number, unit) = s.split_at(split);
    let value: f64 = number.parse().map_err(|_| invalid())?;

    let secs = match unit.trim() {
        "ms" => value / 1000.0,
        "" | "s" => value,
        "m" => value * 60.0,
        "h" => value * 3600.0,
        _ => return Err(invalid()),
    };

    Duration::try_from_secs_f64(secs).map_err(|_| invalid())
}
