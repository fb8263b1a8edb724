//! Autoscaler error types.

use std::time::Duration;

use ebbflow_cluster::ClusterError;
use thiserror::Error;

/// Errors raised while validating adaptive configuration.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid duration: {0:?}")]
    InvalidDuration(String),

    #[error("minimum ({minimum}) is greater than maximum ({maximum})")]
    Bounds { minimum: usize, maximum: usize },

    #[error("wait_count must be at least 1")]
    WaitCount,

    #[error("interval must be greater than zero")]
    ZeroInterval,
}

/// Errors that abort a single adaptive tick.
///
/// None of these are fatal: the control loop logs them and tries again on
/// the next tick.
#[derive(Debug, Error)]
pub enum AutoscaleError {
    #[error("target estimation failed: {0}")]
    Estimate(#[source] ClusterError),

    #[error("reconciliation failed: {0}")]
    Reconcile(#[source] ClusterError),

    #[error("reconciliation did not finish within {0:?}")]
    ReconcileTimeout(Duration),

    #[error("querying close candidates failed: {0}")]
    Candidates(#[source] ClusterError),

    #[error("scale up to {n} workers failed: {source}")]
    ScaleUp {
        n: usize,
        #[source]
        source: ClusterError,
    },

    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),
}

pub type AutoscaleResult<T> = Result<T, AutoscaleError>;
