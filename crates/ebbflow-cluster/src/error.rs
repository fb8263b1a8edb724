//! Error types for cluster collaborators.

use thiserror::Error;

/// Result type alias for controller and scheduler operations.
pub type ClusterResult<T> = Result<T, ClusterError>;

/// Errors surfaced by a cluster controller or scheduler proxy.
#[derive(Debug, Error)]
pub enum ClusterError {
    #[error("rpc failed: {0}")]
    Rpc(String),

    #[error("connection lost: {0}")]
    Connection(String),

    #[error("cluster is not running")]
    NotRunning,

    #[error("unknown worker: {0}")]
    UnknownWorker(String),
}
