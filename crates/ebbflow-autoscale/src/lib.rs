//! ebbflow-autoscale — adaptive worker autoscaling.
//!
//! Periodically estimates how many workers a cluster should have, turns the
//! estimate into scale-up/scale-down actions, and debounces removals so a
//! short dip in load does not churn workers.
//!
//! # Tick
//!
//! ```text
//! cluster running?            no  → skip
//! target = clamp(estimate, minimum, maximum)
//! len(plan) != len(requested) → await reconcile (bounded)
//! recommend(target)
//!   Same              → nothing
//!   ScaleUp(n)        → cluster.scale(n)
//!   ScaleDown(ws)     → scheduler.retire_workers(ws), cluster.scale_down(ws)
//! ```
//!
//! # Strategies
//!
//! | strategy   | target                                   | removal candidates          |
//! |------------|------------------------------------------|-----------------------------|
//! | `duration` | scheduler `adaptive_target(duration)`    | pending workers, then scheduler |
//! | `queue`    | unblocked tasks, look-ahead, memory      | scheduler only              |
//!
//! A worker is only removed after being a candidate on `wait_count`
//! consecutive ticks.

pub mod config;
pub mod error;
pub mod estimator;
pub mod executor;
pub mod history;
pub mod recommend;
pub mod scaler;

pub use config::{AdaptiveConfig, AdaptivePolicy, Strategy, parse_duration};
pub use error::{AutoscaleError, AutoscaleResult, ConfigError};
pub use estimator::{DurationEstimator, QueueEstimator, TargetEstimator};
pub use executor::ScaleExecutor;
pub use history::{ScaleEvent, ScaleHistory};
pub use recommend::{CandidateSource, CloseCounter, Recommendation, RecommendationEngine};
pub use scaler::{Adaptive, TickOutcome};
