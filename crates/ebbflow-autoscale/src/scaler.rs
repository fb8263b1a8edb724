//! Adaptive control loop.
//!
//! Every `interval` the loop estimates a target worker count, clamps it to
//! the policy bounds, waits for the cluster's plan and requested workers to
//! converge, asks the recommendation engine what to do, and applies it.
//! A failing tick is logged and the next tick starts from scratch.
//!
//! Ticks never overlap: a slow tick pushes the next one back. All mutable
//! state (close counter, history) is owned by the loop itself.

use std::collections::BTreeSet;
use std::sync::Arc;

use ebbflow_cluster::{ClusterController, SchedulerProxy, WorkerId};
use tokio::sync::watch;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::config::{AdaptiveConfig, AdaptivePolicy, Strategy};
use crate::error::{AutoscaleError, AutoscaleResult};
use crate::estimator::{DurationEstimator, QueueEstimator, TargetEstimator};
use crate::executor::ScaleExecutor;
use crate::history::ScaleHistory;
use crate::recommend::{CloseCounter, Recommendation, RecommendationEngine};

/// What a single tick did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TickOutcome {
    /// The cluster is not running; nothing was evaluated.
    Skipped,
    NoOp,
    ScaledUp(usize),
    ScaledDown(BTreeSet<WorkerId>),
}

/// Adaptive autoscaler for one cluster.
pub struct Adaptive {
    policy: AdaptivePolicy,
    cluster: Arc<dyn ClusterController>,
    estimator: Box<dyn TargetEstimator>,
    engine: RecommendationEngine,
    executor: ScaleExecutor,
    history: ScaleHistory,
}

impl Adaptive {
    /// Create an autoscaler whose estimator and candidate source follow
    /// `policy.strategy`.
    pub fn new(
        policy: AdaptivePolicy,
        cluster: Arc<dyn ClusterController>,
        scheduler: Arc<dyn SchedulerProxy>,
    ) -> Self {
        let estimator: Box<dyn TargetEstimator> = match policy.strategy {
            Strategy::Duration => Box::new(DurationEstimator::new(
                scheduler.clone(),
                policy.target_duration,
            )),
            Strategy::Queue => Box::new(QueueEstimator::new(cluster.clone(), scheduler.clone())),
        };
        let engine = RecommendationEngine::new(scheduler.clone(), &policy);
        let executor = ScaleExecutor::new(cluster.clone(), scheduler);

        info!(
            minimum = policy.minimum,
            maximum = policy.maximum,
            strategy = policy.strategy.as_str(),
            "adaptive scaling started"
        );

        Self {
            policy,
            cluster,
            estimator,
            engine,
            executor,
            history: ScaleHistory::default(),
        }
    }

    /// Validate `config` and build an autoscaler from it.
    pub fn from_config(
        config: AdaptiveConfig,
        cluster: Arc<dyn ClusterController>,
        scheduler: Arc<dyn SchedulerProxy>,
    ) -> AutoscaleResult<Self> {
        let policy = config.into_policy()?;
        Ok(Self::new(policy, cluster, scheduler))
    }

    /// Replace the target estimator.
    pub fn with_estimator(mut self, estimator: Box<dyn TargetEstimator>) -> Self {
        self.estimator = estimator;
        self
    }

    pub fn policy(&self) -> &AdaptivePolicy {
        &self.policy
    }

    pub fn history(&self) -> &ScaleHistory {
        &self.history
    }

    pub fn close_counts(&self) -> &CloseCounter {
        self.engine.counter()
    }

    /// Estimated target, clamped to `[minimum, maximum]`.
    pub async fn safe_target(&self) -> AutoscaleResult<usize> {
        let raw = self.estimator.target().await?;
        let target = self.policy.clamp(raw);
        debug!(
            estimator = self.estimator.name(),
            raw,
            desired = target,
            "target number of workers"
        );
        Ok(target)
    }

    /// Run one tick.
    pub async fn adapt(&mut self) -> AutoscaleResult<TickOutcome> {
        let status = self.cluster.status();
        if !status.is_running() {
            warn!(?status, "cluster not running, skipping tick");
            return Ok(TickOutcome::Skipped);
        }

        let target = self.safe_target().await?;

        let mut state = self.cluster.state();
        if !state.is_reconciled() {
            debug!(
                plan = state.plan.len(),
                requested = state.requested.len(),
                "waiting for cluster to reconcile"
            );
            let timeout = self.policy.reconcile_timeout;
            tokio::time::timeout(timeout, self.cluster.reconcile())
                .await
                .map_err(|_| AutoscaleError::ReconcileTimeout(timeout))?
                .map_err(AutoscaleError::Reconcile)?;
            state = self.cluster.state();
        }

        let recommendation = self.engine.recommend(target, &state).await?;
        if recommendation != Recommendation::Same {
            self.history.record(recommendation.clone());
        }

        match recommendation {
            Recommendation::Same => Ok(TickOutcome::NoOp),
            Recommendation::ScaleUp { n } => {
                self.executor.scale_up(n).await?;
                Ok(TickOutcome::ScaledUp(n))
            }
            Recommendation::ScaleDown { workers } => {
                self.executor.scale_down(&workers).await;
                Ok(TickOutcome::ScaledDown(workers))
            }
        }
    }

    /// Tick every `interval` until `shutdown` flips to `true`.
    ///
    /// A tick that is already running when shutdown arrives finishes first.
    pub async fn run(&mut self, mut shutdown: watch::Receiver<bool>) {
        let interval = self.policy.interval;
        info!(interval_ms = interval.as_millis() as u64, "autoscaler loop started");

        let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            if *shutdown.borrow() {
                break;
            }
            tokio::select! {
                _ = ticker.tick() => {
                    match self.adapt().await {
                        Ok(outcome) => debug!(?outcome, "adaptive tick finished"),
                        Err(e @ AutoscaleError::ReconcileTimeout(_)) => {
                            warn!(error = %e, "skipping tick");
                        }
                        Err(e) => error!(error = %e, "adaptive tick failed"),
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        info!("autoscaler shutting down");
    }
}
