//! Recommendation engine — turns a target into a scaling recommendation.
//!
//! Growth is applied immediately. Shrinking is debounced: a worker is only
//! closed once it has been proposed for removal on `wait_count` consecutive
//! ticks. Missing a single tick resets its count.
//!
//! ```text
//! target == plan   clear counts          → Same
//! target >  plan   clear counts          → ScaleUp(target)
//! target <  plan   count candidates
//!                  drop non-candidates
//!                  any count ≥ wait?     → ScaleDown(those) | Same
//! ```

use std::cmp::Ordering;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use ebbflow_cluster::{ClusterState, CloseRequest, SchedulerProxy, WorkerId};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::{AdaptivePolicy, Strategy};
use crate::error::{AutoscaleError, AutoscaleResult};

/// The outcome of a recommendation step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Recommendation {
    Same,
    #[serde(rename = "up")]
    ScaleUp { n: usize },
    #[serde(rename = "down")]
    ScaleDown { workers: BTreeSet<WorkerId> },
}

/// Consecutive removal suggestions per worker.
#[derive(Debug, Clone, Default)]
pub struct CloseCounter {
    counts: HashMap<WorkerId, u32>,
    wait_count: u32,
}

impl CloseCounter {
    pub fn new(wait_count: u32) -> Self {
        Self {
            counts: HashMap::new(),
            wait_count,
        }
    }

    /// Current count for `worker` (0 when untracked).
    pub fn get(&self, worker: &str) -> u32 {
        self.counts.get(worker).copied().unwrap_or(0)
    }

    pub fn len(&self) -> usize {
        self.counts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.counts.is_empty()
    }

    pub fn clear(&mut self) {
        self.counts.clear();
    }

    /// Count one more suggestion for each candidate and return those that
    /// reached `wait_count`.
    ///
    /// Workers that are not candidates this time are forgotten, as are the
    /// ones returned.
    pub fn observe(&mut self, candidates: &BTreeSet<WorkerId>) -> BTreeSet<WorkerId> {
        let mut firmly_close = BTreeSet::new();
        for worker in candidates {
            let count = self.counts.entry(worker.clone()).or_insert(0);
            *count += 1;
            if *count >= self.wait_count {
                firmly_close.insert(worker.clone());
            }
        }

        self.counts
            .retain(|worker, _| candidates.contains(worker) && !firmly_close.contains(worker));
        firmly_close
    }
}

/// Where removal candidates come from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CandidateSource {
    /// Requested workers that have not arrived go first; the scheduler is
    /// only asked for more if that is not enough.
    PendingFirst,
    /// The scheduler's suggestion, queried once per tick.
    Scheduler,
}

impl From<Strategy> for CandidateSource {
    fn from(strategy: Strategy) -> Self {
        match strategy {
            Strategy::Duration => CandidateSource::PendingFirst,
            Strategy::Queue => CandidateSource::Scheduler,
        }
    }
}

/// Hysteresis state machine over the close counter.
pub struct RecommendationEngine {
    scheduler: Arc<dyn SchedulerProxy>,
    source: CandidateSource,
    /// Template for close-candidate queries; `target` is filled per tick.
    close_request: CloseRequest,
    counter: CloseCounter,
}

impl RecommendationEngine {
    pub fn new(scheduler: Arc<dyn SchedulerProxy>, policy: &AdaptivePolicy) -> Self {
        let mut close_request = CloseRequest::new(0);
        close_request.key = policy.worker_key.clone();
        close_request.extra = policy.close_options.clone();

        Self {
            scheduler,
            source: policy.strategy.into(),
            close_request,
            counter: CloseCounter::new(policy.wait_count),
        }
    }

    /// Override how removal candidates are sourced.
    pub fn with_source(mut self, source: CandidateSource) -> Self {
        self.source = source;
        self
    }

    pub fn source(&self) -> CandidateSource {
        self.source
    }

    pub fn counter(&self) -> &CloseCounter {
        &self.counter
    }

    /// Recommend an action for `target` given the current cluster state.
    ///
    /// The caller is responsible for `state` being reconciled.
    pub async fn recommend(
        &mut self,
        target: usize,
        state: &ClusterState,
    ) -> AutoscaleResult<Recommendation> {
        let plan = state.plan.len();

        match target.cmp(&plan) {
            Ordering::Equal => {
                self.counter.clear();
                Ok(Recommendation::Same)
            }
            Ordering::Greater => {
                self.counter.clear();
                Ok(Recommendation::ScaleUp { n: target })
            }
            Ordering::Less => {
                let candidates = self.candidates(target, state).await?;
                let firmly_close = self.counter.observe(&candidates);
                debug!(
                    candidates = candidates.len(),
                    tracked = self.counter.len(),
                    closing = firmly_close.len(),
                    "removal hysteresis"
                );

                if firmly_close.is_empty() {
                    Ok(Recommendation::Same)
                } else {
                    Ok(Recommendation::ScaleDown {
                        workers: firmly_close,
                    })
                }
            }
        }
    }

    async fn candidates(
        &self,
        target: usize,
        state: &ClusterState,
    ) -> AutoscaleResult<BTreeSet<WorkerId>> {
        let plan = state.plan.len();
        let mut to_close = BTreeSet::new();

        if self.source == CandidateSource::PendingFirst {
            to_close.extend(state.not_yet_arrived().take(plan - target).cloned());
            if target >= plan - to_close.len() {
                return Ok(to_close);
            }
        }

        let mut request = self.close_request.clone();
        request.target = target;
        let suggested = self
            .scheduler
            .workers_to_close(&request)
            .await
            .map_err(AutoscaleError::Candidates)?;
        to_close.extend(suggested);
        Ok(to_close)
    }
}
