//! End-to-end ticks against an in-memory cluster.
//!
//! Drives `Adaptive::adapt()` directly, simulating worker arrival between
//! ticks, and checks plan/requested/observed through every stage.

use std::sync::Arc;

use ebbflow_autoscale::*;
use ebbflow_cluster::*;

fn cluster(workers: usize) -> LocalCluster {
    let cluster = LocalCluster::new("it", 1_000);
    for i in 0..workers {
        let mut stats = WorkerStats::new(format!("w{i}"), 0, 1_000);
        stats.host = format!("host-{}", i / 2);
        cluster.add_worker(stats);
    }
    cluster
}

fn processing(n: usize) -> Vec<TaskSummary> {
    (0..n)
        .map(|i| TaskSummary::new(format!("t{i}"), TaskState::Processing))
        .collect()
}

fn autoscaler(cluster: &LocalCluster, policy: AdaptivePolicy) -> Adaptive {
    let shared = Arc::new(cluster.clone());
    Adaptive::new(policy, shared.clone(), shared)
}

#[tokio::test]
async fn queue_strategy_grows_with_backlog() {
    let cluster = cluster(1);
    cluster.set_tasks(processing(3));
    let policy = AdaptivePolicy {
        strategy: Strategy::Queue,
        maximum: 10,
        ..Default::default()
    };
    let mut scaler = autoscaler(&cluster, policy);

    assert_eq!(scaler.adapt().await.unwrap(), TickOutcome::ScaledUp(3));
    let state = cluster.state();
    assert_eq!(state.plan.len(), 3);
    assert_eq!(state.requested.len(), 1);

    // Next tick reconciles first; the target is already met.
    assert_eq!(scaler.adapt().await.unwrap(), TickOutcome::NoOp);
    assert!(cluster.state().is_reconciled());

    cluster.arrive_all();
    assert_eq!(cluster.observed().len(), 3);
}

#[tokio::test]
async fn queue_strategy_respects_maximum() {
    let cluster = cluster(1);
    cluster.set_tasks(processing(50));
    let policy = AdaptivePolicy {
        strategy: Strategy::Queue,
        maximum: 6,
        ..Default::default()
    };
    let mut scaler = autoscaler(&cluster, policy);

    assert_eq!(scaler.adapt().await.unwrap(), TickOutcome::ScaledUp(6));
}

#[tokio::test]
async fn queue_strategy_shrinks_after_wait_count() {
    let cluster = cluster(4);
    let policy = AdaptivePolicy {
        strategy: Strategy::Queue,
        minimum: 1,
        wait_count: 2,
        ..Default::default()
    };
    let mut scaler = autoscaler(&cluster, policy);

    // No work at all: target clamps to the minimum of one worker.
    assert_eq!(scaler.adapt().await.unwrap(), TickOutcome::NoOp);
    let outcome = scaler.adapt().await.unwrap();
    let closed = match outcome {
        TickOutcome::ScaledDown(closed) => closed,
        other => panic!("expected scale down, got {other:?}"),
    };
    assert_eq!(closed.len(), 3);
    assert_eq!(cluster.plan().len(), 1);
    assert_eq!(cluster.retired().len(), 3);
    assert_eq!(scaler.history().len(), 1);
}

#[tokio::test]
async fn load_returning_resets_debounce() {
    let cluster = cluster(3);
    let policy = AdaptivePolicy {
        strategy: Strategy::Queue,
        wait_count: 2,
        ..Default::default()
    };
    let mut scaler = autoscaler(&cluster, policy);

    cluster.set_tasks(processing(1));
    assert_eq!(scaler.adapt().await.unwrap(), TickOutcome::NoOp);
    assert!(!scaler.close_counts().is_empty());

    // Load is back at the plan size: counts are cleared.
    cluster.set_tasks(processing(3));
    assert_eq!(scaler.adapt().await.unwrap(), TickOutcome::NoOp);
    assert!(scaler.close_counts().is_empty());

    // A dip must again persist for two ticks.
    cluster.set_tasks(processing(1));
    assert_eq!(scaler.adapt().await.unwrap(), TickOutcome::NoOp);
    assert!(matches!(
        scaler.adapt().await.unwrap(),
        TickOutcome::ScaledDown(_)
    ));
}

#[tokio::test]
async fn duration_strategy_cancels_pending_workers_first() {
    let cluster = cluster(2);
    let policy = AdaptivePolicy {
        wait_count: 1,
        ..Default::default()
    };
    let mut scaler = autoscaler(&cluster, policy);

    // Two workers requested that never arrive.
    cluster.scale(4).await.unwrap();
    cluster.reconcile().await.unwrap();
    let pending: Vec<WorkerId> = cluster.state().not_yet_arrived().cloned().collect();
    assert_eq!(pending.len(), 2);

    // No tasks: the scheduler estimate is zero.
    let outcome = scaler.adapt().await.unwrap();
    let closed = match outcome {
        TickOutcome::ScaledDown(closed) => closed,
        other => panic!("expected scale down, got {other:?}"),
    };
    for id in &pending {
        assert!(closed.contains(id));
    }
    assert!(cluster.state().not_yet_arrived().next().is_none());
}

#[tokio::test]
async fn worker_key_closes_whole_hosts() {
    let cluster = cluster(4);
    cluster.set_load("w0", 0, 1).unwrap();
    let policy = AdaptivePolicy {
        strategy: Strategy::Queue,
        minimum: 1,
        wait_count: 1,
        worker_key: Some(WorkerKey::Host),
        ..Default::default()
    };
    let mut scaler = autoscaler(&cluster, policy);

    let outcome = scaler.adapt().await.unwrap();
    let closed: Vec<WorkerId> = match outcome {
        TickOutcome::ScaledDown(closed) => closed.into_iter().collect(),
        other => panic!("expected scale down, got {other:?}"),
    };
    // host-0 is busy (w0), host-1 holds w2 and w3.
    assert_eq!(closed, vec!["w2".to_string(), "w3".to_string()]);
}

#[tokio::test]
async fn closed_cluster_is_left_alone() {
    let cluster = cluster(2);
    cluster.close();
    let mut scaler = autoscaler(&cluster, AdaptivePolicy::default());
    assert_eq!(scaler.adapt().await.unwrap(), TickOutcome::Skipped);
    assert_eq!(cluster.plan().len(), 2);
}
