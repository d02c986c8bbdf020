//! Log fan-out tests against live deployment runs

use std::collections::BTreeMap;
use std::sync::Arc;

use futures::StreamExt;
use tokio::sync::Notify;

use deployd::bus::{BusOptions, LogEvent};
use deployd::models::deployment::DeploymentStatus;

use crate::support::{harness, harness_with, wait_for_status, Script, ScriptedExecutor};

fn messages(events: &[LogEvent]) -> Vec<String> {
    events.iter().map(|e| e.message.clone()).collect()
}

#[tokio::test]
async fn test_subscribers_attached_at_different_times_see_identical_sequences() {
    let build_gate = Arc::new(Notify::new());
    let deploy_gate = Arc::new(Notify::new());
    let h = harness(
        ScriptedExecutor::new()
            .on("docker pull", [Script::Block(build_gate.clone())])
            .on("docker run", [Script::Block(deploy_gate.clone())]),
    );

    let started = h.orchestrator.deploy("svc-1", None, None).await.unwrap();
    let id = started.deployment.id.clone();

    let early = h.bus.subscribe(&id).unwrap();
    let early_backlog = early.history().len();
    let early = tokio::spawn(early.into_stream().collect::<Vec<_>>());

    build_gate.notify_one();
    wait_for_status(h.store.as_ref(), &id, DeploymentStatus::Deploying).await;

    let late = h.bus.subscribe(&id).unwrap();
    assert!(late.history().len() > early_backlog);
    let late = tokio::spawn(late.into_stream().collect::<Vec<_>>());

    deploy_gate.notify_one();
    assert_eq!(started.completion.await.unwrap(), DeploymentStatus::Running);

    let early = early.await.unwrap();
    let late = late.await.unwrap();
    let full = h.bus.history(&id).unwrap();

    assert_eq!(early, full);
    assert_eq!(late, full);
    assert!(early.iter().enumerate().all(|(i, e)| e.seq == i as u64));
    assert_eq!(full[0].status, Some(DeploymentStatus::Pending));
    assert_eq!(full.last().unwrap().status, Some(DeploymentStatus::Running));
}

#[tokio::test]
async fn test_history_is_a_prefix_completed_by_the_live_tail() {
    let gate = Arc::new(Notify::new());
    let h = harness(ScriptedExecutor::new().on("docker rm", [Script::Block(gate.clone())]));

    let started = h.orchestrator.deploy("svc-1", None, None).await.unwrap();
    let id = started.deployment.id.clone();
    wait_for_status(h.store.as_ref(), &id, DeploymentStatus::Deploying).await;

    let mut subscription = h.bus.subscribe(&id).unwrap();
    let backlog = subscription.history().to_vec();
    assert!(subscription.terminal_status().is_none());

    gate.notify_one();
    let mut tail = Vec::new();
    while let Some(event) = subscription.recv().await {
        tail.push(event);
    }
    assert!(!subscription.was_evicted());

    let full = h.bus.history(&id).unwrap();
    assert_eq!(&full[..backlog.len()], backlog.as_slice());
    assert_eq!(&full[backlog.len()..], tail.as_slice());

    // The bus and the record store agree line for line
    let stored = h.store_messages(&id).await;
    assert_eq!(messages(&full), stored);
    started.completion.await.unwrap();
}

#[tokio::test]
async fn test_subscribers_do_not_change_the_run() {
    let quiet = harness(ScriptedExecutor::new());
    let unobserved = quiet.orchestrator.deploy("svc-1", None, None).await.unwrap();
    assert_eq!(unobserved.completion.await.unwrap(), DeploymentStatus::Running);
    let quiet_lines = quiet.store_messages(&unobserved.deployment.id).await.len();

    let gate = Arc::new(Notify::new());
    let busy = harness(ScriptedExecutor::new().on("docker pull", [Script::Block(gate.clone())]));
    let observed = busy.orchestrator.deploy("svc-1", None, None).await.unwrap();
    let id = observed.deployment.id.clone();

    // Readers, plus subscribers that never read at all
    let readers: Vec<_> = (0..8)
        .map(|_| tokio::spawn(busy.bus.subscribe(&id).unwrap().into_stream().collect::<Vec<_>>()))
        .collect();
    let idle: Vec<_> = (0..8).map(|_| busy.bus.subscribe(&id).unwrap()).collect();
    assert_eq!(busy.bus.subscriber_count(&id), 16);

    gate.notify_one();
    assert_eq!(observed.completion.await.unwrap(), DeploymentStatus::Running);

    assert_eq!(busy.store_messages(&id).await.len(), quiet_lines);
    for reader in readers {
        assert_eq!(reader.await.unwrap(), busy.bus.history(&id).unwrap());
    }
    drop(idle);
}

#[tokio::test]
async fn test_slow_subscriber_is_disconnected_and_run_completes() {
    let gate = Arc::new(Notify::new());
    let h = harness_with(
        ScriptedExecutor::new().on("docker pull", [Script::Block(gate.clone())]),
        BusOptions {
            subscriber_capacity: 2,
            ..Default::default()
        },
        BTreeMap::new(),
    );

    let started = h.orchestrator.deploy("svc-1", None, None).await.unwrap();
    let id = started.deployment.id.clone();
    let stalled = h.bus.subscribe(&id).unwrap();

    gate.notify_one();
    assert_eq!(started.completion.await.unwrap(), DeploymentStatus::Running);

    assert!(stalled.was_evicted());
    let received: Vec<_> = stalled.into_stream().collect().await;
    let full = h.bus.history(&id).unwrap();
    assert!(received.len() < full.len());
    assert_eq!(&full[..received.len()], received.as_slice());
}

#[tokio::test]
async fn test_dropping_a_stream_releases_its_subscription() {
    let gate = Arc::new(Notify::new());
    let h = harness(ScriptedExecutor::new().on("docker pull", [Script::Block(gate.clone())]));

    let started = h.orchestrator.deploy("svc-1", None, None).await.unwrap();
    let id = started.deployment.id.clone();

    let stream = h.bus.subscribe(&id).unwrap().into_stream();
    let subscription = h.bus.subscribe(&id).unwrap();
    assert_eq!(h.bus.subscriber_count(&id), 2);

    drop(stream);
    drop(subscription);
    assert_eq!(h.bus.subscriber_count(&id), 0);

    gate.notify_one();
    assert_eq!(started.completion.await.unwrap(), DeploymentStatus::Running);
}
