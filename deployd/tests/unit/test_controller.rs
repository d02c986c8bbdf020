//! Deployment run tests driven through the orchestrator

use std::collections::BTreeMap;

use deployd::bus::BusOptions;
use deployd::errors::CoordinatorError;
use deployd::models::deployment::DeploymentStatus;
use deployd::models::pipeline::{PipelineTemplate, StepTemplate};
use deployd::models::service::ServiceStatus;
use deployd::store::DeploymentStore;

use futures::StreamExt;

use crate::support::{
    faulty_harness, harness, harness_with, statuses, Faults, Script, ScriptedExecutor,
};

use DeploymentStatus::*;

fn script_step(name: &str, command: &str, retries: u32) -> StepTemplate {
    StepTemplate {
        name: name.to_string(),
        command: command.to_string(),
        args: vec!["{service}".to_string(), "{version}".to_string()],
        env: BTreeMap::new(),
        retries,
        benign: None,
    }
}

#[tokio::test]
async fn test_successful_deployment_reaches_running() {
    let h = harness(
        ScriptedExecutor::new().on("docker pull", [Script::Succeed(vec!["pulled", "digest: sha256:abc"])]),
    );
    assert_eq!(h.service("svc-1").await.status, ServiceStatus::Stopped);

    let started = h
        .orchestrator
        .deploy("svc-1", Some("1.4.2".to_string()), Some("abc123".to_string()))
        .await
        .unwrap();
    assert_eq!(started.deployment.status, Pending);
    assert_eq!(started.completion.await.unwrap(), Running);

    let d = h.deployment(&started.deployment.id).await;
    assert_eq!(statuses(&d), vec![Pending, Building, Deploying, Running]);
    assert_eq!(d.events[0].timestamp, d.created_at);
    assert!(d.events.windows(2).all(|w| w[0].timestamp <= w[1].timestamp));
    assert!(d.logs.windows(2).all(|w| w[0].timestamp <= w[1].timestamp));
    assert_eq!(d.version.as_deref(), Some("1.4.2"));
    assert_eq!(d.commit_hash.as_deref(), Some("abc123"));

    assert!(d.logs.iter().any(|l| l.message == "pulled"));
    assert!(d.logs.last().unwrap().message.contains("deployment succeeded"));

    assert_eq!(h.service("svc-1").await.status, ServiceStatus::Running);
    assert_eq!(
        h.executor.calls(),
        vec![
            "docker pull api:1.4.2",
            "docker rm -f api",
            "docker run -d --name api --restart unless-stopped api:1.4.2",
            "docker container inspect api",
        ]
    );
}

#[tokio::test]
async fn test_service_status_written_once_after_last_log_line() {
    let h = harness(ScriptedExecutor::new());

    let started = h.orchestrator.deploy("svc-1", None, None).await.unwrap();
    assert_eq!(started.completion.await.unwrap(), Running);

    let d = h.deployment(&started.deployment.id).await;
    let writes = h.registry.writes();
    assert_eq!(writes.len(), 1);
    assert_eq!(writes[0].status, ServiceStatus::Running);
    assert_eq!(writes[0].log_lines, d.logs.len());
}

#[tokio::test]
async fn test_missing_version_defaults_to_latest() {
    let h = harness(ScriptedExecutor::new());

    let started = h.orchestrator.deploy("svc-1", Some("  ".to_string()), None).await.unwrap();
    started.completion.await.unwrap();

    assert_eq!(started.deployment.version.as_deref(), Some("latest"));
    assert_eq!(h.executor.calls()[0], "docker pull api:latest");
}

#[tokio::test]
async fn test_non_zero_exit_in_deploy_phase_fails_deployment() {
    let h = harness(ScriptedExecutor::new().on(
        "docker run",
        [Script::Exit {
            code: 125,
            stderr: "docker: Error response from daemon: port is already allocated.",
        }],
    ));

    let started = h.orchestrator.deploy("svc-1", None, None).await.unwrap();
    assert_eq!(started.completion.await.unwrap(), Failed);

    let d = h.deployment(&started.deployment.id).await;
    assert_eq!(statuses(&d), vec![Pending, Building, Deploying, Failed]);
    assert!(d.logs.iter().any(|l| l.message.contains("ERROR") && l.message.contains("code 125")));
    assert!(d.logs.iter().any(|l| l.message.starts_with("[stderr] docker: Error response")));
    assert!(d.logs.last().unwrap().message.starts_with("Status: FAILED"));

    // Remaining steps are skipped and the service is left alone
    assert_eq!(h.executor.call_count("docker container inspect"), 0);
    assert_eq!(h.service("svc-1").await.status, ServiceStatus::Stopped);
    assert!(h.registry.writes().is_empty());
}

#[tokio::test]
async fn test_build_failure_skips_deploy_phase() {
    let h = harness(ScriptedExecutor::new().on(
        "docker pull",
        [Script::Exit {
            code: 1,
            stderr: "Error response from daemon: manifest for api:9.9 not found",
        }],
    ));

    let started = h.orchestrator.deploy("svc-1", Some("9.9".to_string()), None).await.unwrap();
    assert_eq!(started.completion.await.unwrap(), Failed);

    let d = h.deployment(&started.deployment.id).await;
    assert_eq!(statuses(&d), vec![Pending, Building, Failed]);
    assert_eq!(h.executor.calls(), vec!["docker pull api:9.9"]);
}

#[tokio::test]
async fn test_absent_previous_instance_is_benign() {
    let h = harness(ScriptedExecutor::new().on(
        "docker rm",
        [Script::Exit {
            code: 1,
            stderr: "Error response from daemon: No such container: api",
        }],
    ));

    let started = h.orchestrator.deploy("svc-1", None, None).await.unwrap();
    assert_eq!(started.completion.await.unwrap(), Running);

    let d = h.deployment(&started.deployment.id).await;
    assert!(d
        .logs
        .iter()
        .any(|l| l.message.contains("stop previous instance: nothing to do")));
    assert_eq!(h.executor.call_count("docker run"), 1);
}

#[tokio::test]
async fn test_unrelated_failure_of_benign_step_is_not_masked() {
    let h = harness(ScriptedExecutor::new().on(
        "docker rm",
        [Script::Exit {
            code: 1,
            stderr: "permission denied while trying to connect to the Docker daemon socket",
        }],
    ));

    let started = h.orchestrator.deploy("svc-1", None, None).await.unwrap();
    assert_eq!(started.completion.await.unwrap(), Failed);
    assert_eq!(h.executor.call_count("docker run"), 0);
}

#[tokio::test]
async fn test_missing_binary_fails_deployment() {
    let h = harness(ScriptedExecutor::new().on("docker pull", [Script::SpawnFail]));

    let started = h.orchestrator.deploy("svc-1", None, None).await.unwrap();
    assert_eq!(started.completion.await.unwrap(), Failed);

    let d = h.deployment(&started.deployment.id).await;
    assert!(d.logs.iter().any(|l| l.message.contains("failed to start 'docker'")));
}

#[tokio::test]
async fn test_step_retries_until_success() {
    let mut pipelines = BTreeMap::new();
    pipelines.insert(
        "script".to_string(),
        PipelineTemplate {
            deploy: vec![script_step("rollout", "./rollout.sh", 2)],
            ..Default::default()
        },
    );
    let executor = ScriptedExecutor::new().on(
        "rollout",
        [
            Script::Exit { code: 2, stderr: "connection reset" },
            Script::Exit { code: 2, stderr: "connection reset" },
            Script::Succeed(vec!["rolled out"]),
        ],
    );
    let h = harness_with(executor, BusOptions::default(), pipelines);

    let started = h.orchestrator.deploy("svc-2", Some("7".to_string()), None).await.unwrap();
    assert_eq!(started.completion.await.unwrap(), Running);

    assert_eq!(h.executor.calls(), vec!["./rollout.sh worker 7"; 3]);
    let d = h.deployment(&started.deployment.id).await;
    let retries = d.logs.iter().filter(|l| l.message.contains("retrying in")).count();
    assert_eq!(retries, 2);
    assert!(d.logs.iter().any(|l| l.message.contains("[build] no steps")));
}

#[tokio::test]
async fn test_step_gives_up_after_retries() {
    let mut pipelines = BTreeMap::new();
    pipelines.insert(
        "script".to_string(),
        PipelineTemplate {
            build: vec![script_step("compile", "make", 1)],
            ..Default::default()
        },
    );
    let executor = ScriptedExecutor::new().on("make", [Script::Exit { code: 2, stderr: "error" }]);
    let h = harness_with(executor, BusOptions::default(), pipelines);

    let started = h.orchestrator.deploy("svc-2", None, None).await.unwrap();
    assert_eq!(started.completion.await.unwrap(), Failed);
    assert_eq!(h.executor.call_count("make"), 2);
}

#[tokio::test]
async fn test_panicking_run_is_marked_failed() {
    let h = harness(ScriptedExecutor::new().on("docker run", [Script::Panic]));

    let started = h.orchestrator.deploy("svc-1", None, None).await.unwrap();
    assert_eq!(started.completion.await.unwrap(), Failed);

    let d = h.deployment(&started.deployment.id).await;
    assert_eq!(statuses(&d), vec![Pending, Building, Deploying, Failed]);
    assert!(d.logs.last().unwrap().message.contains("internal error"));
    assert_eq!(h.bus.terminal_status(&d.id), Some(Failed));
    assert!(h.orchestrator.active_deployment("svc-1").is_none());
}

#[tokio::test]
async fn test_one_active_run_per_service() {
    let gate = std::sync::Arc::new(tokio::sync::Notify::new());
    let h = harness(
        ScriptedExecutor::new().on("docker pull api", [Script::Block(gate.clone()), Script::Succeed(vec![])]),
    );

    let first = h.orchestrator.deploy("svc-1", None, None).await.unwrap();
    let err = h.orchestrator.deploy("svc-1", None, None).await.err().unwrap();
    match err {
        CoordinatorError::RunInProgress { deployment_id, .. } => {
            assert_eq!(deployment_id, first.deployment.id)
        }
        other => panic!("unexpected error: {}", other),
    }
    assert_eq!(h.store.list_by_service("svc-1", 10).await.unwrap().len(), 1);

    // Another service is not blocked
    let other = h.orchestrator.deploy("svc-2", None, None).await.unwrap();
    assert_eq!(other.completion.await.unwrap(), Running);

    gate.notify_one();
    assert_eq!(first.completion.await.unwrap(), Running);

    let second = h.orchestrator.deploy("svc-1", None, None).await.unwrap();
    assert_eq!(second.completion.await.unwrap(), Running);
    assert_eq!(h.store.list_by_service("svc-1", 10).await.unwrap().len(), 2);
}

#[tokio::test]
async fn test_unknown_service_creates_nothing() {
    let h = harness(ScriptedExecutor::new());

    let err = h.orchestrator.deploy("nope", None, None).await.err().unwrap();
    assert!(matches!(err, CoordinatorError::ServiceNotFound(_)));
    assert!(h.store.list_unfinished().await.unwrap().is_empty());
    assert!(h.executor.calls().is_empty());
}

#[tokio::test]
async fn test_unpersisted_final_status_ends_in_failed() {
    let (h, _) = faulty_harness(
        ScriptedExecutor::new(),
        Faults {
            fail_transition_to: Some(Running),
            ..Default::default()
        },
    );

    let started = h.orchestrator.deploy("svc-1", None, None).await.unwrap();
    let id = started.deployment.id.clone();
    assert_eq!(started.completion.await.unwrap(), Failed);

    let d = h.deployment(&id).await;
    assert_eq!(statuses(&d), vec![Pending, Building, Deploying, Failed]);
    assert!(d.logs.last().unwrap().message.contains("record store error"));
    assert_eq!(h.bus.terminal_status(&id), Some(Failed));
    assert_eq!(h.service("svc-1").await.status, ServiceStatus::Stopped);
}

#[tokio::test]
async fn test_log_topic_is_open_before_record_exists() {
    let (h, faulty) = faulty_harness(ScriptedExecutor::new(), Faults::default());

    let started = h.orchestrator.deploy("svc-1", None, None).await.unwrap();
    started.completion.await.unwrap();

    assert_eq!(faulty.creates(), vec![(started.deployment.id.clone(), true)]);
}

#[tokio::test]
async fn test_failed_create_leaves_no_topic_or_reservation() {
    let (h, faulty) = faulty_harness(
        ScriptedExecutor::new(),
        Faults {
            fail_create: true,
            ..Default::default()
        },
    );

    let err = h.orchestrator.deploy("svc-1", None, None).await.err().unwrap();
    assert!(matches!(err, CoordinatorError::StoreError(_)));

    let (id, _) = faulty.creates().pop().unwrap();
    assert!(!h.bus.contains(&id));
    assert!(h.orchestrator.active_deployment("svc-1").is_none());
    assert!(h.executor.calls().is_empty());
}

#[tokio::test]
async fn test_redeploy_right_after_stream_end_is_accepted() {
    let h = harness(ScriptedExecutor::new());

    for _ in 0..20 {
        let started = h.orchestrator.deploy("svc-1", None, None).await.unwrap();
        let events: Vec<_> = h
            .bus
            .subscribe(&started.deployment.id)
            .unwrap()
            .into_stream()
            .collect()
            .await;
        assert_eq!(events.last().unwrap().status, Some(Running));
        assert!(h.orchestrator.active_deployment("svc-1").is_none());
    }
}
