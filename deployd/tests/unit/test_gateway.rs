//! HTTP gateway tests: deploy trigger, record queries and log streams

use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::body::{to_bytes, Body};
use axum::http::{header, Request, StatusCode};
use axum::Router;
use tokio::sync::Notify;
use tower::ServiceExt;

use deployd::bus::BusOptions;
use deployd::models::deployment::{Deployment, DeploymentStatus};
use deployd::server::serve::router;
use deployd::server::state::ServerState;
use deployd::store::DeploymentStore;
use deployd_api::{DeployResponse, ErrorResponse};

use crate::support::{harness, harness_with, Harness, Script, ScriptedExecutor};

fn app(h: &Harness) -> Router {
    router(Arc::new(ServerState::new(h.orchestrator.clone())))
}

async fn send(app: Router, request: Request<Body>) -> (StatusCode, String) {
    let response = app.oneshot(request).await.unwrap();
    let status = response.status();
    let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    (status, String::from_utf8(body.to_vec()).unwrap())
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

fn post(uri: &str) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .body(Body::empty())
        .unwrap()
}

fn post_json(uri: &str, json: &str) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(json.to_string()))
        .unwrap()
}

#[tokio::test]
async fn test_health() {
    let h = harness(ScriptedExecutor::new());
    let (status, body) = send(app(&h), get("/health")).await;
    assert_eq!(status, StatusCode::OK);
    assert!(body.contains("\"healthy\""));
}

#[tokio::test]
async fn test_logs_of_unknown_deployment_is_not_found() {
    let h = harness(ScriptedExecutor::new());

    let (status, body) = send(app(&h), get("/deployments/does-not-exist/logs")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    let error: ErrorResponse = serde_json::from_str(&body).unwrap();
    assert!(error.error.contains("does-not-exist"));
}

#[tokio::test]
async fn test_logs_of_completed_deployment_end_with_status() {
    let h = harness(ScriptedExecutor::new());
    let started = h.orchestrator.deploy("svc-1", None, None).await.unwrap();
    let id = started.deployment.id.clone();
    assert_eq!(started.completion.await.unwrap(), DeploymentStatus::Running);

    let (status, body) = send(app(&h), get(&format!("/deployments/{}/logs", id))).await;
    assert_eq!(status, StatusCode::OK);

    let lines = h.store_messages(&id).await;
    assert_eq!(body.matches("event: log").count(), lines.len());
    assert_eq!(body.matches("event: end").count(), 1);
    assert!(body.contains("\"status\":\"RUNNING\""));

    // Frames arrive in sequence order and the end frame comes last
    let first = body.find("id: 0").unwrap();
    let last = body.find(&format!("id: {}", lines.len() - 1)).unwrap();
    assert!(first < last);
    assert!(body.rfind("event: log").unwrap() < body.find("event: end").unwrap());
}

#[tokio::test]
async fn test_logs_of_live_deployment_follow_to_the_end() {
    let gate = Arc::new(Notify::new());
    let h = harness(ScriptedExecutor::new().on("docker run", [Script::Block(gate.clone())]));
    let started = h.orchestrator.deploy("svc-1", None, None).await.unwrap();
    let id = started.deployment.id.clone();

    let stream = tokio::spawn(send(app(&h), get(&format!("/deployments/{}/logs", id))));
    tokio::time::sleep(Duration::from_millis(20)).await;
    gate.notify_one();
    assert_eq!(started.completion.await.unwrap(), DeploymentStatus::Running);

    let (status, body) = tokio::time::timeout(Duration::from_secs(5), stream)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(status, StatusCode::OK);
    assert!(body.contains("deployment succeeded"));
    assert!(body.contains("\"status\":\"RUNNING\""));
}

#[tokio::test]
async fn test_retired_stream_is_replayed_from_the_store() {
    let h = harness_with(
        ScriptedExecutor::new().on(
            "docker pull",
            [Script::Exit {
                code: 1,
                stderr: "pull access denied",
            }],
        ),
        BusOptions {
            retention: Duration::ZERO,
            ..Default::default()
        },
        Default::default(),
    );
    let started = h.orchestrator.deploy("svc-1", None, None).await.unwrap();
    let id = started.deployment.id.clone();
    assert_eq!(started.completion.await.unwrap(), DeploymentStatus::Failed);

    h.bus.evict_expired(Instant::now() + Duration::from_secs(1));
    assert!(!h.bus.contains(&id));

    let (status, body) = send(app(&h), get(&format!("/deployments/{}/logs", id))).await;
    assert_eq!(status, StatusCode::OK);
    assert!(body.contains("pull access denied"));
    assert!(body.contains("\"status\":\"FAILED\""));
    assert_eq!(
        body.matches("event: log").count(),
        h.store_messages(&id).await.len()
    );
}

#[tokio::test]
async fn test_deploy_trigger_accepts_empty_body() {
    let h = harness(ScriptedExecutor::new());

    let (status, body) = send(app(&h), post("/services/svc-1/deploy")).await;
    assert_eq!(status, StatusCode::ACCEPTED);

    let response: DeployResponse = serde_json::from_str(&body).unwrap();
    assert_eq!(response.status, "PENDING");
    assert!(h.store.get(&response.deployment_id).await.unwrap().is_some());
}

#[tokio::test]
async fn test_deploy_trigger_passes_version_and_commit() {
    let h = harness(ScriptedExecutor::new());

    let (status, body) = send(
        app(&h),
        post_json(
            "/services/svc-1/deploy",
            r#"{"version":"2.0.1","commit_hash":"deadbeef"}"#,
        ),
    )
    .await;
    assert_eq!(status, StatusCode::ACCEPTED);

    let response: DeployResponse = serde_json::from_str(&body).unwrap();
    let d = h.deployment(&response.deployment_id).await;
    assert_eq!(d.version.as_deref(), Some("2.0.1"));
    assert_eq!(d.commit_hash.as_deref(), Some("deadbeef"));
}

#[tokio::test]
async fn test_deploy_trigger_conflicts_while_running() {
    let gate = Arc::new(Notify::new());
    let h = harness(ScriptedExecutor::new().on("docker pull", [Script::Block(gate.clone())]));

    let (status, _) = send(app(&h), post("/services/svc-1/deploy")).await;
    assert_eq!(status, StatusCode::ACCEPTED);

    let (status, body) = send(app(&h), post("/services/svc-1/deploy")).await;
    assert_eq!(status, StatusCode::CONFLICT);
    let error: ErrorResponse = serde_json::from_str(&body).unwrap();
    assert!(error.error.contains("svc-1"));

    gate.notify_one();
}

#[tokio::test]
async fn test_deploy_trigger_for_unknown_service() {
    let h = harness(ScriptedExecutor::new());

    let (status, _) = send(app(&h), post("/services/ghost/deploy")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(h.executor.calls().is_empty());
}

#[tokio::test]
async fn test_deployment_queries() {
    let h = harness(ScriptedExecutor::new());
    for version in ["1", "2"] {
        let started = h
            .orchestrator
            .deploy("svc-1", Some(version.to_string()), None)
            .await
            .unwrap();
        started.completion.await.unwrap();
    }
    let worker = h.orchestrator.deploy("svc-2", None, None).await.unwrap();
    worker.completion.await.unwrap();

    let (status, body) = send(app(&h), get("/services/svc-1/deployments?limit=1")).await;
    assert_eq!(status, StatusCode::OK);
    let page: Vec<Deployment> = serde_json::from_str(&body).unwrap();
    assert_eq!(page.len(), 1);
    assert_eq!(page[0].version.as_deref(), Some("2"));

    let (_, body) = send(app(&h), get("/projects/proj-1/deployments")).await;
    let all: Vec<Deployment> = serde_json::from_str(&body).unwrap();
    assert_eq!(all.len(), 3);
    assert!(all.windows(2).all(|w| w[0].created_at >= w[1].created_at));

    let (status, body) = send(app(&h), get(&format!("/deployments/{}", all[0].id))).await;
    assert_eq!(status, StatusCode::OK);
    let one: Deployment = serde_json::from_str(&body).unwrap();
    assert_eq!(one.status, DeploymentStatus::Running);

    let (status, _) = send(app(&h), get("/services/ghost/deployments")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    let (status, _) = send(app(&h), get("/deployments/missing")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_service_view_reflects_last_deployment() {
    let h = harness(ScriptedExecutor::new());
    let started = h.orchestrator.deploy("svc-1", None, None).await.unwrap();
    started.completion.await.unwrap();

    let (status, body) = send(app(&h), get("/services/svc-1")).await;
    assert_eq!(status, StatusCode::OK);
    assert!(body.contains("\"status\":\"running\""));
}
