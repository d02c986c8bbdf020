//! HTTP request handlers

use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use deployd_api::{DeployRequest, DeployResponse, HealthResponse, ListQuery, VersionResponse};
use tracing::info;

use crate::errors::CoordinatorError;
use crate::server::state::ServerState;
use crate::store::page_size;
use crate::utils::version_info;

/// Health check handler
pub async fn health_handler() -> impl IntoResponse {
    let version = version_info();
    Json(HealthResponse {
        status: "healthy".to_string(),
        service: "deployd".to_string(),
        version: version.version,
    })
}

/// Version handler
pub async fn version_handler() -> impl IntoResponse {
    let version = version_info();
    Json(VersionResponse {
        version: version.version,
        git_hash: version.git_hash,
        build_time: version.build_time,
    })
}

/// Trigger a deployment. The body is optional.
pub async fn deploy_handler(
    State(state): State<Arc<ServerState>>,
    Path(service_id): Path<String>,
    body: Option<Json<DeployRequest>>,
) -> Result<impl IntoResponse, CoordinatorError> {
    let request = body.map(|Json(r)| r).unwrap_or_default();
    let started = state
        .orchestrator
        .deploy(&service_id, request.version, request.commit_hash)
        .await?;

    info!(
        deployment_id = %started.deployment.id,
        service_id = %service_id,
        "Deployment accepted"
    );

    Ok((
        StatusCode::ACCEPTED,
        Json(DeployResponse {
            deployment_id: started.deployment.id,
            status: started.deployment.status.to_string(),
            message: "Deployment started".to_string(),
        }),
    ))
}

pub async fn get_deployment_handler(
    State(state): State<Arc<ServerState>>,
    Path(deployment_id): Path<String>,
) -> Result<impl IntoResponse, CoordinatorError> {
    let deployment = state
        .store
        .get(&deployment_id)
        .await?
        .ok_or(CoordinatorError::DeploymentNotFound(deployment_id))?;
    Ok(Json(deployment))
}

/// Deployments of one service, most recent first
pub async fn service_deployments_handler(
    State(state): State<Arc<ServerState>>,
    Path(service_id): Path<String>,
    Query(query): Query<ListQuery>,
) -> Result<impl IntoResponse, CoordinatorError> {
    if state.registry.get(&service_id).await?.is_none() {
        return Err(CoordinatorError::ServiceNotFound(service_id));
    }
    let deployments = state
        .store
        .list_by_service(&service_id, page_size(query.limit))
        .await?;
    Ok(Json(deployments))
}

/// Deployments of one project, most recent first
pub async fn project_deployments_handler(
    State(state): State<Arc<ServerState>>,
    Path(project_id): Path<String>,
    Query(query): Query<ListQuery>,
) -> Result<impl IntoResponse, CoordinatorError> {
    let deployments = state
        .store
        .list_by_project(&project_id, page_size(query.limit))
        .await?;
    Ok(Json(deployments))
}

pub async fn get_service_handler(
    State(state): State<Arc<ServerState>>,
    Path(service_id): Path<String>,
) -> Result<impl IntoResponse, CoordinatorError> {
    let service = state
        .registry
        .get(&service_id)
        .await?
        .ok_or(CoordinatorError::ServiceNotFound(service_id))?;
    Ok(Json(service))
}
