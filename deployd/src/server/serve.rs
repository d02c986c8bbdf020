//! HTTP server setup

use std::future::Future;
use std::sync::Arc;

use axum::{
    routing::{get, post},
    Router,
};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::app::options::ServerOptions;
use crate::errors::CoordinatorError;
use crate::server::handlers::{
    deploy_handler, get_deployment_handler, get_service_handler, health_handler,
    project_deployments_handler, service_deployments_handler, version_handler,
};
use crate::server::state::ServerState;
use crate::server::stream::logs_handler;

/// Build the application router
pub fn router(state: Arc<ServerState>) -> Router {
    Router::new()
        // Health and version
        .route("/health", get(health_handler))
        .route("/version", get(version_handler))
        // Services
        .route("/services/{id}", get(get_service_handler))
        .route("/services/{id}/deploy", post(deploy_handler))
        .route("/services/{id}/deployments", get(service_deployments_handler))
        // Projects
        .route("/projects/{id}/deployments", get(project_deployments_handler))
        // Deployments
        .route("/deployments/{id}", get(get_deployment_handler))
        .route("/deployments/{id}/logs", get(logs_handler))
        // State and middleware
        .with_state(state)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}

/// Start the HTTP server
pub async fn serve(
    options: &ServerOptions,
    state: Arc<ServerState>,
    shutdown_signal: impl Future<Output = ()> + Send + 'static,
) -> Result<JoinHandle<Result<(), CoordinatorError>>, CoordinatorError> {
    let app = router(state);

    let addr = format!("{}:{}", options.host, options.port);
    info!("Starting HTTP server on {}", addr);

    let listener = TcpListener::bind(&addr)
        .await
        .map_err(|e| CoordinatorError::ServerError(e.to_string()))?;

    let handle = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal)
            .await
            .map_err(|e| CoordinatorError::ServerError(e.to_string()))
    });

    Ok(handle)
}
