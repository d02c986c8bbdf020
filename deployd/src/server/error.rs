//! HTTP mapping of coordinator errors

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use deployd_api::ErrorResponse;
use tracing::error;

use crate::errors::{CoordinatorError, StoreError};

impl CoordinatorError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            CoordinatorError::ServiceNotFound(_)
            | CoordinatorError::DeploymentNotFound(_)
            | CoordinatorError::StoreError(StoreError::NotFound(_)) => StatusCode::NOT_FOUND,
            CoordinatorError::RunInProgress { .. } => StatusCode::CONFLICT,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for CoordinatorError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            error!("Request failed: {}", self);
        }
        let body = ErrorResponse {
            error: self.to_string(),
        };
        (status, Json(body)).into_response()
    }
}
