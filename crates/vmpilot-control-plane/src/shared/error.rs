use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use std::collections::HashMap;
use thiserror::Error;
use vmpilot_core::{CoreError, ErrorResponse};

use crate::features::cloud_provider::repo::ProviderError;

/// Control plane specific errors
#[derive(Debug, Error)]
pub enum ControlPlaneError {
    #[error("Invalid request: {0}")]
    InvalidRequest(String),
    #[error("Validation error: {0}")]
    ValidationError(String),
    #[error("VM already exists for identity: {0}")]
    VmAlreadyExists(String),
    #[error("VM not found: {0}")]
    VmNotFound(String),
    #[error("Cloud provider error: {0}")]
    Upstream(String),
    #[error("Storage error: {0}")]
    StorageError(String),
    #[error("Invalid status transition: {0}")]
    InvalidTransition(String),
}

impl ControlPlaneError {
    pub fn error_code(&self) -> &'static str {
        match self {
            ControlPlaneError::InvalidRequest(_) => "INVALID_REQUEST",
            ControlPlaneError::ValidationError(_) => "VALIDATION_ERROR",
            ControlPlaneError::VmAlreadyExists(_) => "VM_ALREADY_EXISTS",
            ControlPlaneError::VmNotFound(_) => "VM_NOT_FOUND",
            ControlPlaneError::Upstream(_) => "UPSTREAM_ERROR",
            ControlPlaneError::StorageError(_) => "STORAGE_ERROR",
            ControlPlaneError::InvalidTransition(_) => "INVALID_TRANSITION",
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            ControlPlaneError::InvalidRequest(_) | ControlPlaneError::ValidationError(_) => {
                StatusCode::BAD_REQUEST
            }
            ControlPlaneError::VmAlreadyExists(_) => StatusCode::CONFLICT,
            ControlPlaneError::VmNotFound(_) => StatusCode::NOT_FOUND,
            ControlPlaneError::Upstream(_) => StatusCode::BAD_GATEWAY,
            ControlPlaneError::StorageError(_) | ControlPlaneError::InvalidTransition(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl From<CoreError> for ControlPlaneError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::InvalidIdentity(msg) | CoreError::InvalidBlobId(msg) => {
                ControlPlaneError::ValidationError(msg)
            }
            CoreError::InvalidTransition { .. } => {
                ControlPlaneError::InvalidTransition(err.to_string())
            }
        }
    }
}

impl From<ProviderError> for ControlPlaneError {
    fn from(err: ProviderError) -> Self {
        match err {
            ProviderError::NotFound(vm_id) => ControlPlaneError::VmNotFound(vm_id),
            other => ControlPlaneError::Upstream(other.to_string()),
        }
    }
}

impl From<ControlPlaneError> for ErrorResponse {
    fn from(err: ControlPlaneError) -> Self {
        let code = err.error_code();
        match err {
            ControlPlaneError::Upstream(msg) => {
                let mut details = HashMap::new();
                details.insert("upstream".to_string(), "cloud_provider".to_string());
                ErrorResponse::new(code, msg).with_details(details)
            }
            ControlPlaneError::InvalidRequest(msg)
            | ControlPlaneError::ValidationError(msg)
            | ControlPlaneError::VmNotFound(msg)
            | ControlPlaneError::StorageError(msg)
            | ControlPlaneError::InvalidTransition(msg) => ErrorResponse::new(code, msg),
            ControlPlaneError::VmAlreadyExists(_) => ErrorResponse::new(
                code,
                "User already has a VM. Only one VM per public key is allowed.",
            ),
        }
    }
}

impl IntoResponse for ControlPlaneError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body: ErrorResponse = self.into();
        (status, Json(body)).into_response()
    }
}

pub type ControlPlaneResult<T> = std::result::Result<T, ControlPlaneError>;
