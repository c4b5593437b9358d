pub mod status;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;

pub use status::DeploymentStatus;

/// Upper bound for a workload package reference.
pub const MAX_BLOB_ID_LEN: usize = 256;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CoreError {
    #[error("Invalid identity: {0}")]
    InvalidIdentity(String),
    #[error("Invalid blob id: {0}")]
    InvalidBlobId(String),
    #[error("Invalid status transition from {from} to {to}")]
    InvalidTransition {
        from: DeploymentStatus,
        to: DeploymentStatus,
    },
}

pub type Result<T> = std::result::Result<T, CoreError>;

/// The single VM tracked for an identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VmRecord {
    #[serde(rename = "public_key")]
    pub identity: String,
    pub vm_id: String,
    pub blob_id: String,
    pub status: DeploymentStatus,
    pub created_at: DateTime<Utc>,
}

impl VmRecord {
    pub fn new(identity: String, vm_id: String, blob_id: String) -> Self {
        Self {
            identity,
            vm_id,
            blob_id,
            status: DeploymentStatus::Creating,
            created_at: Utc::now(),
        }
    }
}

pub fn validate_identity(identity: &str) -> Result<()> {
    if identity.trim().is_empty() {
        return Err(CoreError::InvalidIdentity(
            "identity cannot be empty".to_string(),
        ));
    }
    Ok(())
}

/// Blob ids end up inside a remote shell command, so only URL-safe
/// characters are accepted.
pub fn validate_blob_id(blob_id: &str) -> Result<()> {
    if blob_id.is_empty() {
        return Err(CoreError::InvalidBlobId("blob id cannot be empty".to_string()));
    }
    if blob_id.len() > MAX_BLOB_ID_LEN {
        return Err(CoreError::InvalidBlobId(format!(
            "blob id exceeds {MAX_BLOB_ID_LEN} characters"
        )));
    }
    if !blob_id
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    {
        return Err(CoreError::InvalidBlobId(format!(
            "blob id contains unsupported characters: {blob_id}"
        )));
    }
    Ok(())
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateVmRequest {
    #[serde(rename = "public_key", alias = "identity")]
    pub identity: String,
    pub blob_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateVmResponse {
    pub vm_id: String,
    #[serde(rename = "public_key")]
    pub identity: String,
    pub blob_id: String,
    pub status: DeploymentStatus,
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeleteVmRequest {
    #[serde(rename = "public_key", alias = "identity")]
    pub identity: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeleteVmResponse {
    pub message: String,
    pub vm_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VmIdResponse {
    #[serde(rename = "public_key")]
    pub identity: String,
    pub vm_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub active_vms: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error_code: String,
    pub message: String,
    pub details: Option<HashMap<String, String>>,
    pub timestamp: DateTime<Utc>,
}

impl ErrorResponse {
    pub fn new(error_code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            error_code: error_code.into(),
            message: message.into(),
            details: None,
            timestamp: Utc::now(),
        }
    }

    pub fn with_details(mut self, details: HashMap<String, String>) -> Self {
        self.details = Some(details);
        self
    }
}
