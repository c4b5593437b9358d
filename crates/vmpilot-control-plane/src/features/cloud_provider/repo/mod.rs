pub mod fluence;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

pub use fluence::FluenceCloudProvider;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ProviderError {
    #[error("failed to build provider client: {0}")]
    Client(String),
    #[error("network error talking to provider: {0}")]
    Transport(String),
    #[error("provider returned status {status}: {body}")]
    Status { status: u16, body: String },
    #[error("instance not found: {0}")]
    NotFound(String),
    #[error("invalid provider response: {0}")]
    InvalidResponse(String),
}

pub type ProviderResult<T> = std::result::Result<T, ProviderError>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MachineResources {
    pub cpu: u32,
    pub memory: String,
    pub storage: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpenPort {
    pub port: u16,
    pub protocol: String,
    pub description: String,
}

impl OpenPort {
    pub fn tcp(port: u16, description: impl Into<String>) -> Self {
        Self {
            port,
            protocol: "tcp".to_string(),
            description: description.into(),
        }
    }
}

/// Machine specification submitted on VM creation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MachineSpec {
    pub name: String,
    pub os_image: String,
    pub resources: MachineResources,
    pub ssh_keys: Vec<String>,
    pub open_ports: Vec<OpenPort>,
}

/// Instance descriptor as returned by the provider's query endpoint.
///
/// Fields the control plane does not interpret are kept in `extra` so the
/// detail endpoint can pass them through untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstanceDescriptor {
    #[serde(default, alias = "id", skip_serializing_if = "Option::is_none")]
    pub vm_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub public_ip: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl InstanceDescriptor {
    /// Provider reports the VM active and it has a public address.
    pub fn is_ready(&self) -> bool {
        let active = self
            .status
            .as_deref()
            .is_some_and(|status| status.eq_ignore_ascii_case("active"));
        active && self.public_address().is_some()
    }

    pub fn public_address(&self) -> Option<&str> {
        self.public_ip
            .as_deref()
            .map(str::trim)
            .filter(|ip| !ip.is_empty())
    }
}

/// Cloud VM provider consumed by the control plane.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CloudProvider: Send + Sync {
    /// Create one instance and return its provider-assigned id
    async fn create_instance(&self, spec: &MachineSpec) -> ProviderResult<String>;

    /// Delete an instance
    async fn delete_instance(&self, vm_id: &str) -> ProviderResult<()>;

    /// Query instances matching `vm_id`
    async fn describe_instance(&self, vm_id: &str) -> ProviderResult<Vec<InstanceDescriptor>>;
}
