use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Serialize;
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, warn};

use super::{CloudProvider, InstanceDescriptor, MachineSpec, ProviderError, ProviderResult};

const VMS_PATH: &str = "/vms/v3";
const CREATE_TIMEOUT: Duration = Duration::from_secs(60);
const QUERY_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct CreateVmsBody<'a> {
    instances: u32,
    vm_configuration: &'a MachineSpec,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct DeleteVmsBody<'a> {
    vm_ids: [&'a str; 1],
}

/// Fluence VM marketplace client, authenticated with a bearer API key.
#[derive(Clone)]
pub struct FluenceCloudProvider {
    client: Client,
    base_url: String,
    api_key: String,
}

impl FluenceCloudProvider {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> ProviderResult<Self> {
        let client = Client::builder()
            .timeout(CREATE_TIMEOUT)
            .build()
            .map_err(|e| ProviderError::Client(e.to_string()))?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
        })
    }

    fn vms_url(&self) -> String {
        format!("{}{}", self.base_url, VMS_PATH)
    }
}

#[async_trait]
impl CloudProvider for FluenceCloudProvider {
    async fn create_instance(&self, spec: &MachineSpec) -> ProviderResult<String> {
        let body = CreateVmsBody {
            instances: 1,
            vm_configuration: spec,
        };

        let response = self
            .client
            .post(self.vms_url())
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| ProviderError::Transport(e.to_string()))?;

        let status = response.status();
        if status != StatusCode::OK && status != StatusCode::CREATED {
            let body = response.text().await.unwrap_or_default();
            warn!(status = status.as_u16(), %body, "VM creation rejected by provider");
            return Err(ProviderError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let payload: Value = response
            .json()
            .await
            .map_err(|e| ProviderError::InvalidResponse(e.to_string()))?;
        debug!(%payload, "VM creation response");

        extract_vm_id(&payload).ok_or_else(|| {
            ProviderError::InvalidResponse("VM ID not found in response".to_string())
        })
    }

    async fn delete_instance(&self, vm_id: &str) -> ProviderResult<()> {
        let response = self
            .client
            .delete(self.vms_url())
            .bearer_auth(&self.api_key)
            .json(&DeleteVmsBody { vm_ids: [vm_id] })
            .send()
            .await
            .map_err(|e| ProviderError::Transport(e.to_string()))?;

        let status = response.status();
        if status != StatusCode::OK && status != StatusCode::NO_CONTENT {
            let body = response.text().await.unwrap_or_default();
            warn!(%vm_id, status = status.as_u16(), %body, "VM deletion rejected by provider");
            return Err(ProviderError::Status {
                status: status.as_u16(),
                body,
            });
        }

        Ok(())
    }

    async fn describe_instance(&self, vm_id: &str) -> ProviderResult<Vec<InstanceDescriptor>> {
        let response = self
            .client
            .get(self.vms_url())
            .bearer_auth(&self.api_key)
            .query(&[("vm_id", vm_id)])
            .timeout(QUERY_TIMEOUT)
            .send()
            .await
            .map_err(|e| ProviderError::Transport(e.to_string()))?;

        match response.status() {
            StatusCode::OK => response
                .json::<Vec<InstanceDescriptor>>()
                .await
                .map_err(|e| ProviderError::InvalidResponse(e.to_string())),
            StatusCode::NOT_FOUND => Err(ProviderError::NotFound(vm_id.to_string())),
            status => Err(ProviderError::Status {
                status: status.as_u16(),
                body: response.text().await.unwrap_or_default(),
            }),
        }
    }
}

/// The creation endpoint has answered both with an array of instances and
/// with a single object; accept either.
pub fn extract_vm_id(payload: &Value) -> Option<String> {
    let id_of = |value: &Value| {
        value
            .get("vmId")
            .or_else(|| value.get("id"))
            .and_then(Value::as_str)
            .filter(|id| !id.is_empty())
            .map(ToString::to_string)
    };

    match payload {
        Value::Array(items) => items.first().and_then(id_of),
        Value::Object(_) => id_of(payload).or_else(|| {
            payload
                .get("instances")
                .and_then(Value::as_array)
                .and_then(|instances| instances.first())
                .and_then(|instance| instance.get("vmId"))
                .and_then(Value::as_str)
                .map(ToString::to_string)
        }),
        _ => None,
    }
}
