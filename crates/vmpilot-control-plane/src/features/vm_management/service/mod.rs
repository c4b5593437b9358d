use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::features::cloud_provider::repo::{
    CloudProvider, InstanceDescriptor, MachineResources, MachineSpec, OpenPort,
};
use crate::features::deployment::controller::DeploymentController;
use crate::features::deployment::service::DeploymentJob;
use crate::features::observability::controller::ObservabilityController;
use crate::features::vm_registry::repo::VmRegistry;
use crate::shared::error::{ControlPlaneError, ControlPlaneResult};
use crate::shared::types::{
    CreateVmRequest, CreateVmResponse, DeleteVmResponse, DeploymentStatus, VmIdResponse, VmRecord,
};

/// Machine shape used for every VM the control plane creates.
#[derive(Debug, Clone)]
pub struct MachineTemplate {
    pub os_image: String,
    pub resources: MachineResources,
    pub app_port: u16,
    /// Key the control plane itself logs in with
    pub ssh_public_key: String,
}

impl MachineTemplate {
    pub fn spec_for(&self, now: DateTime<Utc>) -> MachineSpec {
        MachineSpec {
            name: format!("ai-vm-{}", now.format("%Y%m%d%H%M%S")),
            os_image: self.os_image.clone(),
            resources: self.resources.clone(),
            ssh_keys: vec![self.ssh_public_key.clone()],
            open_ports: vec![
                OpenPort::tcp(22, "SSH access"),
                OpenPort::tcp(self.app_port, "App HTTP"),
            ],
        }
    }
}

/// Service for the VM lifecycle of an identity
pub struct VmManagementService {
    registry: Arc<dyn VmRegistry>,
    provider: Arc<dyn CloudProvider>,
    deployments: Arc<DeploymentController>,
    template: MachineTemplate,
    observability: Arc<ObservabilityController>,
}

impl VmManagementService {
    pub fn new(
        registry: Arc<dyn VmRegistry>,
        provider: Arc<dyn CloudProvider>,
        deployments: Arc<DeploymentController>,
        template: MachineTemplate,
        observability: Arc<ObservabilityController>,
    ) -> Self {
        Self {
            registry,
            provider,
            deployments,
            template,
            observability,
        }
    }

    /// Create the identity's VM and start deploying onto it
    pub async fn create_vm(&self, request: CreateVmRequest) -> ControlPlaneResult<CreateVmResponse> {
        // Validation
        vmpilot_core::validate_identity(&request.identity)?;
        vmpilot_core::validate_blob_id(&request.blob_id)?;

        if !self.registry.try_reserve(&request.identity).await? {
            warn!(identity = %request.identity, "Identity already owns a VM");
            return Err(ControlPlaneError::VmAlreadyExists(request.identity));
        }

        let spec = self.template.spec_for(Utc::now());
        let vm_id = match self.provider.create_instance(&spec).await {
            Ok(vm_id) => vm_id,
            Err(err) => {
                error!(identity = %request.identity, error = %err, "VM creation failed");
                if let Err(release_err) = self.registry.release(&request.identity).await {
                    warn!(identity = %request.identity, error = %release_err, "Failed to release reservation");
                }
                return Err(err.into());
            }
        };

        let record = VmRecord::new(request.identity, vm_id, request.blob_id);
        self.registry.commit(record.clone()).await?;
        info!(identity = %record.identity, vm_id = %record.vm_id, vm_name = %spec.name, "VM created");

        self.deployments.launch(DeploymentJob::from(&record))?;
        self.refresh_tracked_vms().await;

        Ok(CreateVmResponse {
            vm_id: record.vm_id,
            identity: record.identity,
            blob_id: record.blob_id,
            status: DeploymentStatus::Creating,
            message: "VM created, deploying model...".to_string(),
        })
    }

    /// Delete `vm_id` on behalf of `identity`
    pub async fn delete_vm(&self, vm_id: &str, identity: &str) -> ControlPlaneResult<DeleteVmResponse> {
        // Validation
        vmpilot_core::validate_identity(identity)?;

        let record = self
            .registry
            .get(identity)
            .await?
            .ok_or_else(|| ControlPlaneError::VmNotFound("No VM found for this user".to_string()))?;
        if record.vm_id != vm_id {
            return Err(ControlPlaneError::VmNotFound(
                "VM not found for this user".to_string(),
            ));
        }

        self.provider.delete_instance(vm_id).await.map_err(|err| {
            error!(%vm_id, error = %err, "VM deletion failed");
            ControlPlaneError::Upstream(err.to_string())
        })?;

        if !self.registry.remove(identity, vm_id).await? {
            warn!(%identity, %vm_id, "Record changed while the VM was being deleted");
        }
        self.deployments.release(identity, vm_id)?;
        self.refresh_tracked_vms().await;

        info!(%identity, %vm_id, "VM deleted");

        Ok(DeleteVmResponse {
            message: "VM deleted".to_string(),
            vm_id: vm_id.to_string(),
        })
    }

    /// Provider-side view of a VM
    pub async fn vm_detail(&self, vm_id: &str) -> ControlPlaneResult<Vec<InstanceDescriptor>> {
        if vm_id.trim().is_empty() {
            return Err(ControlPlaneError::ValidationError(
                "VM ID cannot be empty".to_string(),
            ));
        }

        let instances = self.provider.describe_instance(vm_id).await?;
        if instances.is_empty() {
            return Err(ControlPlaneError::VmNotFound("VM not found".to_string()));
        }
        Ok(instances)
    }

    pub async fn vm_id_for(&self, identity: &str) -> ControlPlaneResult<VmIdResponse> {
        let record = self.record_for(identity).await?;
        Ok(VmIdResponse {
            identity: record.identity,
            vm_id: record.vm_id,
        })
    }

    /// Full record, including the deployment status
    pub async fn record_for(&self, identity: &str) -> ControlPlaneResult<VmRecord> {
        self.registry.get(identity).await?.ok_or_else(|| {
            ControlPlaneError::VmNotFound("No VM found for this public key".to_string())
        })
    }

    pub async fn active_vm_count(&self) -> ControlPlaneResult<usize> {
        self.registry.count().await
    }

    async fn refresh_tracked_vms(&self) {
        match self.registry.count().await {
            Ok(count) => self.observability.set_tracked_vms(count),
            Err(err) => warn!(error = %err, "Failed to count tracked VMs"),
        }
    }
}
