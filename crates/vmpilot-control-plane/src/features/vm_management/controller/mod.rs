use crate::features::cloud_provider::repo::InstanceDescriptor;
use crate::features::vm_management::service::VmManagementService;
use crate::shared::error::ControlPlaneResult;
use crate::shared::types::{
    CreateVmRequest, CreateVmResponse, DeleteVmRequest, DeleteVmResponse, HealthResponse,
    VmIdResponse, VmRecord,
};
use std::sync::Arc;
use tracing::info;

/// Controller for VM lifecycle API endpoints
pub struct VmController {
    service: Arc<VmManagementService>,
}

impl VmController {
    pub fn new(service: Arc<VmManagementService>) -> Self {
        Self { service }
    }

    /// Handle create VM request
    /// Thin wrapper that delegates to service
    pub async fn create_vm(&self, request: CreateVmRequest) -> ControlPlaneResult<CreateVmResponse> {
        info!(blob_id = %request.blob_id, "Received create VM request");
        self.service.create_vm(request).await
    }

    /// Handle delete VM request
    pub async fn delete_vm(
        &self,
        vm_id: &str,
        request: DeleteVmRequest,
    ) -> ControlPlaneResult<DeleteVmResponse> {
        info!(%vm_id, "Received delete VM request");
        self.service.delete_vm(vm_id, &request.identity).await
    }

    pub async fn vm_detail(&self, vm_id: &str) -> ControlPlaneResult<Vec<InstanceDescriptor>> {
        info!(%vm_id, "Received VM detail request");
        self.service.vm_detail(vm_id).await
    }

    pub async fn vm_id_for(&self, identity: &str) -> ControlPlaneResult<VmIdResponse> {
        info!("Received VM id lookup request");
        self.service.vm_id_for(identity).await
    }

    pub async fn vm_status(&self, identity: &str) -> ControlPlaneResult<VmRecord> {
        info!("Received VM status request");
        self.service.record_for(identity).await
    }

    pub async fn health(&self) -> ControlPlaneResult<HealthResponse> {
        Ok(HealthResponse {
            status: "healthy".to_string(),
            active_vms: self.service.active_vm_count().await?,
        })
    }
}
