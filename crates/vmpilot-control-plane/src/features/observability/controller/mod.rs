use crate::features::observability::repo::ObservabilityRepository;
use crate::features::observability::service::ObservabilityService;
use crate::shared::types::DeploymentStatus;
use std::sync::Arc;
use std::time::Duration;

pub struct ObservabilityController {
    service: ObservabilityService,
}

impl ObservabilityController {
    pub fn new(service: ObservabilityService) -> Self {
        Self { service }
    }

    /// Controller over a fresh metrics registry
    pub fn with_new_registry() -> Result<Self, String> {
        let repo = Arc::new(ObservabilityRepository::new()?);
        Ok(Self::new(ObservabilityService::new(repo)))
    }

    pub fn record_api_request(&self, endpoint: &str, status: u16, elapsed: Duration) {
        self.service.record_api_request(endpoint, status, elapsed);
    }

    pub fn set_tracked_vms(&self, count: usize) {
        self.service.set_tracked_vms(count);
    }

    pub fn record_deployment_outcome(&self, status: DeploymentStatus) {
        self.service.record_deployment_outcome(status);
    }

    pub fn record_readiness_wait(&self, phase: &str, ready: bool, waited: Duration) {
        self.service.record_readiness_wait(phase, ready, waited);
    }

    pub fn render_metrics(&self) -> Result<String, String> {
        self.service.render_metrics()
    }
}
