use crate::features::observability::repo::ObservabilityRepository;
use crate::shared::types::DeploymentStatus;
use std::sync::Arc;
use std::time::Duration;

pub struct ObservabilityService {
    repo: Arc<ObservabilityRepository>,
}

impl ObservabilityService {
    pub fn new(repo: Arc<ObservabilityRepository>) -> Self {
        Self { repo }
    }

    pub fn record_api_request(&self, endpoint: &str, status: u16, elapsed: Duration) {
        self.repo
            .observe_api_request(endpoint, &status.to_string(), elapsed.as_secs_f64());
    }

    pub fn set_tracked_vms(&self, count: usize) {
        self.repo.set_tracked_vm_count(count as f64);
    }

    pub fn record_deployment_outcome(&self, status: DeploymentStatus) {
        self.repo.inc_deployment_outcome(status.as_str());
    }

    pub fn record_readiness_wait(&self, phase: &str, ready: bool, waited: Duration) {
        let outcome = if ready { "ready" } else { "timeout" };
        self.repo
            .observe_readiness_wait(phase, outcome, waited.as_secs_f64());
    }

    pub fn render_metrics(&self) -> Result<String, String> {
        self.repo.render_metrics()
    }
}
