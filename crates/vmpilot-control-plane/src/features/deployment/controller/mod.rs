use std::sync::Arc;
use tracing::{debug, info};

use crate::features::deployment::repo::DeploymentTracker;
use crate::features::deployment::service::{DeploymentJob, DeploymentOrchestrator};
use crate::shared::error::ControlPlaneResult;

/// Launches deployments off the request path and decides what happens to
/// them when their VM is deleted.
pub struct DeploymentController {
    orchestrator: Arc<DeploymentOrchestrator>,
    tracker: DeploymentTracker,
    abort_on_delete: bool,
}

impl DeploymentController {
    pub fn new(orchestrator: Arc<DeploymentOrchestrator>, abort_on_delete: bool) -> Self {
        Self {
            orchestrator,
            tracker: DeploymentTracker::new(),
            abort_on_delete,
        }
    }

    pub fn launch(&self, job: DeploymentJob) -> ControlPlaneResult<()> {
        info!(identity = %job.identity, vm_id = %job.vm_id, "Launching background deployment");
        let orchestrator = Arc::clone(&self.orchestrator);
        let (identity, vm_id) = (job.identity.clone(), job.vm_id.clone());
        self.tracker.spawn(&identity, &vm_id, async move {
            orchestrator.run(job).await;
        })
    }

    /// Called once `vm_id` has been deleted.
    ///
    /// Without abort-on-delete the task is detached; it stops at its next
    /// status write because the record is gone.
    pub fn release(&self, identity: &str, vm_id: &str) -> ControlPlaneResult<()> {
        let Some(tracked) = self.tracker.take(identity, vm_id)? else {
            return Ok(());
        };
        if self.abort_on_delete {
            tracked.handle.abort();
            info!(%identity, %vm_id, "Aborted in-flight deployment");
        } else {
            debug!(%identity, %vm_id, "Detached in-flight deployment");
        }
        Ok(())
    }

    pub fn in_flight(&self) -> ControlPlaneResult<usize> {
        self.tracker.in_flight()
    }

    #[cfg(test)]
    pub(crate) fn tracker(&self) -> &DeploymentTracker {
        &self.tracker
    }
}
