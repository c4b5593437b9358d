use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex};
use tokio::task::JoinHandle;
use tracing::debug;

use crate::shared::error::{ControlPlaneError, ControlPlaneResult};

/// Handle of a running background deployment.
#[derive(Debug)]
pub struct TrackedDeployment {
    pub vm_id: String,
    pub handle: JoinHandle<()>,
}

/// Background deployments keyed by identity. Entries remove themselves when
/// their task completes.
#[derive(Clone, Default)]
pub struct DeploymentTracker {
    tasks: Arc<Mutex<HashMap<String, TrackedDeployment>>>,
}

fn poisoned<T>(_: T) -> ControlPlaneError {
    ControlPlaneError::StorageError("Lock poisoned".to_string())
}

impl DeploymentTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Spawn `task` and track it under `identity`.
    pub fn spawn<F>(&self, identity: &str, vm_id: &str, task: F) -> ControlPlaneResult<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        // Held across the spawn so the task cannot finish before it is tracked.
        let mut tasks = self.tasks.lock().map_err(poisoned)?;

        let tracker = self.clone();
        let (task_identity, task_vm_id) = (identity.to_string(), vm_id.to_string());
        let handle = tokio::spawn(async move {
            task.await;
            tracker.finish(&task_identity, &task_vm_id);
        });

        let previous = tasks.insert(
            identity.to_string(),
            TrackedDeployment {
                vm_id: vm_id.to_string(),
                handle,
            },
        );
        if let Some(previous) = previous {
            debug!(%identity, vm_id = %previous.vm_id, "Detached earlier deployment handle");
        }
        Ok(())
    }

    /// Stop tracking the deployment of `vm_id` and hand back its handle.
    pub fn take(&self, identity: &str, vm_id: &str) -> ControlPlaneResult<Option<TrackedDeployment>> {
        let mut tasks = self.tasks.lock().map_err(poisoned)?;
        match tasks.get(identity) {
            Some(tracked) if tracked.vm_id == vm_id => Ok(tasks.remove(identity)),
            _ => Ok(None),
        }
    }

    pub fn in_flight(&self) -> ControlPlaneResult<usize> {
        Ok(self.tasks.lock().map_err(poisoned)?.len())
    }

    fn finish(&self, identity: &str, vm_id: &str) {
        if let Ok(mut tasks) = self.tasks.lock() {
            if tasks.get(identity).is_some_and(|tracked| tracked.vm_id == vm_id) {
                tasks.remove(identity);
            }
        }
    }
}
