use crate::shared::error::{ControlPlaneError, ControlPlaneResult};
use crate::shared::types::{DeploymentStatus, VmRecord};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, RwLock};

/// Identity-to-VM registry. At most one record (or pending reservation)
/// exists per identity.
#[async_trait]
pub trait VmRegistry: Send + Sync {
    /// Claim `identity` for a new VM. Returns `false` when the identity
    /// already owns a record or has a creation in flight.
    async fn try_reserve(&self, identity: &str) -> ControlPlaneResult<bool>;

    /// Store the record for a previously reserved identity
    async fn commit(&self, record: VmRecord) -> ControlPlaneResult<()>;

    /// Drop a reservation that never turned into a record
    async fn release(&self, identity: &str) -> ControlPlaneResult<()>;

    /// Retrieve the record for an identity
    async fn get(&self, identity: &str) -> ControlPlaneResult<Option<VmRecord>>;

    /// Remove the record only if it still points at `expected_vm_id`
    async fn remove(&self, identity: &str, expected_vm_id: &str) -> ControlPlaneResult<bool>;

    /// Move the status of `identity`'s record forward.
    ///
    /// Returns `Ok(None)` when the record is gone or now belongs to a
    /// different VM, so a stale deployment never touches a newer record.
    async fn transition_status(
        &self,
        identity: &str,
        vm_id: &str,
        next: DeploymentStatus,
    ) -> ControlPlaneResult<Option<DeploymentStatus>>;

    /// Number of committed records
    async fn count(&self) -> ControlPlaneResult<usize>;
}

#[derive(Default)]
struct RegistryState {
    records: HashMap<String, VmRecord>,
    reserved: HashSet<String>,
}

/// Process-local registry. Empty at start, lost on exit.
#[derive(Clone)]
pub struct InMemoryVmRegistry {
    state: Arc<RwLock<RegistryState>>,
}

impl InMemoryVmRegistry {
    pub fn new() -> Self {
        Self {
            state: Arc::new(RwLock::new(RegistryState::default())),
        }
    }
}

impl Default for InMemoryVmRegistry {
    fn default() -> Self {
        Self::new()
    }
}

fn poisoned<T>(_: T) -> ControlPlaneError {
    ControlPlaneError::StorageError("Lock poisoned".to_string())
}

#[async_trait]
impl VmRegistry for InMemoryVmRegistry {
    async fn try_reserve(&self, identity: &str) -> ControlPlaneResult<bool> {
        let mut state = self.state.write().map_err(poisoned)?;
        if state.records.contains_key(identity) || state.reserved.contains(identity) {
            return Ok(false);
        }
        state.reserved.insert(identity.to_string());
        Ok(true)
    }

    async fn commit(&self, record: VmRecord) -> ControlPlaneResult<()> {
        let mut state = self.state.write().map_err(poisoned)?;
        if !state.reserved.remove(&record.identity) {
            return Err(ControlPlaneError::StorageError(format!(
                "identity {} was not reserved",
                record.identity
            )));
        }
        state.records.insert(record.identity.clone(), record);
        Ok(())
    }

    async fn release(&self, identity: &str) -> ControlPlaneResult<()> {
        let mut state = self.state.write().map_err(poisoned)?;
        state.reserved.remove(identity);
        Ok(())
    }

    async fn get(&self, identity: &str) -> ControlPlaneResult<Option<VmRecord>> {
        let state = self.state.read().map_err(poisoned)?;
        Ok(state.records.get(identity).cloned())
    }

    async fn remove(&self, identity: &str, expected_vm_id: &str) -> ControlPlaneResult<bool> {
        let mut state = self.state.write().map_err(poisoned)?;
        match state.records.get(identity) {
            Some(record) if record.vm_id == expected_vm_id => {
                state.records.remove(identity);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn transition_status(
        &self,
        identity: &str,
        vm_id: &str,
        next: DeploymentStatus,
    ) -> ControlPlaneResult<Option<DeploymentStatus>> {
        let mut state = self.state.write().map_err(poisoned)?;
        let Some(record) = state.records.get_mut(identity) else {
            return Ok(None);
        };
        if record.vm_id != vm_id {
            return Ok(None);
        }
        record.status = record.status.transition(next)?;
        Ok(Some(record.status))
    }

    async fn count(&self) -> ControlPlaneResult<usize> {
        let state = self.state.read().map_err(poisoned)?;
        Ok(state.records.len())
    }
}
