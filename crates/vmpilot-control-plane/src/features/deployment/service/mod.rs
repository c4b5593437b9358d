pub mod pipeline;
pub mod poller;

use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::features::cloud_provider::repo::{CloudProvider, ProviderError};
use crate::features::observability::controller::ObservabilityController;
use crate::features::remote_exec::repo::{RemoteExecError, RemoteShell, ShellSession};
use crate::features::vm_registry::repo::VmRegistry;
use crate::shared::error::ControlPlaneError;
use crate::shared::types::{DeploymentStatus, VmRecord};

pub use pipeline::{ProvisioningPlan, INSTALL_UNZIP};
pub use poller::{PollBudget, PollTimeout, ReadinessPoller};

#[derive(Debug, Clone)]
pub struct DeploymentSettings {
    pub vm_ready: PollBudget,
    pub shell_ready: PollBudget,
    pub blob_store_url: String,
    pub remote_workdir: String,
}

impl Default for DeploymentSettings {
    fn default() -> Self {
        Self {
            vm_ready: PollBudget::new(Duration::from_secs(10), Duration::from_secs(300)),
            shell_ready: PollBudget::new(Duration::from_secs(15), Duration::from_secs(300)),
            blob_store_url: "https://aggregator.testnet.walrus.atalma.io".to_string(),
            remote_workdir: "/home/ubuntu".to_string(),
        }
    }
}

/// Everything a background deployment needs to know about its VM.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeploymentJob {
    pub identity: String,
    pub vm_id: String,
    pub blob_id: String,
}

impl From<&VmRecord> for DeploymentJob {
    fn from(record: &VmRecord) -> Self {
        Self {
            identity: record.identity.clone(),
            vm_id: record.vm_id.clone(),
            blob_id: record.blob_id.clone(),
        }
    }
}

#[derive(Debug, Error)]
pub enum DeploymentFailure {
    #[error("VM never became ready: {0}")]
    VmNotReady(PollTimeout),
    #[error("shell never became ready: {0}")]
    ShellNotReady(PollTimeout),
    #[error("no *.sh script found under {0}")]
    ScriptNotFound(String),
    #[error(transparent)]
    Remote(#[from] RemoteExecError),
    #[error("registry error: {0}")]
    Registry(#[from] ControlPlaneError),
    /// The record was deleted or now belongs to another VM.
    #[error("deployment superseded")]
    Superseded,
}

impl DeploymentFailure {
    /// Terminal status recorded for this failure.
    pub fn status(&self) -> DeploymentStatus {
        match self {
            DeploymentFailure::ShellNotReady(_) => DeploymentStatus::SshConnectionFailed,
            DeploymentFailure::Remote(RemoteExecError::Authentication(_)) => {
                DeploymentStatus::SshAuthFailed
            }
            DeploymentFailure::Remote(RemoteExecError::Transport(_)) => {
                DeploymentStatus::SshConnectionError
            }
            DeploymentFailure::Remote(RemoteExecError::ConnectTimeout(_)) => {
                DeploymentStatus::ConnectionTimeout
            }
            DeploymentFailure::Remote(RemoteExecError::Network(_)) => DeploymentStatus::NetworkError,
            DeploymentFailure::VmNotReady(_)
            | DeploymentFailure::ScriptNotFound(_)
            | DeploymentFailure::Remote(RemoteExecError::Other(_))
            | DeploymentFailure::Registry(_)
            | DeploymentFailure::Superseded => DeploymentStatus::DeploymentError,
        }
    }
}

/// Drives one VM from `creating` to a terminal status.
pub struct DeploymentOrchestrator {
    registry: Arc<dyn VmRegistry>,
    provider: Arc<dyn CloudProvider>,
    shell: Arc<dyn RemoteShell>,
    settings: DeploymentSettings,
    observability: Arc<ObservabilityController>,
}

impl DeploymentOrchestrator {
    pub fn new(
        registry: Arc<dyn VmRegistry>,
        provider: Arc<dyn CloudProvider>,
        shell: Arc<dyn RemoteShell>,
        settings: DeploymentSettings,
        observability: Arc<ObservabilityController>,
    ) -> Self {
        Self {
            registry,
            provider,
            shell,
            settings,
            observability,
        }
    }

    /// Run the deployment to completion and return the terminal status it
    /// wrote, or `None` if the record went away first.
    pub async fn run(&self, job: DeploymentJob) -> Option<DeploymentStatus> {
        info!(
            identity = %job.identity,
            vm_id = %job.vm_id,
            blob_id = %job.blob_id,
            "Starting deployment"
        );

        let target = match self.execute(&job).await {
            Ok(()) => DeploymentStatus::ModelRunning,
            Err(DeploymentFailure::Superseded) => {
                info!(identity = %job.identity, vm_id = %job.vm_id, "Deployment superseded, stopping");
                return None;
            }
            Err(failure) => {
                error!(
                    identity = %job.identity,
                    vm_id = %job.vm_id,
                    error = %failure,
                    "Deployment failed"
                );
                failure.status()
            }
        };

        match self.advance(&job, target).await {
            Ok(status) => {
                self.observability.record_deployment_outcome(status);
                info!(identity = %job.identity, vm_id = %job.vm_id, %status, "Deployment finished");
                Some(status)
            }
            Err(DeploymentFailure::Superseded) => {
                info!(identity = %job.identity, vm_id = %job.vm_id, "Deployment superseded, stopping");
                None
            }
            Err(failure) => {
                error!(
                    identity = %job.identity,
                    vm_id = %job.vm_id,
                    error = %failure,
                    "Failed to record final deployment status"
                );
                None
            }
        }
    }

    async fn execute(&self, job: &DeploymentJob) -> Result<(), DeploymentFailure> {
        let host = self.wait_for_vm(job).await?;
        info!(vm_id = %job.vm_id, %host, "VM is active");

        self.advance(job, DeploymentStatus::DownloadingModel).await?;
        self.wait_for_shell(&host).await?;
        info!(vm_id = %job.vm_id, %host, "Shell is reachable");

        let session = self.shell.connect(&host).await?;
        let result = self.run_pipeline(session.as_ref(), job).await;
        session.close().await;
        result
    }

    async fn advance(
        &self,
        job: &DeploymentJob,
        next: DeploymentStatus,
    ) -> Result<DeploymentStatus, DeploymentFailure> {
        self.registry
            .transition_status(&job.identity, &job.vm_id, next)
            .await?
            .ok_or(DeploymentFailure::Superseded)
    }

    async fn wait_for_vm(&self, job: &DeploymentJob) -> Result<String, DeploymentFailure> {
        let poller = ReadinessPoller::new("vm", self.settings.vm_ready);
        let provider = &self.provider;
        let vm_id = job.vm_id.as_str();
        let started = Instant::now();

        let outcome = poller
            .poll_until(move |_| async move {
                let instances = provider.describe_instance(vm_id).await?;
                Ok::<_, ProviderError>(
                    instances
                        .first()
                        .filter(|instance| instance.is_ready())
                        .and_then(|instance| instance.public_address())
                        .map(ToString::to_string),
                )
            })
            .await;

        self.observability
            .record_readiness_wait("vm", outcome.is_ok(), started.elapsed());
        outcome.map_err(DeploymentFailure::VmNotReady)
    }

    async fn wait_for_shell(&self, host: &str) -> Result<(), DeploymentFailure> {
        let poller = ReadinessPoller::new("shell", self.settings.shell_ready);
        let shell = &self.shell;
        let started = Instant::now();

        let outcome = poller
            .poll_until(move |_| async move { shell.probe(host).await.map(Some) })
            .await;

        self.observability
            .record_readiness_wait("shell", outcome.is_ok(), started.elapsed());
        outcome.map_err(DeploymentFailure::ShellNotReady)
    }

    async fn run_pipeline(
        &self,
        session: &dyn ShellSession,
        job: &DeploymentJob,
    ) -> Result<(), DeploymentFailure> {
        let plan = ProvisioningPlan::new(
            &self.settings.blob_store_url,
            &self.settings.remote_workdir,
            &job.blob_id,
        );

        run_step(session, job, "download", &plan.download()).await?;
        run_step(session, job, "install_unzip", INSTALL_UNZIP).await?;
        run_step(session, job, "extract", &plan.extract()).await?;

        let listing = run_step(session, job, "find_script", &plan.find_scripts()).await?;
        let scripts = pipeline::listed_scripts(&listing);
        let script = match scripts.as_slice() {
            [] => return Err(DeploymentFailure::ScriptNotFound(plan.extract_dir)),
            [only] => *only,
            [first, ..] => {
                warn!(
                    vm_id = %job.vm_id,
                    count = scripts.len(),
                    chosen = %first,
                    "Several scripts found, running the first"
                );
                *first
            }
        };

        run_step(session, job, "chmod", &ProvisioningPlan::make_executable(script)).await?;
        run_step(session, job, "run_script", &ProvisioningPlan::run_script(script)).await?;
        Ok(())
    }
}

/// Run one pipeline command and log what it produced. Only channel failures
/// are errors; the remote exit code is reported, not acted on.
async fn run_step(
    session: &dyn ShellSession,
    job: &DeploymentJob,
    step: &'static str,
    command: &str,
) -> Result<String, DeploymentFailure> {
    info!(vm_id = %job.vm_id, step, "Running provisioning step");
    let output = session.exec(command).await?;

    if !output.stdout.trim().is_empty() {
        debug!(vm_id = %job.vm_id, step, stdout = %output.stdout.trim(), "Step output");
    }
    if !output.stderr.trim().is_empty() {
        warn!(vm_id = %job.vm_id, step, stderr = %output.stderr.trim(), "Step error output");
    }
    if !output.success() {
        warn!(vm_id = %job.vm_id, step, exit_code = ?output.exit_code, "Step exited unsuccessfully");
    }
    Ok(output.stdout)
}
