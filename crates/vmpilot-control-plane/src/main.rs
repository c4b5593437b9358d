use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{EnvFilter, FmtSubscriber};
use vmpilot_control_plane::config::ControlPlaneConfig;
use vmpilot_control_plane::features::cloud_provider::repo::FluenceCloudProvider;
use vmpilot_control_plane::features::deployment::controller::DeploymentController;
use vmpilot_control_plane::features::deployment::service::DeploymentOrchestrator;
use vmpilot_control_plane::features::observability::controller::ObservabilityController;
use vmpilot_control_plane::features::remote_exec::repo::OpenSshShell;
use vmpilot_control_plane::features::vm_management::controller::VmController;
use vmpilot_control_plane::features::vm_management::service::VmManagementService;
use vmpilot_control_plane::features::vm_registry::repo::InMemoryVmRegistry;
use vmpilot_control_plane::server::ControlPlaneServer;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = ControlPlaneConfig::from_env()?;

    let subscriber = FmtSubscriber::builder()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("vmpilot_control_plane=info,info")),
        )
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    info!("Starting vmpilot Control Plane");

    let ssh_public_key = config.read_public_key()?;
    let observability = Arc::new(ObservabilityController::with_new_registry()?);
    let registry = Arc::new(InMemoryVmRegistry::new());
    let provider = Arc::new(FluenceCloudProvider::new(
        config.fluence_api_url.clone(),
        config.fluence_api_key.clone(),
    )?);
    let shell = Arc::new(OpenSshShell::new(config.ssh_settings()));

    let orchestrator = Arc::new(DeploymentOrchestrator::new(
        registry.clone(),
        provider.clone(),
        shell,
        config.deployment_settings(),
        observability.clone(),
    ));
    let deployments = Arc::new(DeploymentController::new(
        orchestrator,
        config.abort_deployment_on_delete,
    ));
    let service = Arc::new(VmManagementService::new(
        registry,
        provider,
        deployments,
        config.machine_template(ssh_public_key),
        observability.clone(),
    ));
    let app = ControlPlaneServer::new(Arc::new(VmController::new(service)), observability).router();

    let listener = tokio::net::TcpListener::bind(config.listen_addr).await?;
    info!(
        listen_addr = %config.listen_addr,
        provider = %config.fluence_api_url,
        ssh_user = %config.ssh_user,
        "Control Plane initialized successfully"
    );

    axum::serve(listener, app).await?;

    Ok(())
}
