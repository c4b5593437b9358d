pub use vmpilot_core::{
    CreateVmRequest, CreateVmResponse, DeleteVmRequest, DeleteVmResponse, DeploymentStatus,
    HealthResponse, VmIdResponse, VmRecord,
};
