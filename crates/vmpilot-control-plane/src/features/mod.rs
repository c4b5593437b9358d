pub mod cloud_provider;
pub mod deployment;
pub mod observability;
pub mod remote_exec;
pub mod vm_management;
pub mod vm_registry;
