use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

use crate::features::cloud_provider::repo::MachineResources;
use crate::features::deployment::service::{DeploymentSettings, PollBudget};
use crate::features::remote_exec::repo::SshSettings;
use crate::features::vm_management::service::MachineTemplate;

pub const DEFAULT_OS_IMAGE: &str =
    "https://cloud-images.ubuntu.com/releases/22.04/release/ubuntu-22.04-server-cloudimg-amd64.img";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required environment variable {0}")]
    Missing(&'static str),
    #[error("invalid value {value:?} for {key}: {reason}")]
    Invalid {
        key: &'static str,
        value: String,
        reason: String,
    },
    #[error("failed to read public key {path}: {source}")]
    PublicKey {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("public key file {0} is empty")]
    EmptyPublicKey(PathBuf),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MachineConfig {
    pub cpu: u32,
    pub memory: String,
    pub storage: String,
    pub os_image: String,
    pub app_port: u16,
}

/// Process configuration, read once at startup.
#[derive(Clone)]
pub struct ControlPlaneConfig {
    pub listen_addr: SocketAddr,
    pub fluence_api_url: String,
    pub fluence_api_key: String,
    pub ssh_user: String,
    pub ssh_private_key_path: PathBuf,
    pub ssh_public_key_path: PathBuf,
    pub blob_store_url: String,
    pub remote_workdir: String,
    pub machine: MachineConfig,
    pub vm_ready: PollBudget,
    pub shell_ready: PollBudget,
    pub abort_deployment_on_delete: bool,
}

impl ControlPlaneConfig {
    /// Read configuration from the environment, after loading `.env` if one
    /// is present.
    pub fn from_env() -> Result<Self, ConfigError> {
        let _ = dotenvy::dotenv();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());
        let string_or = |key: &str, default: &str| var(key).unwrap_or_else(|| default.to_string());

        let fluence_api_key = var("FLUENCE_API_KEY").ok_or(ConfigError::Missing("FLUENCE_API_KEY"))?;

        let defaults = DeploymentSettings::default();
        let vm_ready = PollBudget::new(
            parse_secs(&var, "VM_READY_INTERVAL_SECS", defaults.vm_ready.interval)?,
            parse_secs(&var, "VM_READY_TIMEOUT_SECS", defaults.vm_ready.timeout)?,
        );
        let shell_ready = PollBudget::new(
            parse_secs(&var, "SHELL_READY_INTERVAL_SECS", defaults.shell_ready.interval)?,
            parse_secs(&var, "SHELL_READY_TIMEOUT_SECS", defaults.shell_ready.timeout)?,
        );

        Ok(Self {
            listen_addr: parse_or(&var, "LISTEN_ADDR", SocketAddr::from(([0, 0, 0, 0], 8000)))?,
            fluence_api_url: string_or("FLUENCE_API_URL", "https://api.fluence.dev"),
            fluence_api_key,
            ssh_user: string_or("SSH_USER", "ubuntu"),
            ssh_private_key_path: PathBuf::from(string_or("SSH_PRIVATE_KEY_PATH", "./mykey")),
            ssh_public_key_path: PathBuf::from(string_or("SSH_PUBLIC_KEY_PATH", "./mykey.pub")),
            blob_store_url: string_or("BLOB_STORE_URL", &defaults.blob_store_url),
            remote_workdir: string_or("REMOTE_WORKDIR", &defaults.remote_workdir),
            machine: MachineConfig {
                cpu: parse_or(&var, "VM_CPU", 2)?,
                memory: string_or("VM_MEMORY", "4Gi"),
                storage: string_or("VM_STORAGE", "25Gi"),
                os_image: string_or("VM_OS_IMAGE", DEFAULT_OS_IMAGE),
                app_port: parse_or(&var, "VM_APP_PORT", 8000)?,
            },
            vm_ready,
            shell_ready,
            abort_deployment_on_delete: parse_or(&var, "ABORT_DEPLOYMENT_ON_DELETE", false)?,
        })
    }

    pub fn deployment_settings(&self) -> DeploymentSettings {
        DeploymentSettings {
            vm_ready: self.vm_ready,
            shell_ready: self.shell_ready,
            blob_store_url: self.blob_store_url.clone(),
            remote_workdir: self.remote_workdir.clone(),
        }
    }

    pub fn ssh_settings(&self) -> SshSettings {
        SshSettings::new(self.ssh_user.clone(), self.ssh_private_key_path.clone())
    }

    pub fn machine_template(&self, ssh_public_key: String) -> MachineTemplate {
        MachineTemplate {
            os_image: self.machine.os_image.clone(),
            resources: MachineResources {
                cpu: self.machine.cpu,
                memory: self.machine.memory.clone(),
                storage: self.machine.storage.clone(),
            },
            app_port: self.machine.app_port,
            ssh_public_key,
        }
    }

    /// Public key injected into every new VM
    pub fn read_public_key(&self) -> Result<String, ConfigError> {
        read_public_key(&self.ssh_public_key_path)
    }
}

pub fn read_public_key(path: &Path) -> Result<String, ConfigError> {
    let key = std::fs::read_to_string(path).map_err(|source| ConfigError::PublicKey {
        path: path.to_path_buf(),
        source,
    })?;
    let key = key.trim();
    if key.is_empty() {
        return Err(ConfigError::EmptyPublicKey(path.to_path_buf()));
    }
    Ok(key.to_string())
}

fn parse_or<T, F>(var: &F, key: &'static str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    F: Fn(&str) -> Option<String>,
{
    match var(key) {
        None => Ok(default),
        Some(value) => value.trim().parse().map_err(|e: T::Err| ConfigError::Invalid {
            key,
            reason: e.to_string(),
            value,
        }),
    }
}

fn parse_secs<F>(var: &F, key: &'static str, default: Duration) -> Result<Duration, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let secs: u64 = parse_or(var, key, default.as_secs())?;
    if secs == 0 {
        return Err(ConfigError::Invalid {
            key,
            value: secs.to_string(),
            reason: "must be at least 1 second".to_string(),
        });
    }
    Ok(Duration::from_secs(secs))
}
