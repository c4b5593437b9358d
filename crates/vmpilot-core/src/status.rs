use serde::{Deserialize, Serialize};
use std::fmt;

use crate::CoreError;

/// Status register of a single VM deployment.
///
/// The happy path is `Creating -> DownloadingModel -> ModelRunning`. Every
/// failure variant is terminal and can be entered from either non-terminal
/// state; nothing leaves a terminal state except deletion of the record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeploymentStatus {
    Creating,
    DownloadingModel,
    ModelRunning,
    DeploymentError,
    SshAuthFailed,
    SshConnectionError,
    ConnectionTimeout,
    NetworkError,
    SshConnectionFailed,
}

impl DeploymentStatus {
    pub const ALL: [DeploymentStatus; 9] = [
        DeploymentStatus::Creating,
        DeploymentStatus::DownloadingModel,
        DeploymentStatus::ModelRunning,
        DeploymentStatus::DeploymentError,
        DeploymentStatus::SshAuthFailed,
        DeploymentStatus::SshConnectionError,
        DeploymentStatus::ConnectionTimeout,
        DeploymentStatus::NetworkError,
        DeploymentStatus::SshConnectionFailed,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            DeploymentStatus::Creating => "creating",
            DeploymentStatus::DownloadingModel => "downloading_model",
            DeploymentStatus::ModelRunning => "model_running",
            DeploymentStatus::DeploymentError => "deployment_error",
            DeploymentStatus::SshAuthFailed => "ssh_auth_failed",
            DeploymentStatus::SshConnectionError => "ssh_connection_error",
            DeploymentStatus::ConnectionTimeout => "connection_timeout",
            DeploymentStatus::NetworkError => "network_error",
            DeploymentStatus::SshConnectionFailed => "ssh_connection_failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(
            self,
            DeploymentStatus::Creating | DeploymentStatus::DownloadingModel
        )
    }

    pub fn is_failure(&self) -> bool {
        self.is_terminal() && *self != DeploymentStatus::ModelRunning
    }

    /// Whether the status graph has an edge from `self` to `next`.
    pub fn can_transition_to(&self, next: DeploymentStatus) -> bool {
        match (self, next) {
            (DeploymentStatus::Creating, DeploymentStatus::DownloadingModel) => true,
            (DeploymentStatus::DownloadingModel, DeploymentStatus::ModelRunning) => true,
            (DeploymentStatus::Creating | DeploymentStatus::DownloadingModel, next) => {
                next.is_failure()
            }
            _ => false,
        }
    }

    /// The only way a status moves forward. Rejects edges that are not in
    /// the graph, including any edge out of a terminal status.
    pub fn transition(self, next: DeploymentStatus) -> Result<DeploymentStatus, CoreError> {
        if self.can_transition_to(next) {
            Ok(next)
        } else {
            Err(CoreError::InvalidTransition {
                from: self,
                to: next,
            })
        }
    }
}

impl fmt::Display for DeploymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
