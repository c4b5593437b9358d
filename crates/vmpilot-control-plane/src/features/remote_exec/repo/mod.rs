pub mod openssh;

use async_trait::async_trait;
use thiserror::Error;

pub use openssh::{OpenSshShell, SshSettings};

/// Failure of the remote execution channel, split by cause so callers can
/// report distinct terminal statuses.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RemoteExecError {
    #[error("SSH authentication failed: {0}")]
    Authentication(String),
    #[error("SSH connection error: {0}")]
    Transport(String),
    #[error("connection timed out: {0}")]
    ConnectTimeout(String),
    #[error("network error: {0}")]
    Network(String),
    #[error("remote execution failed: {0}")]
    Other(String),
}

pub type RemoteExecResult<T> = std::result::Result<T, RemoteExecError>;

/// Captured result of one remote command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }
}

/// Opens authenticated shell sessions to a host.
#[async_trait]
pub trait RemoteShell: Send + Sync {
    /// Open and immediately close a connection
    async fn probe(&self, host: &str) -> RemoteExecResult<()>;

    /// Open a session that stays up across several commands
    async fn connect(&self, host: &str) -> RemoteExecResult<Box<dyn ShellSession>>;
}

/// An open session. Dropping it without `close` must still release it.
#[async_trait]
pub trait ShellSession: Send + Sync {
    /// Run a command. A non-zero remote exit code is not an error.
    async fn exec(&self, command: &str) -> RemoteExecResult<CommandOutput>;

    async fn close(&self);
}

/// Map an ssh client diagnostic onto a failure category.
pub fn classify_ssh_failure(diagnostic: &str) -> RemoteExecError {
    let message = diagnostic.trim().to_string();
    let lower = message.to_ascii_lowercase();

    if lower.contains("permission denied")
        || lower.contains("authentication failed")
        || lower.contains("too many authentication failures")
    {
        RemoteExecError::Authentication(message)
    } else if lower.contains("connection timed out") || lower.contains("operation timed out") {
        RemoteExecError::ConnectTimeout(message)
    } else if lower.contains("connection refused")
        || lower.contains("no route to host")
        || lower.contains("network is unreachable")
        || lower.contains("could not resolve hostname")
    {
        RemoteExecError::Network(message)
    } else {
        RemoteExecError::Transport(message)
    }
}

/// Quote `value` for a POSIX shell.
pub fn shell_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', r"'\''"))
}
