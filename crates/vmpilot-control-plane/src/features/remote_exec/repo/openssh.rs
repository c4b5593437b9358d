use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::{Output, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::{debug, warn};

use super::{
    classify_ssh_failure, CommandOutput, RemoteExecError, RemoteExecResult, RemoteShell,
    ShellSession,
};

/// Exit code the OpenSSH client uses for its own failures.
const SSH_CLIENT_ERROR: i32 = 255;

/// Printed after every remote command with its exit status, so a remote 255
/// is not mistaken for a client failure.
const STATUS_MARKER: &str = "__vmpilot_rc=";

#[derive(Debug, Clone)]
pub struct SshSettings {
    pub user: String,
    pub private_key_path: PathBuf,
    pub probe_timeout: Duration,
    pub connect_timeout: Duration,
    /// Where control sockets and master logs are created
    pub runtime_dir: PathBuf,
}

impl SshSettings {
    pub fn new(user: impl Into<String>, private_key_path: impl Into<PathBuf>) -> Self {
        Self {
            user: user.into(),
            private_key_path: private_key_path.into(),
            probe_timeout: Duration::from_secs(10),
            connect_timeout: Duration::from_secs(30),
            runtime_dir: std::env::temp_dir(),
        }
    }
}

/// Remote execution channel backed by the system `ssh` client.
///
/// A session is an OpenSSH control master; every command of the session is
/// multiplexed over the master's connection.
#[derive(Debug, Clone)]
pub struct OpenSshShell {
    settings: SshSettings,
    program: String,
}

impl OpenSshShell {
    pub fn new(settings: SshSettings) -> Self {
        Self {
            settings,
            program: "ssh".to_string(),
        }
    }

    /// Use a different client binary
    pub fn with_program(mut self, program: impl Into<String>) -> Self {
        self.program = program.into();
        self
    }

    fn base_args(&self, connect_timeout: Duration) -> Vec<String> {
        vec![
            "-i".to_string(),
            self.settings.private_key_path.display().to_string(),
            "-l".to_string(),
            self.settings.user.clone(),
            "-o".to_string(),
            "BatchMode=yes".to_string(),
            "-o".to_string(),
            "StrictHostKeyChecking=no".to_string(),
            "-o".to_string(),
            "UserKnownHostsFile=/dev/null".to_string(),
            "-o".to_string(),
            "LogLevel=ERROR".to_string(),
            "-o".to_string(),
            format!("ConnectTimeout={}", connect_timeout.as_secs().max(1)),
        ]
    }
}

async fn run(program: &str, args: &[String], capture: bool) -> RemoteExecResult<Output> {
    let spawn_error = |e: std::io::Error| {
        RemoteExecError::Other(format!("failed to spawn {program}: {e}"))
    };

    let mut command = tokio::process::Command::new(program);
    command.args(args).stdin(Stdio::null()).kill_on_drop(true);

    if capture {
        return command.output().await.map_err(spawn_error);
    }

    let status = command
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
        .map_err(spawn_error)?
        .wait()
        .await
        .map_err(spawn_error)?;
    Ok(Output {
        status,
        stdout: Vec::new(),
        stderr: Vec::new(),
    })
}

/// Run `command` in a subshell and append its exit status to stdout.
fn with_status_trailer(command: &str) -> String {
    format!("( {command}\n); printf '\\n{STATUS_MARKER}%d\\n' \"$?\"")
}

/// Split the trailer added by [`with_status_trailer`] off `stdout`.
fn split_status_trailer(stdout: &str) -> Option<(String, i32)> {
    let idx = stdout.rfind(STATUS_MARKER)?;
    let code = stdout[idx + STATUS_MARKER.len()..].trim().parse().ok()?;
    let body = &stdout[..idx];
    Some((body.strip_suffix('\n').unwrap_or(body).to_string(), code))
}

fn failure_from_output(output: &Output) -> Option<RemoteExecError> {
    (output.status.code() == Some(SSH_CLIENT_ERROR))
        .then(|| classify_ssh_failure(&String::from_utf8_lossy(&output.stderr)))
}

#[async_trait]
impl RemoteShell for OpenSshShell {
    async fn probe(&self, host: &str) -> RemoteExecResult<()> {
        let mut args = self.base_args(self.settings.probe_timeout);
        args.push(host.to_string());
        args.push("true".to_string());

        let output = run(&self.program, &args, true).await?;
        match failure_from_output(&output) {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    async fn connect(&self, host: &str) -> RemoteExecResult<Box<dyn ShellSession>> {
        let token = uuid::Uuid::new_v4().simple().to_string();
        let control_path = self
            .settings
            .runtime_dir
            .join(format!("vmpilot-{}.sock", &token[..12]));
        let log_path = self
            .settings
            .runtime_dir
            .join(format!("vmpilot-{}.log", &token[..12]));

        // The backgrounded master keeps inherited pipes open, so its
        // diagnostics go to a log file instead of stderr.
        let mut args = self.base_args(self.settings.connect_timeout);
        args.extend([
            "-o".to_string(),
            "ControlMaster=yes".to_string(),
            "-o".to_string(),
            format!("ControlPath={}", control_path.display()),
            "-o".to_string(),
            "ControlPersist=yes".to_string(),
            "-E".to_string(),
            log_path.display().to_string(),
            "-f".to_string(),
            "-N".to_string(),
            host.to_string(),
        ]);

        let output = run(&self.program, &args, false).await?;
        if !output.status.success() {
            let diagnostic = tokio::fs::read_to_string(&log_path)
                .await
                .unwrap_or_default();
            let _ = tokio::fs::remove_file(&log_path).await;
            return Err(if output.status.code() == Some(SSH_CLIENT_ERROR) {
                classify_ssh_failure(&diagnostic)
            } else {
                RemoteExecError::Other(format!(
                    "ssh master exited with {}: {}",
                    output.status,
                    diagnostic.trim()
                ))
            });
        }

        debug!(%host, control_path = %control_path.display(), "SSH control master established");

        Ok(Box::new(OpenSshSession {
            program: self.program.clone(),
            base_args: self.base_args(self.settings.connect_timeout),
            host: host.to_string(),
            control_path,
            log_path,
            closed: AtomicBool::new(false),
        }))
    }
}

pub struct OpenSshSession {
    program: String,
    base_args: Vec<String>,
    host: String,
    control_path: PathBuf,
    log_path: PathBuf,
    closed: AtomicBool,
}

impl OpenSshSession {
    fn control_args(&self) -> Vec<String> {
        let mut args = self.base_args.clone();
        args.push("-o".to_string());
        args.push(format!("ControlPath={}", self.control_path.display()));
        args
    }

    pub fn control_path(&self) -> &Path {
        &self.control_path
    }

    fn exit_args(&self) -> Vec<String> {
        let mut args = self.control_args();
        args.push("-O".to_string());
        args.push("exit".to_string());
        args.push(self.host.clone());
        args
    }
}

#[async_trait]
impl ShellSession for OpenSshSession {
    async fn exec(&self, command: &str) -> RemoteExecResult<CommandOutput> {
        let mut args = self.control_args();
        args.push(self.host.clone());
        args.push("--".to_string());
        args.push(with_status_trailer(command));

        let output = run(&self.program, &args, true).await?;
        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        let stderr = String::from_utf8_lossy(&output.stderr).into_owned();

        // The trailer is only printed once the remote shell ran the command.
        if let Some((stdout, exit_code)) = split_status_trailer(&stdout) {
            return Ok(CommandOutput {
                exit_code: Some(exit_code),
                stdout,
                stderr,
            });
        }
        if let Some(error) = failure_from_output(&output) {
            return Err(error);
        }

        Ok(CommandOutput {
            exit_code: output.status.code(),
            stdout,
            stderr,
        })
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);

        match run(&self.program, &self.exit_args(), true).await {
            Ok(output) if output.status.success() => {
                debug!(host = %self.host, "SSH control master closed");
            }
            Ok(output) => {
                warn!(
                    host = %self.host,
                    stderr = %String::from_utf8_lossy(&output.stderr).trim(),
                    "SSH control master did not exit cleanly"
                );
            }
            Err(error) => warn!(host = %self.host, %error, "Failed to close SSH control master"),
        }
        let _ = tokio::fs::remove_file(&self.log_path).await;
    }
}

impl Drop for OpenSshSession {
    /// A session dropped without `close` (e.g. its task was aborted) still
    /// takes its control master down.
    fn drop(&mut self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        warn!(host = %self.host, "SSH session dropped without close, stopping control master");

        let program = self.program.clone();
        let args = self.exit_args();
        let log_path = self.log_path.clone();
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    if let Err(error) = run(&program, &args, true).await {
                        warn!(%error, "Failed to stop SSH control master");
                    }
                    let _ = tokio::fs::remove_file(&log_path).await;
                });
            }
            Err(_) => {
                let _ = std::process::Command::new(&program)
                    .args(&args)
                    .stdin(Stdio::null())
                    .stdout(Stdio::null())
                    .stderr(Stdio::null())
                    .status();
                let _ = std::fs::remove_file(&log_path);
            }
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::os::unix::fs::PermissionsExt;

    /// Writes an executable stand-in for `ssh` and returns its path.
    fn fake_ssh(dir: &Path, body: &str) -> PathBuf {
        let path = dir.join("fake-ssh");
        std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    fn scratch_dir() -> PathBuf {
        let dir = std::env::temp_dir().join(format!("vmpilot-test-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    fn shell_with(program: &Path, dir: &Path) -> OpenSshShell {
        let mut settings = SshSettings::new("ubuntu", "./mykey");
        settings.runtime_dir = dir.to_path_buf();
        OpenSshShell::new(settings).with_program(program.display().to_string())
    }

    #[test]
    fn test_base_args_carry_identity_and_user() {
        let shell = OpenSshShell::new(SshSettings::new("ubuntu", "/keys/mykey"));
        let args = shell.base_args(Duration::from_secs(10));
        assert!(args.windows(2).any(|w| w[0] == "-i" && w[1] == "/keys/mykey"));
        assert!(args.windows(2).any(|w| w[0] == "-l" && w[1] == "ubuntu"));
        assert!(args.contains(&"ConnectTimeout=10".to_string()));
        assert!(args.contains(&"BatchMode=yes".to_string()));
    }

    #[tokio::test]
    async fn test_probe_missing_binary_is_other_error() {
        let shell = OpenSshShell::new(SshSettings::new("ubuntu", "./mykey"))
            .with_program("/nonexistent/vmpilot-ssh");
        let err = shell.probe("10.0.0.1").await.unwrap_err();
        assert!(matches!(err, RemoteExecError::Other(_)));
    }

    #[tokio::test]
    async fn test_probe_classifies_auth_failure() {
        let dir = scratch_dir();
        let program = fake_ssh(
            &dir,
            "echo 'ubuntu@10.0.0.1: Permission denied (publickey).' >&2\nexit 255",
        );
        let err = shell_with(&program, &dir).probe("10.0.0.1").await.unwrap_err();
        assert!(matches!(err, RemoteExecError::Authentication(_)));
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn test_probe_success() {
        let dir = scratch_dir();
        let program = fake_ssh(&dir, "exit 0");
        shell_with(&program, &dir).probe("10.0.0.1").await.unwrap();
        let _ = std::fs::remove_dir_all(&dir);
    }

    /// Stand-in for `ssh` that runs the remote command (its last argument)
    /// with the local shell, and records `-O` control requests in `ops.log`.
    fn executing_ssh(dir: &Path) -> PathBuf {
        fake_ssh(
            dir,
            &format!(
                "case \" $* \" in *\" -O \"*) echo \"$*\" >> '{}'; exit 0;; esac\n\
                 for last; do :; done\nexec sh -c \"$last\"",
                dir.join("ops.log").display()
            ),
        )
    }

    fn session_for(program: &Path, dir: &Path) -> OpenSshSession {
        let shell = shell_with(program, dir);
        OpenSshSession {
            program: program.display().to_string(),
            base_args: shell.base_args(Duration::from_secs(5)),
            host: "10.0.0.1".to_string(),
            control_path: dir.join("ctl.sock"),
            log_path: dir.join("ctl.log"),
            closed: AtomicBool::new(false),
        }
    }

    #[test]
    fn test_split_status_trailer() {
        assert_eq!(
            split_status_trailer("hello\n\n__vmpilot_rc=3\n"),
            Some(("hello\n".to_string(), 3))
        );
        assert_eq!(
            split_status_trailer("\n__vmpilot_rc=0\n"),
            Some((String::new(), 0))
        );
        assert_eq!(split_status_trailer("no trailer"), None);
    }

    #[tokio::test]
    async fn test_session_exec_captures_output_and_exit_code() {
        let dir = scratch_dir();
        let session = session_for(&executing_ssh(&dir), &dir);

        let output = session.exec("echo ran; echo warn >&2; exit 3").await.unwrap();
        assert_eq!(output.exit_code, Some(3));
        assert_eq!(output.stdout, "ran\n");
        assert_eq!(output.stderr.trim(), "warn");
        assert!(session.control_path().ends_with("ctl.sock"));

        session.close().await;
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn test_remote_exit_255_is_not_a_channel_failure() {
        let dir = scratch_dir();
        let session = session_for(&executing_ssh(&dir), &dir);

        let output = session
            .exec("echo 'model started'; echo 'bad config' >&2; exit 255")
            .await
            .unwrap();
        assert_eq!(output.exit_code, Some(255));
        assert!(!output.success());
        assert_eq!(output.stdout.trim(), "model started");
        assert_eq!(output.stderr.trim(), "bad config");

        session.close().await;
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn test_session_exec_channel_failure_is_classified() {
        let dir = scratch_dir();
        let program = fake_ssh(
            &dir,
            "echo 'ssh: connect to host 10.0.0.1 port 22: Connection refused' >&2\nexit 255",
        );
        let session = session_for(&program, &dir);

        let err = session.exec("true").await.unwrap_err();
        assert!(matches!(err, RemoteExecError::Network(_)));

        session.close().await;
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn test_dropped_session_stops_control_master() {
        let dir = scratch_dir();
        let session = session_for(&executing_ssh(&dir), &dir);
        std::fs::write(dir.join("ctl.log"), "").unwrap();

        drop(session);

        let ops = dir.join("ops.log");
        for _ in 0..200 {
            if std::fs::read_to_string(&ops).is_ok_and(|log| log.contains("-O exit")) {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(std::fs::read_to_string(&ops).unwrap().contains("-O exit"));
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn test_closed_session_drop_does_not_exit_twice() {
        let dir = scratch_dir();
        let session = session_for(&executing_ssh(&dir), &dir);

        session.close().await;
        drop(session);
        tokio::time::sleep(Duration::from_millis(100)).await;

        let log = std::fs::read_to_string(dir.join("ops.log")).unwrap();
        assert_eq!(log.matches("-O exit").count(), 1);
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn test_connect_failure_reads_master_log() {
        let dir = scratch_dir();
        // Find the -E argument and write the diagnostic there.
        let program = fake_ssh(
            &dir,
            "while [ $# -gt 0 ]; do if [ \"$1\" = -E ]; then shift; \
             echo 'ssh: connect to host 10.0.0.1 port 22: Connection timed out' > \"$1\"; fi; shift; done\nexit 255",
        );
        let result = shell_with(&program, &dir).connect("10.0.0.1").await;
        assert!(matches!(result, Err(RemoteExecError::ConnectTimeout(_))));
        let _ = std::fs::remove_dir_all(&dir);
    }
}
