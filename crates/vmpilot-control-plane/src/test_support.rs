//! In-process fakes for the provider and the remote shell.

use async_trait::async_trait;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use crate::features::cloud_provider::repo::{
    CloudProvider, InstanceDescriptor, MachineSpec, ProviderError, ProviderResult,
};
use crate::features::remote_exec::repo::{
    CommandOutput, RemoteExecError, RemoteExecResult, RemoteShell, ShellSession,
};

pub struct FakeCloudProvider {
    pub vm_id: String,
    pub address: String,
    /// Query on which the VM first reports active, `None` for never
    pub ready_on_poll: Option<u32>,
    pub fail_create: bool,
    pub fail_delete: bool,
    describe_calls: AtomicU32,
    created: Mutex<Vec<MachineSpec>>,
    deleted: Mutex<Vec<String>>,
}

impl FakeCloudProvider {
    pub fn new(vm_id: &str) -> Self {
        Self {
            vm_id: vm_id.to_string(),
            address: "203.0.113.10".to_string(),
            ready_on_poll: Some(1),
            fail_create: false,
            fail_delete: false,
            describe_calls: AtomicU32::new(0),
            created: Mutex::new(Vec::new()),
            deleted: Mutex::new(Vec::new()),
        }
    }

    pub fn ready_on_poll(mut self, poll: Option<u32>) -> Self {
        self.ready_on_poll = poll;
        self
    }

    pub fn describe_calls(&self) -> u32 {
        self.describe_calls.load(Ordering::SeqCst)
    }

    pub fn created(&self) -> Vec<MachineSpec> {
        self.created.lock().unwrap().clone()
    }

    pub fn deleted(&self) -> Vec<String> {
        self.deleted.lock().unwrap().clone()
    }
}

#[async_trait]
impl CloudProvider for FakeCloudProvider {
    async fn create_instance(&self, spec: &MachineSpec) -> ProviderResult<String> {
        if self.fail_create {
            return Err(ProviderError::Status {
                status: 500,
                body: "capacity exhausted".to_string(),
            });
        }
        self.created.lock().unwrap().push(spec.clone());
        Ok(self.vm_id.clone())
    }

    async fn delete_instance(&self, vm_id: &str) -> ProviderResult<()> {
        if self.fail_delete {
            return Err(ProviderError::Transport("connection reset".to_string()));
        }
        self.deleted.lock().unwrap().push(vm_id.to_string());
        Ok(())
    }

    async fn describe_instance(&self, vm_id: &str) -> ProviderResult<Vec<InstanceDescriptor>> {
        let poll = self.describe_calls.fetch_add(1, Ordering::SeqCst) + 1;
        let ready = self.ready_on_poll.is_some_and(|ready_on| poll >= ready_on);
        let descriptor = InstanceDescriptor {
            vm_id: Some(vm_id.to_string()),
            status: Some(if ready { "Active" } else { "Launching" }.to_string()),
            public_ip: ready.then(|| self.address.clone()),
            extra: Default::default(),
        };
        Ok(vec![descriptor])
    }
}

pub struct FakeShell {
    /// Probe on which the host first accepts connections, `None` for never
    pub ready_on_probe: Option<u32>,
    pub connect_error: Option<RemoteExecError>,
    /// Printed by the script search step
    pub scripts: Vec<String>,
    /// Fail the first command containing the given text
    pub failing_command: Option<(String, RemoteExecError)>,
    /// Never return from the first command containing the given text
    pub hanging_command: Option<String>,
    probes: AtomicU32,
    executed: Arc<Mutex<Vec<String>>>,
    closed: Arc<AtomicU32>,
    dropped: Arc<AtomicU32>,
}

impl FakeShell {
    pub fn new() -> Self {
        Self {
            ready_on_probe: Some(1),
            connect_error: None,
            scripts: vec!["/home/ubuntu/model/start.sh".to_string()],
            failing_command: None,
            hanging_command: None,
            probes: AtomicU32::new(0),
            executed: Arc::new(Mutex::new(Vec::new())),
            closed: Arc::new(AtomicU32::new(0)),
            dropped: Arc::new(AtomicU32::new(0)),
        }
    }

    pub fn with_scripts(mut self, scripts: &[&str]) -> Self {
        self.scripts = scripts.iter().map(ToString::to_string).collect();
        self
    }

    pub fn failing_on(mut self, needle: &str, error: RemoteExecError) -> Self {
        self.failing_command = Some((needle.to_string(), error));
        self
    }

    pub fn hanging_on(mut self, needle: &str) -> Self {
        self.hanging_command = Some(needle.to_string());
        self
    }

    pub fn probes(&self) -> u32 {
        self.probes.load(Ordering::SeqCst)
    }

    pub fn executed(&self) -> Vec<String> {
        self.executed.lock().unwrap().clone()
    }

    pub fn closed_sessions(&self) -> u32 {
        self.closed.load(Ordering::SeqCst)
    }

    /// Sessions released, whether through `close` or by being dropped
    pub fn released_sessions(&self) -> u32 {
        self.dropped.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RemoteShell for FakeShell {
    async fn probe(&self, host: &str) -> RemoteExecResult<()> {
        let probe = self.probes.fetch_add(1, Ordering::SeqCst) + 1;
        match self.ready_on_probe {
            Some(ready_on) if probe >= ready_on => Ok(()),
            _ => Err(RemoteExecError::Network(format!(
                "ssh: connect to host {host} port 22: Connection refused"
            ))),
        }
    }

    async fn connect(&self, _host: &str) -> RemoteExecResult<Box<dyn ShellSession>> {
        if let Some(error) = &self.connect_error {
            return Err(error.clone());
        }
        Ok(Box::new(FakeSession {
            scripts: self.scripts.clone(),
            failing_command: self.failing_command.clone(),
            hanging_command: self.hanging_command.clone(),
            executed: Arc::clone(&self.executed),
            closed: Arc::clone(&self.closed),
            dropped: Arc::clone(&self.dropped),
        }))
    }
}

struct FakeSession {
    scripts: Vec<String>,
    failing_command: Option<(String, RemoteExecError)>,
    hanging_command: Option<String>,
    executed: Arc<Mutex<Vec<String>>>,
    closed: Arc<AtomicU32>,
    dropped: Arc<AtomicU32>,
}

impl Drop for FakeSession {
    fn drop(&mut self) {
        self.dropped.fetch_add(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl ShellSession for FakeSession {
    async fn exec(&self, command: &str) -> RemoteExecResult<CommandOutput> {
        self.executed.lock().unwrap().push(command.to_string());
        if let Some((needle, error)) = &self.failing_command {
            if command.contains(needle.as_str()) {
                return Err(error.clone());
            }
        }
        if let Some(needle) = &self.hanging_command {
            if command.contains(needle.as_str()) {
                std::future::pending::<()>().await;
            }
        }
        let stdout = if command.starts_with("find ") {
            self.scripts.join("\n")
        } else {
            String::new()
        };
        Ok(CommandOutput {
            exit_code: Some(0),
            stdout,
            stderr: String::new(),
        })
    }

    async fn close(&self) {
        self.closed.fetch_add(1, Ordering::SeqCst);
    }
}
