//! In-memory runtime for tests

use std::collections::HashMap;
use std::sync::Mutex;

use anyhow::Result;
use async_trait::async_trait;

use crate::models::{ExecResponse, PortMapping};

use super::runtime::{ContainerRuntime, RuntimeCommand, RuntimeContainerSpec};

#[derive(Default)]
struct FakeState {
    created: HashMap<String, RuntimeContainerSpec>,
    removed: Vec<String>,
    last_spec: Option<RuntimeContainerSpec>,
    last_command: Option<RuntimeCommand>,
    start_calls: usize,
    stop_calls: usize,
    exec_calls: usize,
}

/// Command that never completes, like a dev server left in the foreground
pub const HANG: &str = "hang";

/// Behaves like a healthy engine; `exit N` commands exit with N
#[derive(Default)]
pub struct FakeRuntime {
    state: Mutex<FakeState>,
}

impl FakeRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    /// Host port the fake engine picks for a container port
    pub fn assigned_port(container_port: u16) -> u16 {
        49000 + container_port % 1000
    }

    pub fn last_spec(&self) -> Option<RuntimeContainerSpec> {
        self.state.lock().unwrap().last_spec.clone()
    }

    pub fn last_command(&self) -> Option<RuntimeCommand> {
        self.state.lock().unwrap().last_command.clone()
    }

    pub fn start_calls(&self) -> usize {
        self.state.lock().unwrap().start_calls
    }

    pub fn stop_calls(&self) -> usize {
        self.state.lock().unwrap().stop_calls
    }

    pub fn exec_calls(&self) -> usize {
        self.state.lock().unwrap().exec_calls
    }

    pub fn is_removed(&self, runtime_id: &str) -> bool {
        self.state.lock().unwrap().removed.iter().any(|id| id == runtime_id)
    }
}

#[async_trait]
impl ContainerRuntime for FakeRuntime {
    async fn create(&self, spec: &RuntimeContainerSpec) -> Result<String> {
        let mut state = self.state.lock().unwrap();
        let runtime_id = format!("fake-{}", state.created.len() + 1);
        state.created.insert(runtime_id.clone(), spec.clone());
        state.last_spec = Some(spec.clone());
        Ok(runtime_id)
    }

    async fn start(&self, _runtime_id: &str) -> Result<()> {
        self.state.lock().unwrap().start_calls += 1;
        Ok(())
    }

    async fn inspect_ports(&self, runtime_id: &str) -> Result<Vec<PortMapping>> {
        let state = self.state.lock().unwrap();
        let spec = state
            .created
            .get(runtime_id)
            .ok_or_else(|| anyhow::anyhow!("No such container: {}", runtime_id))?;

        Ok(spec
            .ports
            .iter()
            .map(|p| {
                let host_port = p
                    .host_port
                    .unwrap_or_else(|| Self::assigned_port(p.container_port));
                p.with_host_port(host_port)
            })
            .collect())
    }

    async fn stop(&self, _runtime_id: &str) -> Result<()> {
        self.state.lock().unwrap().stop_calls += 1;
        Ok(())
    }

    async fn remove(&self, runtime_id: &str) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.created.remove(runtime_id);
        state.removed.push(runtime_id.to_string());
        Ok(())
    }

    async fn exec(&self, _runtime_id: &str, command: &RuntimeCommand) -> Result<ExecResponse> {
        let script = {
            let mut state = self.state.lock().unwrap();
            state.exec_calls += 1;
            state.last_command = Some(command.clone());
            command.argv.last().cloned().unwrap_or_default()
        };

        if script == HANG {
            std::future::pending::<()>().await;
        }

        let response = match script.strip_prefix("exit ").and_then(|n| n.trim().parse().ok()) {
            Some(code) => {
                let stderr = format!("exited with {}\n", code);
                ExecResponse {
                    exit_code: code,
                    stdout: String::new(),
                    output: stderr.clone(),
                    stderr,
                }
            }
            None => {
                let stdout = format!("ran: {}\n", script);
                ExecResponse {
                    exit_code: 0,
                    output: stdout.clone(),
                    stdout,
                    stderr: String::new(),
                }
            }
        };

        Ok(response)
    }

    async fn version(&self) -> Option<String> {
        Some("fake".to_string())
    }
}
