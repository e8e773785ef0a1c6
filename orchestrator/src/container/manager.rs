//! Container lifecycle management

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use once_cell::sync::Lazy;
use regex::Regex;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::{AppConfig, ExecConfig};
use crate::metrics;
use crate::models::{
    ContainerRecord, ContainerResponse, ContainerStatus, CreateContainerRequest, ExecRequest,
    ExecResponse, PortMapping,
};

use super::error::{ContainerError, Result};
use super::preview::PreviewResolver;
use super::registry::{ContainerHandle, ContainerRegistry};
use super::runtime::{ContainerRuntime, RuntimeCommand, RuntimeContainerSpec, MANAGED_LABEL};

/// Docker's container name rule
static NAME_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-zA-Z0-9][a-zA-Z0-9_.-]*$").expect("valid name pattern"));

const MAX_NAME_LEN: usize = 128;

/// Drives preview containers through their lifecycle and keeps the registry current
pub struct ContainerManager {
    registry: ContainerRegistry,
    runtime: Arc<dyn ContainerRuntime>,
    preview: PreviewResolver,
    exec_config: ExecConfig,
}

impl ContainerManager {
    pub fn new(config: &AppConfig, runtime: Arc<dyn ContainerRuntime>) -> Self {
        Self {
            registry: ContainerRegistry::new(),
            runtime,
            preview: PreviewResolver::new(&config.preview),
            exec_config: config.exec.clone(),
        }
    }

    /// Provision a container; it is registered with status creating
    pub async fn create(&self, request: CreateContainerRequest) -> Result<ContainerRecord> {
        validate_create(&request)?;

        let id = Uuid::new_v4().simple().to_string();
        let name = request
            .name
            .clone()
            .unwrap_or_else(|| format!("berth-{}", &id[..12]));

        let mut labels = HashMap::new();
        labels.insert(MANAGED_LABEL.to_string(), "true".to_string());
        labels.insert("berth.id".to_string(), id.clone());
        labels.insert("berth.conversation".to_string(), request.conversation_id.clone());

        let spec = RuntimeContainerSpec {
            name: name.clone(),
            image: request.image.clone(),
            ports: request.ports.clone(),
            environment: request.environment.clone(),
            command: request.command.clone(),
            working_directory: request.working_directory.clone(),
            labels,
        };

        debug!(container_id = %id, image = %spec.image, ports = spec.ports.len(), "Creating container");

        let runtime_id = match self.runtime.create(&spec).await {
            Ok(runtime_id) => runtime_id,
            Err(e) => {
                error!(container_id = %id, error = %format!("{:#}", e), "Container create failed");
                metrics::record_lifecycle("create", false);
                return Err(ContainerError::operation(e));
            }
        };

        let now = Utc::now();
        let record = ContainerRecord {
            id: id.clone(),
            name,
            image: request.image,
            status: ContainerStatus::Creating,
            ports: request.ports,
            created_at: now,
            updated_at: now,
            snapshot_id: request.snapshot_id,
            conversation_id: request.conversation_id,
            runtime_id,
            error: None,
        };

        self.registry.upsert(record.clone()).await;
        metrics::record_lifecycle("create", true);

        info!(
            container_id = %record.id,
            name = %record.name,
            conversation_id = %record.conversation_id,
            "Container created"
        );

        Ok(record)
    }

    /// Start a created container and resolve its host ports
    pub async fn start(&self, id: &str) -> Result<ContainerRecord> {
        let handle = self.lookup(id).await?;
        let _guard = handle.lock_lifecycle().await;
        self.ensure_registered(id).await?;

        let record = handle.record().await;
        if record.status == ContainerStatus::Running {
            debug!(container_id = %id, "Container already running");
            return Ok(record);
        }
        check_transition(&record, ContainerStatus::Running, "start")?;

        if let Err(e) = self.runtime.start(&record.runtime_id).await {
            return Err(self.fail(&handle, "start", e).await);
        }

        let published = match self.runtime.inspect_ports(&record.runtime_id).await {
            Ok(published) => published,
            Err(e) => return Err(self.fail(&handle, "start", e).await),
        };

        let record = handle
            .update(|r| {
                resolve_host_ports(&mut r.ports, &published);
                r.set_status(ContainerStatus::Running);
            })
            .await;

        metrics::record_lifecycle("start", true);
        info!(
            container_id = %id,
            base_url = ?self.preview.base_url(&record),
            "Container started"
        );

        Ok(record)
    }

    /// Stop a running container
    pub async fn stop(&self, id: &str) -> Result<ContainerRecord> {
        let handle = self.lookup(id).await?;
        let _guard = handle.lock_lifecycle().await;
        self.ensure_registered(id).await?;

        let record = handle.record().await;
        if record.status == ContainerStatus::Stopped {
            debug!(container_id = %id, "Container already stopped");
            return Ok(record);
        }
        check_transition(&record, ContainerStatus::Stopped, "stop")?;

        if let Err(e) = self.runtime.stop(&record.runtime_id).await {
            return Err(self.fail(&handle, "stop", e).await);
        }

        let record = handle.update(|r| r.set_status(ContainerStatus::Stopped)).await;

        metrics::record_lifecycle("stop", true);
        info!(container_id = %id, "Container stopped");

        Ok(record)
    }

    /// Stop (if running) and remove a container from the runtime and the registry
    pub async fn destroy(&self, id: &str) -> Result<()> {
        let handle = self.lookup(id).await?;
        let _guard = handle.lock_lifecycle().await;
        self.ensure_registered(id).await?;

        let record = handle.record().await;

        if record.status == ContainerStatus::Running {
            if let Err(e) = self.runtime.stop(&record.runtime_id).await {
                // Forced removal still tears it down
                warn!(container_id = %id, error = %format!("{:#}", e), "Stop before destroy failed");
            }
        }

        if let Err(e) = self.runtime.remove(&record.runtime_id).await {
            return Err(self.fail(&handle, "destroy", e).await);
        }

        self.registry.remove(id).await;

        metrics::record_lifecycle("destroy", true);
        info!(container_id = %id, "Container destroyed");

        Ok(())
    }

    /// Run a shell command inside a running container
    pub async fn execute_command(&self, id: &str, request: ExecRequest) -> Result<ExecResponse> {
        if request.command.trim().is_empty() {
            return Err(ContainerError::InvalidRequest("Command cannot be empty".into()));
        }

        if request.command.len() > self.exec_config.max_command_bytes {
            return Err(ContainerError::CommandTooLarge {
                limit: self.exec_config.max_command_bytes,
            });
        }

        // No lock is held across the runtime call, so a command that never
        // returns cannot block stop or destroy
        let record = self.get(id).await?;
        if record.status != ContainerStatus::Running {
            return Err(ContainerError::InvalidState {
                id: id.to_string(),
                status: record.status,
                action: "exec in",
            });
        }

        let command = RuntimeCommand {
            argv: vec![
                self.exec_config.shell.clone(),
                "-c".to_string(),
                request.command.clone(),
            ],
            working_directory: request.working_directory,
            environment: request.environment,
        };

        let start_time = Instant::now();
        let result = self.runtime.exec(&record.runtime_id, &command).await;
        let duration_secs = start_time.elapsed().as_secs_f64();

        match result {
            Ok(response) => {
                metrics::record_exec(duration_secs, true);
                info!(
                    container_id = %id,
                    exit_code = response.exit_code,
                    duration_ms = (duration_secs * 1000.0) as u64,
                    "Command completed"
                );
                Ok(response)
            }
            Err(e) => {
                // The container itself may be fine, so its status is left alone
                metrics::record_exec(duration_secs, false);
                error!(container_id = %id, error = %format!("{:#}", e), "Command failed");
                Err(ContainerError::operation(e))
            }
        }
    }

    /// Current record for a container
    pub async fn get(&self, id: &str) -> Result<ContainerRecord> {
        self.registry
            .get(id)
            .await
            .ok_or_else(|| ContainerError::NotFound(id.to_string()))
    }

    /// All registered containers, oldest first
    pub async fn list(&self) -> Vec<ContainerRecord> {
        self.registry.list().await
    }

    /// Record plus preview URL, as returned over the API
    pub fn describe(&self, container: ContainerRecord) -> ContainerResponse {
        let base_url = self.preview.base_url(&container);
        ContainerResponse {
            container,
            base_url,
        }
    }

    /// Preview URL for a record
    pub fn base_url(&self, record: &ContainerRecord) -> Option<String> {
        self.preview.base_url(record)
    }

    /// Number of registered containers
    pub async fn active_count(&self) -> u64 {
        self.registry.len().await as u64
    }

    /// Docker engine version, if reachable
    pub async fn runtime_version(&self) -> Option<String> {
        self.runtime.version().await
    }

    /// Tear down everything; used at shutdown
    pub async fn destroy_all(&self) -> usize {
        let mut destroyed = 0;

        for record in self.registry.list().await {
            match self.destroy(&record.id).await {
                Ok(()) => destroyed += 1,
                Err(ContainerError::NotFound(_)) => {}
                Err(e) => warn!(container_id = %record.id, error = %e, "Failed to destroy container"),
            }
        }

        destroyed
    }

    async fn lookup(&self, id: &str) -> Result<ContainerHandle> {
        self.registry
            .handle(id)
            .await
            .ok_or_else(|| ContainerError::NotFound(id.to_string()))
    }

    /// Re-check after taking a lock, in case a destroy won the race
    async fn ensure_registered(&self, id: &str) -> Result<()> {
        if self.registry.contains(id).await {
            Ok(())
        } else {
            Err(ContainerError::NotFound(id.to_string()))
        }
    }

    /// Mark the record as errored and build the error to return
    async fn fail(
        &self,
        handle: &ContainerHandle,
        operation: &'static str,
        err: anyhow::Error,
    ) -> ContainerError {
        let message = format!("{:#}", err);
        let record = handle.update(|r| r.fail(message.clone())).await;

        metrics::record_lifecycle(operation, false);
        error!(
            container_id = %record.id,
            operation = operation,
            error = %message,
            "Container operation failed"
        );

        ContainerError::OperationFailed(message)
    }
}

fn check_transition(
    record: &ContainerRecord,
    next: ContainerStatus,
    action: &'static str,
) -> Result<()> {
    if record.status.can_transition_to(next) {
        Ok(())
    } else {
        Err(ContainerError::InvalidState {
            id: record.id.clone(),
            status: record.status,
            action,
        })
    }
}

/// Fill in engine-assigned host ports; explicit ones are never rewritten
fn resolve_host_ports(ports: &mut [PortMapping], published: &[PortMapping]) {
    for port in ports.iter_mut().filter(|p| p.host_port.is_none()) {
        port.host_port = published
            .iter()
            .find(|p| p.container_port == port.container_port && p.protocol == port.protocol)
            .and_then(|p| p.host_port);
    }
}

fn validate_create(request: &CreateContainerRequest) -> Result<()> {
    if request.image.trim().is_empty() {
        return Err(ContainerError::InvalidRequest("Image cannot be empty".into()));
    }

    if request.conversation_id.trim().is_empty() {
        return Err(ContainerError::InvalidRequest(
            "Conversation id cannot be empty".into(),
        ));
    }

    if let Some(ref name) = request.name {
        if name.len() > MAX_NAME_LEN || !NAME_PATTERN.is_match(name) {
            return Err(ContainerError::InvalidRequest(format!(
                "Invalid container name: {}",
                name
            )));
        }
    }

    if let Some(ref command) = request.command {
        if command.is_empty() {
            return Err(ContainerError::InvalidRequest("Command cannot be empty".into()));
        }
    }

    let mut seen = HashSet::new();
    for port in &request.ports {
        if port.container_port == 0 {
            return Err(ContainerError::InvalidRequest("Container port cannot be 0".into()));
        }
        if !seen.insert((port.container_port, port.protocol)) {
            return Err(ContainerError::InvalidRequest(format!(
                "Duplicate port mapping: {}",
                port.port_key()
            )));
        }
    }

    Ok(())
}
