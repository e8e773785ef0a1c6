//! Container runtime client
//!
//! `ContainerRuntime` is the seam between the lifecycle controller and the
//! engine. `DockerRuntime` talks to the Docker Engine API through bollard.

use std::collections::HashMap;

use anyhow::{Context, Result};
use async_trait::async_trait;
use bollard::container::{
    Config, CreateContainerOptions, InspectContainerOptions, LogOutput, RemoveContainerOptions,
    StartContainerOptions, StopContainerOptions,
};
use bollard::exec::{CreateExecOptions, StartExecOptions, StartExecResults};
use bollard::image::CreateImageOptions;
use bollard::models::{HostConfig, PortBinding, PortMap};
use bollard::{Docker, API_DEFAULT_VERSION};
use futures::StreamExt;
use tracing::{debug, info, warn};

use crate::config::RuntimeConfig;
use crate::models::{ExecResponse, PortMapping, Protocol};

/// Label marking containers owned by this service
pub const MANAGED_LABEL: &str = "berth.managed";

/// Everything the runtime needs to create a container
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RuntimeContainerSpec {
    pub name: String,
    pub image: String,
    pub ports: Vec<PortMapping>,
    pub environment: HashMap<String, String>,
    pub command: Option<Vec<String>>,
    pub working_directory: Option<String>,
    pub labels: HashMap<String, String>,
}

/// A process to run inside a container
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RuntimeCommand {
    pub argv: Vec<String>,
    pub working_directory: Option<String>,
    pub environment: HashMap<String, String>,
}

/// Operations the controller needs from a container engine.
///
/// Each call is a single attempt; callers decide what a failure means.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// Create (but do not start) a container, returning the engine's id
    async fn create(&self, spec: &RuntimeContainerSpec) -> Result<String>;

    async fn start(&self, runtime_id: &str) -> Result<()>;

    /// Port mappings as actually published by the engine
    async fn inspect_ports(&self, runtime_id: &str) -> Result<Vec<PortMapping>>;

    async fn stop(&self, runtime_id: &str) -> Result<()>;

    async fn remove(&self, runtime_id: &str) -> Result<()>;

    async fn exec(&self, runtime_id: &str, command: &RuntimeCommand) -> Result<ExecResponse>;

    /// Engine version, if reachable
    async fn version(&self) -> Option<String>;
}

/// Docker Engine API runtime
pub struct DockerRuntime {
    docker: Docker,
    config: RuntimeConfig,
}

impl DockerRuntime {
    /// Connect to the configured Docker host, or the local defaults
    pub async fn connect(config: RuntimeConfig) -> Result<Self> {
        let docker = Self::build_client(&config)?;

        match docker.ping().await {
            Ok(_) => info!("Connected to Docker daemon"),
            Err(e) => warn!(error = %e, "Docker daemon not reachable yet"),
        }

        Ok(Self { docker, config })
    }

    fn build_client(config: &RuntimeConfig) -> Result<Docker> {
        let timeout = config.connect_timeout_seconds;

        let docker = match config.docker_host.as_deref() {
            Some(host) if host.starts_with("tcp://") || host.starts_with("http://") => {
                info!(docker_host = %host, "Using Docker over HTTP");
                Docker::connect_with_http(host, timeout, API_DEFAULT_VERSION)
            }
            #[cfg(unix)]
            Some(host) => {
                let path = host.strip_prefix("unix://").unwrap_or(host);
                info!(socket = %path, "Using Docker socket");
                Docker::connect_with_unix(path, timeout, API_DEFAULT_VERSION)
            }
            #[cfg(not(unix))]
            Some(host) => {
                anyhow::bail!("Unsupported Docker host on this platform: {}", host);
            }
            None => Docker::connect_with_local_defaults(),
        };

        docker.context("Failed to create Docker client")
    }

    async fn ensure_image(&self, image: &str) -> Result<()> {
        match self.docker.inspect_image(image).await {
            Ok(_) => {
                debug!(image = %image, "Image present locally");
                return Ok(());
            }
            Err(bollard::errors::Error::DockerResponseServerError {
                status_code: 404, ..
            }) => {}
            Err(e) => return Err(e).context("Failed to inspect image"),
        }

        info!(image = %image, "Pulling image");

        let (from_image, tag) = split_image_reference(image);
        let options = CreateImageOptions {
            from_image,
            tag,
            ..Default::default()
        };
        let mut stream = self.docker.create_image(Some(options), None, None);
        while let Some(progress) = stream.next().await {
            progress.with_context(|| format!("Failed to pull image {}", image))?;
        }

        info!(image = %image, "Image pulled");
        Ok(())
    }

    fn container_config(&self, spec: &RuntimeContainerSpec) -> Config<String> {
        let mut exposed_ports = HashMap::new();
        let mut port_bindings: PortMap = HashMap::new();

        for port in &spec.ports {
            let key = port.port_key();
            exposed_ports.insert(key.clone(), HashMap::new());
            port_bindings.insert(
                key,
                Some(vec![PortBinding {
                    host_ip: Some(self.config.bind_address.clone()),
                    // Empty lets the engine pick a free port
                    host_port: Some(port.host_port.map(|p| p.to_string()).unwrap_or_default()),
                }]),
            );
        }

        let env = spec
            .environment
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect();

        Config {
            image: Some(spec.image.clone()),
            env: Some(env),
            cmd: spec.command.clone(),
            working_dir: spec.working_directory.clone(),
            exposed_ports: Some(exposed_ports),
            labels: Some(spec.labels.clone()),
            host_config: Some(HostConfig {
                port_bindings: Some(port_bindings),
                ..Default::default()
            }),
            ..Default::default()
        }
    }
}

#[async_trait]
impl ContainerRuntime for DockerRuntime {
    async fn create(&self, spec: &RuntimeContainerSpec) -> Result<String> {
        if self.config.pull_missing_images {
            self.ensure_image(&spec.image).await?;
        }

        let options = CreateContainerOptions {
            name: spec.name.clone(),
            platform: None,
        };

        let response = self
            .docker
            .create_container(Some(options), self.container_config(spec))
            .await
            .context("Failed to create container")?;

        for warning in &response.warnings {
            warn!(container = %spec.name, warning = %warning, "Docker create warning");
        }

        Ok(response.id)
    }

    async fn start(&self, runtime_id: &str) -> Result<()> {
        self.docker
            .start_container(runtime_id, None::<StartContainerOptions<String>>)
            .await
            .context("Failed to start container")
    }

    async fn inspect_ports(&self, runtime_id: &str) -> Result<Vec<PortMapping>> {
        let inspect = self
            .docker
            .inspect_container(runtime_id, None::<InspectContainerOptions>)
            .await
            .context("Failed to inspect container")?;

        let ports = inspect
            .network_settings
            .and_then(|settings| settings.ports)
            .map(|ports| published_ports(&ports))
            .unwrap_or_default();

        Ok(ports)
    }

    async fn stop(&self, runtime_id: &str) -> Result<()> {
        let options = StopContainerOptions {
            t: self.config.stop_timeout_seconds,
        };

        match self.docker.stop_container(runtime_id, Some(options)).await {
            Ok(_) => Ok(()),
            Err(bollard::errors::Error::DockerResponseServerError {
                status_code: 304, ..
            }) => {
                debug!(runtime_id = %runtime_id, "Container already stopped");
                Ok(())
            }
            Err(e) => Err(e).context("Failed to stop container"),
        }
    }

    async fn remove(&self, runtime_id: &str) -> Result<()> {
        let options = RemoveContainerOptions {
            force: true,
            v: true,
            ..Default::default()
        };

        match self.docker.remove_container(runtime_id, Some(options)).await {
            Ok(_) => Ok(()),
            Err(bollard::errors::Error::DockerResponseServerError {
                status_code: 404, ..
            }) => {
                debug!(runtime_id = %runtime_id, "Container already removed");
                Ok(())
            }
            Err(e) => Err(e).context("Failed to remove container"),
        }
    }

    async fn exec(&self, runtime_id: &str, command: &RuntimeCommand) -> Result<ExecResponse> {
        let env: Vec<String> = command
            .environment
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect();

        let options = CreateExecOptions {
            cmd: Some(command.argv.clone()),
            env: Some(env),
            working_dir: command.working_directory.clone(),
            attach_stdout: Some(true),
            attach_stderr: Some(true),
            ..Default::default()
        };

        let exec = self
            .docker
            .create_exec(runtime_id, options)
            .await
            .context("Failed to create exec")?;

        let mut collected = ExecOutput::default();

        match self
            .docker
            .start_exec(&exec.id, None::<StartExecOptions>)
            .await
            .context("Failed to start exec")?
        {
            StartExecResults::Attached { mut output, .. } => {
                while let Some(chunk) = output.next().await {
                    collected.push(chunk.context("Failed to read exec output")?);
                }
            }
            StartExecResults::Detached => {
                anyhow::bail!("Exec unexpectedly started detached");
            }
        }

        let inspect = self
            .docker
            .inspect_exec(&exec.id)
            .await
            .context("Failed to inspect exec")?;

        Ok(collected.finish(inspect.exit_code.unwrap_or(-1)))
    }

    async fn version(&self) -> Option<String> {
        self.docker.version().await.ok().and_then(|v| v.version)
    }
}

/// Raw exec output. Frames can split a UTF-8 sequence, so bytes are only
/// decoded once the stream has ended.
#[derive(Debug, Default)]
struct ExecOutput {
    stdout: Vec<u8>,
    stderr: Vec<u8>,
    output: Vec<u8>,
}

impl ExecOutput {
    fn push(&mut self, frame: LogOutput) {
        match frame {
            LogOutput::StdOut { message } => {
                self.stdout.extend_from_slice(&message);
                self.output.extend_from_slice(&message);
            }
            LogOutput::StdErr { message } => {
                self.stderr.extend_from_slice(&message);
                self.output.extend_from_slice(&message);
            }
            _ => {}
        }
    }

    fn finish(self, exit_code: i64) -> ExecResponse {
        ExecResponse {
            exit_code,
            stdout: String::from_utf8_lossy(&self.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&self.stderr).into_owned(),
            output: String::from_utf8_lossy(&self.output).into_owned(),
        }
    }
}

/// Split an image reference into the repository and tag to pull.
///
/// A bare name pulls `latest`, as `docker pull` does; an empty tag would
/// pull every tag. Digest references are passed through whole.
fn split_image_reference(image: &str) -> (&str, &str) {
    if image.contains('@') {
        return (image, "");
    }

    // A colon before the last slash belongs to a registry port
    let name_start = image.rfind('/').map_or(0, |i| i + 1);
    match image[name_start..].rfind(':') {
        Some(i) => {
            let split = name_start + i;
            (&image[..split], &image[split + 1..])
        }
        None => (image, "latest"),
    }
}

/// Flatten Docker's port map into mappings, skipping unpublished ports
fn published_ports(ports: &PortMap) -> Vec<PortMapping> {
    let mut mappings: Vec<PortMapping> = ports
        .iter()
        .filter_map(|(key, bindings)| {
            let (port, protocol) = parse_port_key(key)?;
            let host_port = bindings
                .as_ref()?
                .iter()
                .find_map(|b| b.host_port.as_deref()?.parse::<u16>().ok())?;

            Some(
                PortMapping::new(port)
                    .with_protocol(protocol)
                    .with_host_port(host_port),
            )
        })
        .collect();

    mappings.sort_by_key(|m| (m.container_port, m.protocol.as_str()));
    mappings
}

/// Parse "3000/tcp" (protocol defaults to tcp)
fn parse_port_key(key: &str) -> Option<(u16, Protocol)> {
    let mut parts = key.splitn(2, '/');
    let port = parts.next()?.parse::<u16>().ok()?;
    let protocol = match parts.next() {
        None | Some("tcp") => Protocol::Tcp,
        Some("udp") => Protocol::Udp,
        Some(_) => return None,
    };
    Some((port, protocol))
}
