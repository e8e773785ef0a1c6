//! Data models for the Berth orchestrator
//!
//! Container records, request/response types and the error payload.

use std::collections::HashMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ============================================================================
// Container Models
// ============================================================================

/// Container lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContainerStatus {
    Creating,
    Running,
    Stopped,
    Error,
}

impl ContainerStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContainerStatus::Creating => "creating",
            ContainerStatus::Running => "running",
            ContainerStatus::Stopped => "stopped",
            ContainerStatus::Error => "error",
        }
    }

    /// Whether moving from `self` to `next` is a legal lifecycle step.
    ///
    /// Legal: creating -> running -> stopped, and anything -> error.
    pub fn can_transition_to(&self, next: ContainerStatus) -> bool {
        matches!(
            (self, next),
            (_, ContainerStatus::Error)
                | (ContainerStatus::Creating, ContainerStatus::Running)
                | (ContainerStatus::Running, ContainerStatus::Stopped)
        )
    }
}

impl fmt::Display for ContainerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Transport protocol of a port mapping
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    #[default]
    Tcp,
    Udp,
}

impl Protocol {
    pub fn as_str(&self) -> &'static str {
        match self {
            Protocol::Tcp => "tcp",
            Protocol::Udp => "udp",
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Container port to host port mapping
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PortMapping {
    pub container_port: u16,

    /// None until the runtime has assigned a host port
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host_port: Option<u16>,

    #[serde(default)]
    pub protocol: Protocol,
}

impl PortMapping {
    pub fn new(container_port: u16) -> Self {
        Self {
            container_port,
            host_port: None,
            protocol: Protocol::Tcp,
        }
    }

    pub fn with_host_port(mut self, host_port: u16) -> Self {
        self.host_port = Some(host_port);
        self
    }

    pub fn with_protocol(mut self, protocol: Protocol) -> Self {
        self.protocol = protocol;
        self
    }

    /// Docker's "<port>/<proto>" key
    pub fn port_key(&self) -> String {
        format!("{}/{}", self.container_port, self.protocol)
    }
}

/// A managed preview container
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContainerRecord {
    pub id: String,
    pub name: String,
    pub image: String,
    pub status: ContainerStatus,
    pub ports: Vec<PortMapping>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub snapshot_id: Option<String>,
    pub conversation_id: String,

    /// Docker's own container id
    #[serde(skip)]
    pub runtime_id: String,

    /// Last failure, set when status is error
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ContainerRecord {
    /// Move to `status`, bumping `updated_at`
    pub fn set_status(&mut self, status: ContainerStatus) {
        self.status = status;
        if status != ContainerStatus::Error {
            self.error = None;
        }
        self.updated_at = Utc::now();
    }

    /// Move to error, remembering why
    pub fn fail(&mut self, message: impl Into<String>) {
        self.error = Some(message.into());
        self.status = ContainerStatus::Error;
        self.updated_at = Utc::now();
    }
}

/// Request to provision a container
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct CreateContainerRequest {
    pub image: String,

    #[serde(default)]
    pub name: Option<String>,

    #[serde(default)]
    pub ports: Vec<PortMapping>,

    #[serde(default)]
    pub environment: HashMap<String, String>,

    /// Overrides the image's default command
    #[serde(default)]
    pub command: Option<Vec<String>>,

    #[serde(default)]
    pub working_directory: Option<String>,

    pub conversation_id: String,

    #[serde(default)]
    pub snapshot_id: Option<String>,
}

/// Container plus its preview URL, if any
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContainerResponse {
    pub container: ContainerRecord,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
}

/// Response to a stop request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StopResponse {
    pub container: ContainerRecord,
}

/// Response to a destroy request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeleteResponse {
    pub success: bool,
}

/// Container list response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContainerListResponse {
    pub containers: Vec<ContainerResponse>,
    pub total: u64,
}

// ============================================================================
// Execution Models
// ============================================================================

/// Request to run a shell command in a container
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct ExecRequest {
    #[serde(default)]
    pub command: String,

    #[serde(default)]
    pub working_directory: Option<String>,

    #[serde(default)]
    pub environment: HashMap<String, String>,
}

impl ExecRequest {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            ..Default::default()
        }
    }
}

/// Result of a shell command
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct ExecResponse {
    pub exit_code: i64,
    pub stdout: String,
    pub stderr: String,
    /// stdout and stderr interleaved in arrival order
    pub output: String,
}

// ============================================================================
// System Models
// ============================================================================

/// Health check response
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    pub status: HealthStatus,
    pub version: String,
    pub uptime_seconds: u64,
    pub active_containers: u64,
    #[serde(default)]
    pub docker_version: Option<String>,
}

/// Health status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
}

// ============================================================================
// Error Models
// ============================================================================

/// Standard error response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
}

impl ErrorResponse {
    pub fn new(error: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_transitions() {
        use ContainerStatus::*;

        assert!(Creating.can_transition_to(Running));
        assert!(Running.can_transition_to(Stopped));
        for from in [Creating, Running, Stopped, Error] {
            assert!(from.can_transition_to(Error));
        }

        assert!(!Stopped.can_transition_to(Running));
        assert!(!Creating.can_transition_to(Stopped));
        assert!(!Running.can_transition_to(Creating));
        assert!(!Error.can_transition_to(Running));
    }

    #[test]
    fn test_exec_request_uses_camel_case() {
        let request: ExecRequest = serde_json::from_str(
            r#"{"command":"ls","workingDirectory":"/app","environment":{"A":"1"}}"#,
        )
        .unwrap();
        assert_eq!(request.command, "ls");
        assert_eq!(request.working_directory.as_deref(), Some("/app"));
        assert_eq!(request.environment.get("A").map(String::as_str), Some("1"));

        // Missing command deserializes as empty and is rejected later
        let request: ExecRequest = serde_json::from_str("{}").unwrap();
        assert!(request.command.is_empty());
    }

    #[test]
    fn test_record_hides_runtime_id() {
        let now = Utc::now();
        let record = ContainerRecord {
            id: "abc".into(),
            name: "berth-abc".into(),
            image: "node:20".into(),
            status: ContainerStatus::Creating,
            ports: vec![PortMapping::new(3000)],
            created_at: now,
            updated_at: now,
            snapshot_id: None,
            conversation_id: "conv-1".into(),
            runtime_id: "deadbeef".into(),
            error: None,
        };

        let json = serde_json::to_value(&record).unwrap();
        assert!(json.get("runtimeId").is_none());
        assert_eq!(json["conversationId"], "conv-1");
        assert_eq!(json["ports"][0]["containerPort"], 3000);
        assert_eq!(json["ports"][0]["protocol"], "tcp");
    }

    #[test]
    fn test_fail_then_recover_clears_error() {
        let now = Utc::now();
        let mut record = ContainerRecord {
            id: "abc".into(),
            name: "n".into(),
            image: "i".into(),
            status: ContainerStatus::Running,
            ports: vec![],
            created_at: now,
            updated_at: now,
            snapshot_id: None,
            conversation_id: "c".into(),
            runtime_id: String::new(),
            error: None,
        };

        record.fail("boom");
        assert_eq!(record.status, ContainerStatus::Error);
        assert_eq!(record.error.as_deref(), Some("boom"));

        record.set_status(ContainerStatus::Stopped);
        assert!(record.error.is_none());
    }
}
