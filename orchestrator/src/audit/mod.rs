//! Audit log export to SIEM systems
//!
//! Supports multiple formats: syslog (RFC 5424), CEF (Common Event Format), JSON

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::info;

/// Audit event for SIEM export
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEvent {
    pub timestamp: DateTime<Utc>,
    pub event_type: AuditEventType,
    pub caller_id: String,
    pub action: String,
    pub outcome: AuditOutcome,
    pub details: HashMap<String, String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub container_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_ip: Option<String>,
}

/// Audit event types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuditEventType {
    Authentication,
    ContainerLifecycle,
    CommandExecution,
}

/// Audit outcome
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuditOutcome {
    Success,
    Failure,
    Denied,
}

/// SIEM export format
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SiemFormat {
    Syslog,
    Cef,
    Json,
}

impl std::str::FromStr for SiemFormat {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "json" => Ok(SiemFormat::Json),
            "cef" => Ok(SiemFormat::Cef),
            "syslog" => Ok(SiemFormat::Syslog),
            other => anyhow::bail!("Unknown audit format: {}", other),
        }
    }
}

/// Audit logger for SIEM export
pub struct AuditLogger {
    format: SiemFormat,
}

/// Private enterprise number used as the syslog SD-ID suffix
const SD_ID: &str = "berth@32473";

impl AuditLogger {
    pub fn new(format: SiemFormat) -> Self {
        Self { format }
    }

    /// Log an audit event on the `audit` target
    pub fn log(&self, event: &AuditEvent) {
        info!(target: "audit", "{}", self.format(event));
    }

    /// Render an event in the configured format
    pub fn format(&self, event: &AuditEvent) -> String {
        match self.format {
            SiemFormat::Syslog => syslog_line(event),
            SiemFormat::Cef => cef_line(event),
            SiemFormat::Json => serde_json::to_string(event).unwrap_or_else(|_| "{}".to_string()),
        }
    }
}

impl AuditEventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditEventType::Authentication => "AUTHENTICATION",
            AuditEventType::ContainerLifecycle => "CONTAINER_LIFECYCLE",
            AuditEventType::CommandExecution => "COMMAND_EXECUTION",
        }
    }
}

impl AuditOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditOutcome::Success => "SUCCESS",
            AuditOutcome::Failure => "FAILURE",
            AuditOutcome::Denied => "DENIED",
        }
    }
}

/// Detail pairs in key order, so output is stable
fn sorted_details(event: &AuditEvent) -> Vec<(&str, &str)> {
    let mut pairs: Vec<(&str, &str)> = event
        .details
        .iter()
        .map(|(k, v)| (k.as_str(), v.as_str()))
        .collect();
    pairs.sort();
    pairs
}

/// RFC 5424 line with the event as structured data
fn syslog_line(event: &AuditEvent) -> String {
    // facility 13 (log audit), severity by outcome
    let severity = match event.outcome {
        AuditOutcome::Success => 6,
        AuditOutcome::Failure => 4,
        AuditOutcome::Denied => 3,
    };
    let priority = 13 * 8 + severity;

    let mut params = vec![
        ("caller", event.caller_id.as_str()),
        ("action", event.action.as_str()),
        ("outcome", event.outcome.as_str()),
    ];
    if let Some(ref container_id) = event.container_id {
        params.push(("container", container_id.as_str()));
    }
    if let Some(ref source_ip) = event.source_ip {
        params.push(("src", source_ip.as_str()));
    }
    params.extend(sorted_details(event));

    let data = params
        .iter()
        .map(|(k, v)| format!("{}=\"{}\"", k, escape_sd_value(v)))
        .collect::<Vec<_>>()
        .join(" ");

    format!(
        "<{}>1 {} berth-orchestrator berth - {} [{} {}]",
        priority,
        event.timestamp.to_rfc3339(),
        event.event_type.as_str(),
        SD_ID,
        data
    )
}

fn escape_sd_value(value: &str) -> String {
    value
        .replace('\\', "\\\\")
        .replace('"', "\\\"")
        .replace(']', "\\]")
}

/// ArcSight Common Event Format line
fn cef_line(event: &AuditEvent) -> String {
    let severity = match event.outcome {
        AuditOutcome::Success => 2,
        AuditOutcome::Failure => 5,
        AuditOutcome::Denied => 8,
    };

    let mut extensions = vec![
        format!("rt={}", event.timestamp.timestamp_millis()),
        format!("suser={}", escape_cef_extension(&event.caller_id)),
        format!("outcome={}", event.outcome.as_str()),
    ];
    if let Some(ref container_id) = event.container_id {
        extensions.push(format!("cs1Label=containerId cs1={}", escape_cef_extension(container_id)));
    }
    if let Some(ref source_ip) = event.source_ip {
        extensions.push(format!("src={}", source_ip));
    }
    for (k, v) in sorted_details(event) {
        extensions.push(format!("{}={}", k, escape_cef_extension(v)));
    }

    format!(
        "CEF:0|Berth|Orchestrator|{}|{}|{}|{}|{}",
        env!("CARGO_PKG_VERSION"),
        event.event_type.as_str(),
        escape_cef_header(&event.action),
        severity,
        extensions.join(" ")
    )
}

fn escape_cef_header(value: &str) -> String {
    value.replace('\\', "\\\\").replace('|', "\\|")
}

fn escape_cef_extension(value: &str) -> String {
    value
        .replace('\\', "\\\\")
        .replace('=', "\\=")
        .replace('\n', "\\n")
}

impl Default for AuditLogger {
    fn default() -> Self {
        Self::new(SiemFormat::Json)
    }
}

/// Audit event for a container lifecycle operation
pub fn create_lifecycle_event(
    caller_id: String,
    container_id: String,
    action: &str,
    outcome: AuditOutcome,
) -> AuditEvent {
    AuditEvent {
        timestamp: Utc::now(),
        event_type: AuditEventType::ContainerLifecycle,
        caller_id,
        action: action.to_string(),
        outcome,
        details: HashMap::new(),
        container_id: (!container_id.is_empty()).then_some(container_id),
        source_ip: None,
    }
}

/// Audit event for a command run inside a container
pub fn create_exec_event(
    caller_id: String,
    container_id: String,
    outcome: AuditOutcome,
    exit_code: Option<i64>,
    duration_ms: u64,
) -> AuditEvent {
    let mut details = HashMap::new();
    details.insert("duration_ms".to_string(), duration_ms.to_string());
    if let Some(code) = exit_code {
        details.insert("exit_code".to_string(), code.to_string());
    }

    AuditEvent {
        timestamp: Utc::now(),
        event_type: AuditEventType::CommandExecution,
        caller_id,
        action: "COMMAND_EXECUTION".to_string(),
        outcome,
        details,
        container_id: Some(container_id),
        source_ip: None,
    }
}

pub fn create_auth_event(
    caller_id: String,
    outcome: AuditOutcome,
    source_ip: Option<String>,
) -> AuditEvent {
    AuditEvent {
        timestamp: Utc::now(),
        event_type: AuditEventType::Authentication,
        caller_id,
        action: "AUTHENTICATION".to_string(),
        outcome,
        details: HashMap::new(),
        container_id: None,
        source_ip,
    }
}
