//! Preview URL resolution

use crate::config::PreviewConfig;
use crate::models::{ContainerRecord, ContainerStatus, Protocol};

/// Derives externally reachable preview URLs from port mappings
#[derive(Debug, Clone)]
pub struct PreviewResolver {
    scheme: String,
    host: String,
}

impl PreviewResolver {
    pub fn new(config: &PreviewConfig) -> Self {
        Self {
            scheme: config.scheme.clone(),
            host: config.host.clone(),
        }
    }

    /// URL for the record's first port mapping.
    ///
    /// Only a running container with a TCP first mapping and a known host
    /// port has one; nothing answers HTTP anywhere else.
    pub fn base_url(&self, record: &ContainerRecord) -> Option<String> {
        if record.status != ContainerStatus::Running {
            return None;
        }

        let first = record.ports.first()?;
        if first.protocol != Protocol::Tcp {
            return None;
        }

        let host_port = first.host_port?;
        Some(format!("{}://{}:{}", self.scheme, self.host, host_port))
    }
}

impl Default for PreviewResolver {
    fn default() -> Self {
        Self::new(&PreviewConfig::default())
    }
}
