//! Configuration module for the Berth orchestrator
//!
//! Supports configuration via:
//! - YAML/TOML/JSON config files
//! - Environment variables: `BERTH__` prefix, `__` between nested keys
//!   (e.g. `BERTH__RUNTIME__DOCKER_HOST`)

use std::collections::HashMap;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Main application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Host to bind to
    #[serde(default = "default_host")]
    pub host: String,

    /// Port to listen on
    #[serde(default = "default_port")]
    pub port: u16,

    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Audit log format (json, cef, syslog)
    #[serde(default = "default_audit_format")]
    pub audit_format: String,

    /// Tear down every managed container when the service shuts down
    #[serde(default = "default_true")]
    pub stop_containers_on_shutdown: bool,

    /// Docker Engine connection and container defaults
    #[serde(default)]
    pub runtime: RuntimeConfig,

    /// Preview URL derivation
    #[serde(default)]
    pub preview: PreviewConfig,

    /// Command execution settings
    #[serde(default)]
    pub exec: ExecConfig,

    /// Security settings
    #[serde(default)]
    pub security: SecurityConfig,

    /// Metrics settings
    #[serde(default)]
    pub metrics: MetricsConfig,
}

/// Docker Engine connection settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeConfig {
    /// Docker host: socket path, unix://, tcp:// or http:// URL.
    /// Falls back to DOCKER_HOST / the platform socket when unset.
    #[serde(default)]
    pub docker_host: Option<String>,

    /// Connection timeout in seconds
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_seconds: u64,

    /// Grace period before a stop turns into a kill
    #[serde(default = "default_stop_timeout")]
    pub stop_timeout_seconds: i64,

    /// Host address that published ports bind to
    #[serde(default = "default_bind_address")]
    pub bind_address: String,

    /// Pull images that are not present locally before creating
    #[serde(default = "default_true")]
    pub pull_missing_images: bool,
}

/// Preview URL settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PreviewConfig {
    /// URL scheme (http or https)
    #[serde(default = "default_scheme")]
    pub scheme: String,

    /// Externally reachable host name
    #[serde(default = "default_preview_host")]
    pub host: String,
}

/// Command execution settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecConfig {
    /// Largest accepted command, in bytes
    #[serde(default = "default_max_command_bytes")]
    pub max_command_bytes: usize,

    /// Shell used to interpret commands
    #[serde(default = "default_shell")]
    pub shell: String,
}

/// Security configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecurityConfig {
    /// Reject unauthenticated API requests
    #[serde(default)]
    pub require_auth: bool,

    /// JWT secret for API authentication
    #[serde(default = "default_jwt_secret")]
    pub jwt_secret: String,

    /// Static admin token
    #[serde(default)]
    pub admin_token: Option<String>,

    /// API keys (caller id -> argon2 hash)
    #[serde(default)]
    pub api_keys: HashMap<String, String>,
}

/// Metrics configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    /// Enable Prometheus metrics endpoint
    #[serde(default = "default_true")]
    pub enabled: bool,
}

// Default value functions
fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_audit_format() -> String {
    "json".to_string()
}

fn default_connect_timeout() -> u64 {
    120
}

fn default_stop_timeout() -> i64 {
    10
}

fn default_bind_address() -> String {
    "127.0.0.1".to_string()
}

fn default_scheme() -> String {
    "http".to_string()
}

fn default_preview_host() -> String {
    "localhost".to_string()
}

fn default_max_command_bytes() -> usize {
    64 * 1024
}

fn default_shell() -> String {
    "sh".to_string()
}

fn default_true() -> bool {
    true
}

fn default_jwt_secret() -> String {
    // Random per process unless configured
    use rand::Rng;
    let secret: [u8; 32] = rand::thread_rng().gen();
    base64::Engine::encode(&base64::engine::general_purpose::STANDARD, secret)
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            docker_host: None,
            connect_timeout_seconds: default_connect_timeout(),
            stop_timeout_seconds: default_stop_timeout(),
            bind_address: default_bind_address(),
            pull_missing_images: true,
        }
    }
}

impl Default for PreviewConfig {
    fn default() -> Self {
        Self {
            scheme: default_scheme(),
            host: default_preview_host(),
        }
    }
}

impl Default for ExecConfig {
    fn default() -> Self {
        Self {
            max_command_bytes: default_max_command_bytes(),
            shell: default_shell(),
        }
    }
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            require_auth: false,
            jwt_secret: default_jwt_secret(),
            admin_token: None,
            api_keys: HashMap::new(),
        }
    }
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self { enabled: true }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            log_level: default_log_level(),
            audit_format: default_audit_format(),
            stop_containers_on_shutdown: true,
            runtime: RuntimeConfig::default(),
            preview: PreviewConfig::default(),
            exec: ExecConfig::default(),
            security: SecurityConfig::default(),
            metrics: MetricsConfig::default(),
        }
    }
}

impl AppConfig {
    /// Load configuration from file and environment variables
    pub fn load() -> Result<Self> {
        let _ = dotenvy::dotenv();

        let config = config::Config::builder()
            .add_source(config::Config::try_from(&AppConfig::default())?)
            .add_source(config::File::with_name("config/berth").required(false))
            .add_source(config::File::with_name("/etc/berth/config").required(false))
            // BERTH__RUNTIME__DOCKER_HOST=... style overrides
            .add_source(
                config::Environment::with_prefix("BERTH")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .context("Failed to build configuration")?;

        let app_config: AppConfig = config
            .try_deserialize()
            .context("Failed to deserialize configuration")?;

        app_config.validate()?;

        Ok(app_config)
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        if self.port == 0 {
            anyhow::bail!("Port cannot be 0");
        }

        if self.runtime.stop_timeout_seconds <= 0 {
            anyhow::bail!("Stop timeout must be positive");
        }

        if self.preview.host.trim().is_empty() {
            anyhow::bail!("Preview host cannot be empty");
        }

        if !matches!(self.preview.scheme.as_str(), "http" | "https") {
            anyhow::bail!("Unsupported preview scheme: {}", self.preview.scheme);
        }

        if !matches!(self.audit_format.as_str(), "json" | "cef" | "syslog") {
            anyhow::bail!("Unsupported audit format: {}", self.audit_format);
        }

        if self.exec.max_command_bytes == 0 {
            anyhow::bail!("max_command_bytes cannot be 0");
        }

        if self.security.jwt_secret.len() < 16 {
            anyhow::bail!("JWT secret must be at least 16 characters");
        }

        Ok(())
    }

    /// Address the HTTP server binds to
    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.port, 8080);
        assert_eq!(config.preview.scheme, "http");
        assert_eq!(config.preview.host, "localhost");
        assert_eq!(config.runtime.stop_timeout_seconds, 10);
        assert!(!config.security.require_auth);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validation() {
        let config = AppConfig {
            port: 0,
            ..AppConfig::default()
        };
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.preview.scheme = "ftp".to_string();
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.runtime.stop_timeout_seconds = 0;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.security.jwt_secret = "short".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_env_overrides_use_double_underscore() {
        std::env::set_var("BERTH__RUNTIME__DOCKER_HOST", "tcp://docker.internal:2375");
        std::env::set_var("BERTH__PREVIEW__HOST", "preview.internal");
        let config = AppConfig::load();
        std::env::remove_var("BERTH__RUNTIME__DOCKER_HOST");
        std::env::remove_var("BERTH__PREVIEW__HOST");

        let config = config.unwrap();
        assert_eq!(
            config.runtime.docker_host.as_deref(),
            Some("tcp://docker.internal:2375")
        );
        assert_eq!(config.preview.host, "preview.internal");
    }

    #[test]
    fn test_generated_jwt_secret_is_long_enough() {
        assert!(default_jwt_secret().len() >= 16);
    }
}
