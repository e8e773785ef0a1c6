//! Berth orchestrator library
//!
//! Provisions Docker containers for generated applications, runs shell
//! commands inside them and hands out preview URLs.

use std::sync::Arc;
use std::time::Instant;

pub mod api;
pub mod audit;
pub mod config;
pub mod container;
pub mod logging;
pub mod metrics;
pub mod models;

/// Application state shared across all handlers
pub struct AppState {
    pub config: config::AppConfig,
    pub container_manager: container::ContainerManager,
    pub audit_logger: Arc<audit::AuditLogger>,
    pub started_at: Instant,
}

impl AppState {
    pub fn new(
        config: config::AppConfig,
        container_manager: container::ContainerManager,
        audit_logger: Arc<audit::AuditLogger>,
    ) -> Self {
        Self {
            config,
            container_manager,
            audit_logger,
            started_at: Instant::now(),
        }
    }
}
