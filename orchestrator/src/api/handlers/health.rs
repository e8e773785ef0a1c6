//! Health check handler

use std::sync::Arc;

use axum::{extract::State, Json};

use crate::models::{HealthResponse, HealthStatus};
use crate::AppState;

/// Health check endpoint
pub async fn health_check(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    let uptime = state.started_at.elapsed().as_secs();
    let active_containers = state.container_manager.active_count().await;
    let docker_version = state.container_manager.runtime_version().await;

    let status = if docker_version.is_some() {
        HealthStatus::Healthy
    } else {
        HealthStatus::Degraded
    };

    Json(HealthResponse {
        status,
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_seconds: uptime,
        active_containers,
        docker_version,
    })
}
