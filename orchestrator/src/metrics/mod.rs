//! Prometheus metrics export
//!
//! Provides metrics endpoint for monitoring and alerting

use std::sync::Arc;

use axum::{extract::State, http::StatusCode, response::IntoResponse};
use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use once_cell::sync::OnceCell;

use crate::AppState;

/// Prometheus metrics recorder, installed once
static METRICS_HANDLE: OnceCell<PrometheusHandle> = OnceCell::new();

/// Initialize metrics system
pub fn init_metrics() -> anyhow::Result<()> {
    METRICS_HANDLE.get_or_try_init(|| {
        PrometheusBuilder::new()
            .set_buckets_for_metric(
                Matcher::Full("berth_exec_duration_seconds".to_string()),
                &[0.01, 0.05, 0.1, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0, 300.0],
            )?
            .install_recorder()
            .map_err(anyhow::Error::from)
    })?;
    Ok(())
}

fn outcome(success: bool) -> &'static str {
    if success {
        "success"
    } else {
        "failure"
    }
}

/// Record a lifecycle operation (create, start, stop, destroy)
pub fn record_lifecycle(operation: &'static str, success: bool) {
    counter!("berth_lifecycle_operations_total", "operation" => operation, "outcome" => outcome(success)).increment(1);
}

/// Record a command run inside a container
pub fn record_exec(duration_secs: f64, success: bool) {
    counter!("berth_exec_total", "outcome" => outcome(success)).increment(1);
    histogram!("berth_exec_duration_seconds").record(duration_secs);
}

/// Prometheus metrics endpoint handler
pub async fn metrics_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let Some(handle) = METRICS_HANDLE.get() else {
        return (StatusCode::NOT_FOUND, "metrics disabled".to_string()).into_response();
    };

    gauge!("berth_active_containers").set(state.container_manager.active_count().await as f64);

    (
        StatusCode::OK,
        [("Content-Type", "text/plain; version=0.0.4")],
        handle.render(),
    )
        .into_response()
}
