//! Container lifecycle handlers

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};

use crate::api::{ApiError, ApiJson, Caller};
use crate::audit::{create_exec_event, create_lifecycle_event, AuditOutcome};
use crate::models::{
    ContainerListResponse, ContainerResponse, CreateContainerRequest, DeleteResponse, ExecRequest,
    ExecResponse, StopResponse,
};
use crate::AppState;

fn outcome<T, E>(result: &Result<T, E>) -> AuditOutcome {
    if result.is_ok() {
        AuditOutcome::Success
    } else {
        AuditOutcome::Failure
    }
}

/// Provision a new container
pub async fn create_container(
    State(state): State<Arc<AppState>>,
    caller: Caller,
    ApiJson(request): ApiJson<CreateContainerRequest>,
) -> Result<(StatusCode, Json<ContainerResponse>), ApiError> {
    let result = state.container_manager.create(request).await;

    let container_id = result.as_ref().map(|r| r.id.clone()).unwrap_or_default();
    state.audit_logger.log(&create_lifecycle_event(
        caller.caller_id,
        container_id,
        "CONTAINER_CREATE",
        outcome(&result),
    ));

    let record = result?;
    Ok((
        StatusCode::CREATED,
        Json(state.container_manager.describe(record)),
    ))
}

/// List managed containers
pub async fn list_containers(
    State(state): State<Arc<AppState>>,
    _caller: Caller,
) -> Json<ContainerListResponse> {
    let containers: Vec<ContainerResponse> = state
        .container_manager
        .list()
        .await
        .into_iter()
        .map(|record| state.container_manager.describe(record))
        .collect();

    Json(ContainerListResponse {
        total: containers.len() as u64,
        containers,
    })
}

/// Get a container and its preview URL
pub async fn get_container(
    State(state): State<Arc<AppState>>,
    _caller: Caller,
    Path(id): Path<String>,
) -> Result<Json<ContainerResponse>, ApiError> {
    let record = state.container_manager.get(&id).await?;
    Ok(Json(state.container_manager.describe(record)))
}

/// Start a container
pub async fn start_container(
    State(state): State<Arc<AppState>>,
    caller: Caller,
    Path(id): Path<String>,
) -> Result<Json<ContainerResponse>, ApiError> {
    let result = state.container_manager.start(&id).await;
    state.audit_logger.log(&create_lifecycle_event(
        caller.caller_id,
        id,
        "CONTAINER_START",
        outcome(&result),
    ));

    Ok(Json(state.container_manager.describe(result?)))
}

/// Stop a container
pub async fn stop_container(
    State(state): State<Arc<AppState>>,
    caller: Caller,
    Path(id): Path<String>,
) -> Result<Json<StopResponse>, ApiError> {
    let result = state.container_manager.stop(&id).await;
    state.audit_logger.log(&create_lifecycle_event(
        caller.caller_id,
        id,
        "CONTAINER_STOP",
        outcome(&result),
    ));

    Ok(Json(StopResponse { container: result? }))
}

/// Destroy a container
pub async fn destroy_container(
    State(state): State<Arc<AppState>>,
    caller: Caller,
    Path(id): Path<String>,
) -> Result<Json<DeleteResponse>, ApiError> {
    let result = state.container_manager.destroy(&id).await;
    state.audit_logger.log(&create_lifecycle_event(
        caller.caller_id,
        id,
        "CONTAINER_DESTROY",
        outcome(&result),
    ));

    result?;
    Ok(Json(DeleteResponse { success: true }))
}

/// Run a shell command inside a container
pub async fn exec_command(
    State(state): State<Arc<AppState>>,
    caller: Caller,
    Path(id): Path<String>,
    ApiJson(request): ApiJson<ExecRequest>,
) -> Result<Json<ExecResponse>, ApiError> {
    let start_time = std::time::Instant::now();
    let result = state.container_manager.execute_command(&id, request).await;

    let exit_code = result.as_ref().ok().map(|r| r.exit_code);
    state.audit_logger.log(&create_exec_event(
        caller.caller_id,
        id,
        outcome(&result),
        exit_code,
        start_time.elapsed().as_millis() as u64,
    ));

    Ok(Json(result?))
}
