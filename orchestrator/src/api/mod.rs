//! REST API
//!
//! Container lifecycle under `/api/v1/containers`, plus health and
//! Prometheus endpoints.

mod auth;
mod error;
mod extract;
mod handlers;

use std::sync::Arc;

use axum::{
    routing::{get, post},
    Router,
};

use crate::AppState;

pub use auth::{create_jwt, hash_api_key, Caller, ANONYMOUS};
pub use error::ApiError;
pub use extract::ApiJson;

/// Create the main application router
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        // Health check (no auth)
        .route("/health", get(handlers::health::health_check))
        // Prometheus metrics (no auth for scraping)
        .route("/metrics", get(crate::metrics::metrics_handler))
        .nest("/api/v1", api_v1_routes())
        .with_state(state)
}

/// API v1 routes
fn api_v1_routes() -> Router<Arc<AppState>> {
    use handlers::containers;

    Router::new()
        .route(
            "/containers",
            post(containers::create_container).get(containers::list_containers),
        )
        .route(
            "/containers/:id",
            get(containers::get_container).delete(containers::destroy_container),
        )
        .route("/containers/:id/start", post(containers::start_container))
        .route("/containers/:id/stop", post(containers::stop_container))
        .route("/containers/:id/exec", post(containers::exec_command))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{
        body::Body,
        http::{Request, StatusCode},
    };
    use pretty_assertions::assert_eq;
    use serde_json::{json, Value};
    use tower::ServiceExt;

    use crate::audit::AuditLogger;
    use crate::config::AppConfig;
    use crate::container::testing::FakeRuntime;
    use crate::container::ContainerManager;

    fn app_with(config: AppConfig) -> Router {
        let manager = ContainerManager::new(&config, Arc::new(FakeRuntime::new()));
        let state = AppState::new(config, manager, Arc::new(AuditLogger::default()));
        create_router(Arc::new(state))
    }

    fn app() -> Router {
        app_with(AppConfig::default())
    }

    async fn send(app: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let request = Request::builder()
            .method(method)
            .uri(uri)
            .header("content-type", "application/json");
        let request = match body {
            Some(body) => request.body(Body::from(body.to_string())).unwrap(),
            None => request.body(Body::empty()).unwrap(),
        };

        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or(Value::Null)
        };
        (status, value)
    }

    async fn create(app: &Router) -> String {
        let (status, body) = send(
            app,
            "POST",
            "/api/v1/containers",
            Some(json!({
                "image": "node:20-alpine",
                "name": "todo-app",
                "ports": [{ "containerPort": 3000 }],
                "conversationId": "conv-1"
            })),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        body["container"]["id"].as_str().unwrap().to_string()
    }

    #[tokio::test]
    async fn test_health() {
        let (status, body) = send(&app(), "GET", "/health", None).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "healthy");
        assert_eq!(body["dockerVersion"], "fake");
        assert_eq!(body["activeContainers"], 0);
    }

    #[tokio::test]
    async fn test_unknown_container_is_not_found() {
        let app = app();

        for (method, uri) in [
            ("GET", "/api/v1/containers/missing"),
            ("DELETE", "/api/v1/containers/missing"),
            ("POST", "/api/v1/containers/missing/start"),
            ("POST", "/api/v1/containers/missing/stop"),
        ] {
            let (status, body) = send(&app, method, uri, None).await;
            assert_eq!(status, StatusCode::NOT_FOUND, "{} {}", method, uri);
            assert_eq!(body["error"], "NOT_FOUND");
        }

        let (status, _) = send(
            &app,
            "POST",
            "/api/v1/containers/missing/exec",
            Some(json!({ "command": "ls" })),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_create_start_exposes_base_url() {
        let app = app();
        let id = create(&app).await;

        let (status, body) = send(&app, "GET", &format!("/api/v1/containers/{}", id), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["container"]["status"], "creating");
        assert!(body.get("baseUrl").is_none());

        let (status, body) =
            send(&app, "POST", &format!("/api/v1/containers/{}/start", id), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["container"]["status"], "running");

        let host_port = FakeRuntime::assigned_port(3000);
        assert_eq!(
            body["baseUrl"],
            format!("http://localhost:{}", host_port).as_str()
        );

        let (status, body) = send(&app, "GET", "/api/v1/containers", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["total"], 1);
    }

    #[tokio::test]
    async fn test_exec_flow() {
        let app = app();
        let id = create(&app).await;
        let exec_uri = format!("/api/v1/containers/{}/exec", id);

        let (status, body) = send(&app, "POST", &exec_uri, Some(json!({ "command": "   " }))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "BAD_REQUEST");

        send(&app, "POST", &format!("/api/v1/containers/{}/start", id), None).await;

        let (status, body) = send(&app, "POST", &exec_uri, Some(json!({ "command": "exit 3" }))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["exitCode"], 3);

        let (status, body) =
            send(&app, "POST", &format!("/api/v1/containers/{}/stop", id), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["container"]["status"], "stopped");

        let (_, body) = send(&app, "GET", &format!("/api/v1/containers/{}", id), None).await;
        assert!(body.get("baseUrl").is_none());

        let (status, body) = send(&app, "POST", &exec_uri, Some(json!({ "command": "ls" }))).await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["error"], "CONFLICT");
    }

    async fn send_raw(app: &Router, uri: &str, content_type: &str, body: &str) -> (StatusCode, Value) {
        let request = Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", content_type)
            .body(Body::from(body.to_string()))
            .unwrap();

        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[tokio::test]
    async fn test_malformed_bodies_use_error_payload() {
        let app = app();
        let id = create(&app).await;
        let exec_uri = format!("/api/v1/containers/{}/exec", id);

        let (status, body) = send_raw(&app, &exec_uri, "application/json", "not json").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "BAD_REQUEST");
        assert!(body["message"].is_string());

        let (status, body) =
            send_raw(&app, &exec_uri, "application/json", r#"{"command": 42}"#).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "BAD_REQUEST");

        let (status, body) =
            send_raw(&app, "/api/v1/containers", "text/plain", r#"{"image": "node"}"#).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "BAD_REQUEST");
    }

    #[tokio::test]
    async fn test_metrics_endpoint_renders_counters() {
        crate::metrics::init_metrics().unwrap();
        let app = app();
        let id = create(&app).await;
        send(&app, "POST", &format!("/api/v1/containers/{}/start", id), None).await;

        let request = Request::builder()
            .uri("/metrics")
            .body(Body::empty())
            .unwrap();
        let response = app.clone().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let text = String::from_utf8(bytes.to_vec()).unwrap();
        assert!(text.contains("berth_lifecycle_operations_total"), "{}", text);
        assert!(text.contains(r#"operation="start""#), "{}", text);
        assert!(text.contains("berth_active_containers"), "{}", text);
    }

    #[tokio::test]
    async fn test_destroy_removes_container() {
        let app = app();
        let id = create(&app).await;
        let uri = format!("/api/v1/containers/{}", id);

        let (status, body) = send(&app, "DELETE", &uri, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["success"], true);

        let (status, _) = send(&app, "GET", &uri, None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_require_auth_rejects_anonymous_callers() {
        let mut config = AppConfig::default();
        config.security.require_auth = true;
        config.security.admin_token = Some("admin-secret".to_string());
        let app = app_with(config);

        let (status, body) = send(&app, "GET", "/api/v1/containers", None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["error"], "UNAUTHORIZED");

        let request = Request::builder()
            .uri("/api/v1/containers")
            .header("X-API-Key", "admin-secret")
            .body(Body::empty())
            .unwrap();
        let response = app.clone().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        // health stays open
        let (status, _) = send(&app, "GET", "/health", None).await;
        assert_eq!(status, StatusCode::OK);
    }
}
