use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use code_exec::{ExecutionConfig, ExecutionCoordinator, ExecutionRequest, Language};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::{net::SocketAddr, time::Duration};
use thiserror::Error;
use tokio::net::TcpListener;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{info, warn};

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("Execution error: {0}")]
    ExecutionError(#[from] code_exec::Error),
    #[error("Server error: {0}")]
    ServerError(String),
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ServerError::ExecutionError(_) => (StatusCode::INTERNAL_SERVER_ERROR, self.to_string()),
            ServerError::ServerError(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Internal server error".to_string(),
            ),
        };

        (status, Json(json!({ "error": message }))).into_response()
    }
}

#[derive(Debug, Deserialize, Serialize)]
pub struct ExecuteRequest {
    pub code: String,
    /// Seconds; only ever shortens the configured timeout
    pub timeout: Option<u64>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ExecuteResponse {
    pub stdout: String,
    pub stderr: String,
    /// `PASSED` or `FAILED`
    pub status: String,
    /// The finer-grained status behind `status`
    pub outcome: String,
    pub language: Language,
    pub execution_time_ms: u64,
}

#[derive(Clone)]
pub struct AppState {
    coordinator: ExecutionCoordinator,
}

pub async fn create_app(config: ExecutionConfig) -> Result<Router, ServerError> {
    let coordinator = ExecutionCoordinator::new(config)
        .await
        .map_err(ServerError::ExecutionError)?;
    Ok(router(coordinator))
}

/// Routes over an already constructed coordinator
pub fn router(coordinator: ExecutionCoordinator) -> Router {
    let state = AppState { coordinator };

    let cors = CorsLayer::permissive();

    Router::new()
        .route("/health", get(health_check))
        .route("/languages", get(languages))
        .route("/execute", post(execute))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

pub async fn run_server(app: Router, addr: SocketAddr) -> Result<(), ServerError> {
    info!("Starting code execution server on {}", addr);
    let listener = TcpListener::bind(addr)
        .await
        .map_err(|e| ServerError::ServerError(e.to_string()))?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|e| ServerError::ServerError(e.to_string()))?;

    info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for Ctrl-C: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown requested, draining in-flight executions");
}

async fn health_check() -> &'static str {
    "OK"
}

async fn languages(State(state): State<AppState>) -> Json<Vec<Language>> {
    Json(state.coordinator.registry().languages())
}

async fn execute(
    State(state): State<AppState>,
    Json(payload): Json<ExecuteRequest>,
) -> Json<ExecuteResponse> {
    let mut request = ExecutionRequest::new(payload.code);
    if let Some(secs) = payload.timeout {
        request = request.with_timeout(Duration::from_secs(secs));
    }

    let result = state.coordinator.run(request).await;

    Json(ExecuteResponse {
        status: result.display_status().to_string(),
        outcome: result.status.to_string(),
        language: result.language,
        execution_time_ms: result.duration.as_millis() as u64,
        stdout: result.stdout,
        stderr: result.stderr,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{body::Body, http::Request};
    use code_exec::IsolationMode;
    use tower::ServiceExt;

    async fn test_app(work_root: &tempfile::TempDir) -> Router {
        let config = ExecutionConfig {
            timeout_seconds: 5,
            isolation: IsolationMode::None,
            work_root: Some(work_root.path().to_path_buf()),
            ..ExecutionConfig::default()
        };
        create_app(config).await.expect("Failed to create app")
    }

    async fn post_execute(app: Router, body: String) -> (StatusCode, Vec<u8>) {
        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/execute")
                    .header("content-type", "application/json")
                    .body(Body::from(body))
                    .unwrap(),
            )
            .await
            .unwrap();

        let status = response.status();
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, body.to_vec())
    }

    #[tokio::test]
    async fn test_health_check() {
        let work_root = tempfile::tempdir().unwrap();
        let app = test_app(&work_root).await;

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/health")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_languages() {
        let work_root = tempfile::tempdir().unwrap();
        let app = test_app(&work_root).await;

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/languages")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let languages: Vec<String> = serde_json::from_slice(&body).unwrap();
        assert_eq!(languages, ["java", "cpp", "node", "python", "bash"]);
    }

    #[tokio::test]
    async fn test_execute() {
        let work_root = tempfile::tempdir().unwrap();
        let app = test_app(&work_root).await;

        let request = ExecuteRequest {
            code: "echo hi".to_string(),
            timeout: None,
        };
        let (status, body) = post_execute(app, serde_json::to_string(&request).unwrap()).await;
        assert_eq!(status, StatusCode::OK);

        let result: ExecuteResponse = serde_json::from_slice(&body).unwrap();
        assert_eq!(result.stdout, "hi");
        assert_eq!(result.stderr, "(No Errors)");
        assert_eq!(result.status, "PASSED");
        assert_eq!(result.outcome, "passed");
        assert_eq!(result.language, Language::Bash);
    }

    #[tokio::test]
    async fn test_failures_are_data() {
        let work_root = tempfile::tempdir().unwrap();
        let app = test_app(&work_root).await;

        let request = ExecuteRequest {
            code: "Nothing here looks like a program.".to_string(),
            timeout: None,
        };
        let (status, body) = post_execute(app, serde_json::to_string(&request).unwrap()).await;
        assert_eq!(status, StatusCode::OK);

        let result: ExecuteResponse = serde_json::from_slice(&body).unwrap();
        assert_eq!(result.status, "FAILED");
        assert_eq!(result.outcome, "unsupported_language");
        assert_eq!(result.stdout, "");
    }

    #[tokio::test]
    async fn test_request_timeout() {
        let work_root = tempfile::tempdir().unwrap();
        let app = test_app(&work_root).await;

        let request = ExecuteRequest {
            code: "echo start\nsleep 10".to_string(),
            timeout: Some(1),
        };
        let (status, body) = post_execute(app, serde_json::to_string(&request).unwrap()).await;
        assert_eq!(status, StatusCode::OK);

        let result: ExecuteResponse = serde_json::from_slice(&body).unwrap();
        assert_eq!(result.outcome, "timed_out");
        assert_eq!(result.stderr, "Execution timed out.");
        assert!(result.execution_time_ms < 5000);
    }

    #[tokio::test]
    async fn test_malformed_json_rejected() {
        let work_root = tempfile::tempdir().unwrap();
        let app = test_app(&work_root).await;

        let (status, _) = post_execute(app, "{\"code\": ".to_string()).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }
}
