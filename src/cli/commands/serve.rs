//! HTTP API server for submitting and polling clip tasks.

use crate::cli::Output;
use crate::config::Settings;
use crate::error::KlippError;
use crate::orchestrator::ClipService;
use crate::source::SourceRef;
use crate::task::{Clip, ProgressSnapshot, Task, TaskId};
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};

/// Shared application state.
struct AppState {
    service: ClipService,
}

/// Run the HTTP API server.
pub async fn run_serve(host: Option<String>, port: Option<u16>, settings: Settings) -> anyhow::Result<()> {
    let service = ClipService::from_settings(&settings)?;

    let recovered = service.recover_interrupted().await?;
    if !recovered.is_empty() {
        Output::warning(&format!(
            "Marked {} unfinished task(s) from a previous run as interrupted",
            recovered.len()
        ));
    }

    let app = router(service);

    let host = host.unwrap_or_else(|| settings.server.host.clone());
    let port = port.unwrap_or(settings.server.port);
    let addr = format!("{}:{}", host, port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    Output::header("Klipp API Server");
    println!();
    Output::success(&format!("Listening on http://{}", addr));
    println!();
    println!("Endpoints:");
    Output::kv("Health", "GET  /health");
    Output::kv("Submit", "POST /tasks");
    Output::kv("List", "GET  /tasks");
    Output::kv("Progress", "GET  /tasks/{id}");
    Output::kv("Clips", "GET  /tasks/{id}/clips");
    Output::kv("Cancel", "POST /tasks/{id}/cancel");
    println!();
    Output::info("Press Ctrl+C to stop the server.");

    axum::serve(listener, app).await?;

    Ok(())
}

fn router(service: ClipService) -> Router {
    let state = Arc::new(AppState { service });

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health))
        .route("/tasks", post(submit_task).get(list_tasks))
        .route("/tasks/{id}", get(get_progress))
        .route("/tasks/{id}/clips", get(get_clips))
        .route("/tasks/{id}/cancel", post(cancel_task))
        .layer(cors)
        .with_state(state)
}

// === Request/Response Types ===

#[derive(Deserialize)]
struct SubmitRequest {
    /// Video URL, YouTube ID or local file path
    source: String,
    #[serde(default = "default_owner")]
    owner: String,
}

fn default_owner() -> String {
    "api".to_string()
}

#[derive(Serialize, Deserialize)]
struct SubmitResponse {
    task_id: TaskId,
}

#[derive(Serialize)]
struct ClipsResponse {
    task_id: TaskId,
    clips: Vec<Clip>,
}

#[derive(Serialize)]
struct CancelResponse {
    task_id: TaskId,
    cancelled: bool,
}

#[derive(Serialize)]
struct TaskListResponse {
    tasks: Vec<Task>,
    total: usize,
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

/// Maps library errors onto HTTP responses.
struct ApiError(KlippError);

impl From<KlippError> for ApiError {
    fn from(e: KlippError) -> Self {
        Self(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            KlippError::TaskNotFound(_) => StatusCode::NOT_FOUND,
            KlippError::InvalidInput(_) => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (
            status,
            Json(ErrorResponse {
                error: self.0.to_string(),
            }),
        )
            .into_response()
    }
}

type ApiResult<T> = std::result::Result<Json<T>, ApiError>;

fn parse_id(raw: &str) -> std::result::Result<TaskId, ApiError> {
    raw.parse()
        .map_err(|_| ApiError(KlippError::InvalidInput(format!("invalid task id: {}", raw))))
}

// === Handlers ===

async fn health() -> impl IntoResponse {
    Json(serde_json::json!({ "status": "ok" }))
}

async fn submit_task(
    State(state): State<Arc<AppState>>,
    Json(req): Json<SubmitRequest>,
) -> std::result::Result<(StatusCode, Json<SubmitResponse>), ApiError> {
    let source = SourceRef::parse(&req.source)?;
    let task_id = state.service.submit_task(source, &req.owner).await?;
    Ok((StatusCode::ACCEPTED, Json(SubmitResponse { task_id })))
}

async fn list_tasks(State(state): State<Arc<AppState>>) -> ApiResult<TaskListResponse> {
    let tasks = state.service.list_tasks().await?;
    Ok(Json(TaskListResponse {
        total: tasks.len(),
        tasks,
    }))
}

async fn get_progress(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<ProgressSnapshot> {
    let id = parse_id(&id)?;
    Ok(Json(state.service.get_progress(id).await?))
}

async fn get_clips(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<ClipsResponse> {
    let task_id = parse_id(&id)?;
    let clips = state.service.get_clips(task_id).await?;
    Ok(Json(ClipsResponse { task_id, clips }))
}

async fn cancel_task(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<CancelResponse> {
    let task_id = parse_id(&id)?;
    let cancelled = state.service.cancel_task(task_id).await?;
    Ok(Json(CancelResponse { task_id, cancelled }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_found_maps_to_404() {
        let response = ApiError(KlippError::TaskNotFound("x".into())).into_response();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let response = ApiError(KlippError::Cancelled).into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn test_parse_id_rejects_garbage() {
        let err = parse_id("not-a-uuid").err().unwrap();
        assert!(matches!(err.0, KlippError::InvalidInput(_)));
    }
}
