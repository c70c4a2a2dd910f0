//! JSON REST API over a [`Storage`], wired to the reminder scheduler.
//!
//! Every successful task mutation that can move a reminder instant calls
//! `notify_tasks_changed` so reminders are re-evaluated right away: creates,
//! deletes, list deletion, import, and updates touching completion, due date
//! or reminder offset.

use std::future::Future;
use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use tasklist_core::{
    ListPatch, NewList, NewTask, ReminderScheduler, TaskPatch, TaskQuery, Visibility,
};
use tasklist_store::{export, import, ImportMode, ImportPayload, Storage, StoreError};
use tokio::net::TcpListener;

#[derive(Clone)]
pub struct AppState {
    pub storage: Arc<dyn Storage>,
    pub scheduler: Arc<ReminderScheduler>,
}

#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    NotFound(&'static str),
    Internal { error: &'static str, details: String },
}

impl ApiError {
    fn internal(error: &'static str, e: impl std::fmt::Display) -> Self {
        ApiError::Internal {
            error,
            details: e.to_string(),
        }
    }

    fn from_store(error: &'static str, e: StoreError) -> Self {
        match e {
            StoreError::Validation(_) | StoreError::UnknownList(_) => ApiError::BadRequest(e.to_string()),
            other => {
                tracing::error!(error = %other, "{}", error);
                ApiError::internal(error, other)
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, Json(json!({"error": msg}))).into_response(),
            ApiError::NotFound(what) => (StatusCode::NOT_FOUND, Json(json!({"error": what}))).into_response(),
            ApiError::Internal { error, details } => (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({"error": error, "details": details})),
            )
                .into_response(),
        }
    }
}

type ApiResult<T> = Result<T, ApiError>;

const TASK_NOT_FOUND: &str = "Task not found";
const LIST_NOT_FOUND: &str = "List not found";

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/health", get(health))
        .route("/api/tasks", get(list_tasks).post(create_task))
        .route("/api/tasks/{id}", get(get_task).patch(update_task).delete(delete_task))
        .route("/api/lists", get(list_lists).post(create_list))
        .route("/api/lists/{id}", get(get_list).patch(update_list).delete(delete_list))
        .route("/api/export", get(export_data))
        .route("/api/import", post(import_data))
        .route("/api/reminders", get(reminder_status))
        .route("/api/reminders/visibility", post(set_visibility))
        .route("/api/reminders/permission", post(request_permission))
        .with_state(state)
}

/// Serve until `shutdown` resolves.
pub async fn serve(
    listener: TcpListener,
    state: AppState,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> anyhow::Result<()> {
    let local_addr = listener.local_addr()?;
    tracing::info!("tasklist API listening on http://{local_addr}");
    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown)
        .await?;
    Ok(())
}

// Bodies are parsed by hand so schema errors come back as 400 with our shape.
fn parse_body<T: DeserializeOwned>(body: Value) -> ApiResult<T> {
    serde_json::from_value(body).map_err(|e| ApiError::BadRequest(e.to_string()))
}

async fn health() -> impl IntoResponse {
    Json(json!({"status": "ok"}))
}

async fn list_tasks(State(state): State<AppState>, Query(query): Query<TaskQuery>) -> ApiResult<impl IntoResponse> {
    let tasks = state
        .storage
        .tasks()
        .map_err(|e| ApiError::from_store("Failed to fetch tasks", e))?;
    let filtered: Vec<_> = query.apply(&tasks).into_iter().cloned().collect();
    Ok(Json(filtered))
}

async fn get_task(State(state): State<AppState>, Path(id): Path<String>) -> ApiResult<impl IntoResponse> {
    state
        .storage
        .task(&id)
        .map_err(|e| ApiError::from_store("Failed to fetch task", e))?
        .map(Json)
        .ok_or(ApiError::NotFound(TASK_NOT_FOUND))
}

async fn create_task(State(state): State<AppState>, Json(body): Json<Value>) -> ApiResult<impl IntoResponse> {
    let new: NewTask = parse_body(body)?;
    let task = state
        .storage
        .create_task(new)
        .map_err(|e| ApiError::from_store("Failed to create task", e))?;
    state.scheduler.notify_tasks_changed();
    Ok((StatusCode::CREATED, Json(task)))
}

async fn update_task(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<Value>,
) -> ApiResult<impl IntoResponse> {
    let patch: TaskPatch = parse_body(body)?;
    let touches_reminder = patch.touches_reminder();
    let task = state
        .storage
        .update_task(&id, patch)
        .map_err(|e| ApiError::from_store("Failed to update task", e))?
        .ok_or(ApiError::NotFound(TASK_NOT_FOUND))?;
    if touches_reminder {
        state.scheduler.notify_tasks_changed();
    }
    Ok(Json(task))
}

async fn delete_task(State(state): State<AppState>, Path(id): Path<String>) -> ApiResult<impl IntoResponse> {
    let deleted = state
        .storage
        .delete_task(&id)
        .map_err(|e| ApiError::from_store("Failed to delete task", e))?;
    if !deleted {
        return Err(ApiError::NotFound(TASK_NOT_FOUND));
    }
    state.scheduler.notify_tasks_changed();
    Ok(StatusCode::NO_CONTENT)
}

async fn list_lists(State(state): State<AppState>) -> ApiResult<impl IntoResponse> {
    let lists = state
        .storage
        .lists()
        .map_err(|e| ApiError::from_store("Failed to fetch lists", e))?;
    Ok(Json(lists))
}

async fn get_list(State(state): State<AppState>, Path(id): Path<String>) -> ApiResult<impl IntoResponse> {
    state
        .storage
        .list(&id)
        .map_err(|e| ApiError::from_store("Failed to fetch list", e))?
        .map(Json)
        .ok_or(ApiError::NotFound(LIST_NOT_FOUND))
}

async fn create_list(State(state): State<AppState>, Json(body): Json<Value>) -> ApiResult<impl IntoResponse> {
    let new: NewList = parse_body(body)?;
    let list = state
        .storage
        .create_list(new)
        .map_err(|e| ApiError::from_store("Failed to create list", e))?;
    Ok((StatusCode::CREATED, Json(list)))
}

async fn update_list(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<Value>,
) -> ApiResult<impl IntoResponse> {
    let patch: ListPatch = parse_body(body)?;
    state
        .storage
        .update_list(&id, patch)
        .map_err(|e| ApiError::from_store("Failed to update list", e))?
        .map(Json)
        .ok_or(ApiError::NotFound(LIST_NOT_FOUND))
}

async fn delete_list(State(state): State<AppState>, Path(id): Path<String>) -> ApiResult<impl IntoResponse> {
    let deleted = state
        .storage
        .delete_list(&id)
        .map_err(|e| ApiError::from_store("Failed to delete list", e))?;
    if !deleted {
        return Err(ApiError::NotFound(LIST_NOT_FOUND));
    }
    state.scheduler.notify_tasks_changed();
    Ok(StatusCode::NO_CONTENT)
}

async fn export_data(State(state): State<AppState>) -> ApiResult<impl IntoResponse> {
    let snapshot = export(state.storage.as_ref()).map_err(|e| ApiError::from_store("Failed to export data", e))?;
    Ok(Json(snapshot))
}

#[derive(Deserialize)]
struct ImportRequest {
    #[serde(default)]
    mode: Option<String>,
    #[serde(flatten)]
    payload: ImportPayload,
}

async fn import_data(State(state): State<AppState>, Json(body): Json<Value>) -> ApiResult<impl IntoResponse> {
    let req: ImportRequest = parse_body(body)?;
    let mode: ImportMode = req
        .mode
        .as_deref()
        .unwrap_or_default()
        .parse()
        .map_err(|_| ApiError::BadRequest("Invalid mode. Must be 'replace' or 'merge'".to_string()))?;

    let summary = import(state.storage.as_ref(), req.payload, mode)
        .map_err(|e| ApiError::from_store("Failed to import data", e))?;
    state.scheduler.notify_tasks_changed();
    Ok(Json(json!({
        "success": true,
        "imported": summary,
    })))
}

async fn reminder_status(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.scheduler.status())
}

#[derive(Deserialize)]
struct VisibilityBody {
    visible: bool,
}

async fn set_visibility(State(state): State<AppState>, Json(body): Json<Value>) -> ApiResult<impl IntoResponse> {
    let body: VisibilityBody = parse_body(body)?;
    let visibility = if body.visible {
        Visibility::Visible
    } else {
        Visibility::Hidden
    };
    state.scheduler.set_visibility(visibility);
    Ok(Json(json!({"visibility": visibility})))
}

async fn request_permission(State(state): State<AppState>) -> impl IntoResponse {
    let permission = state.scheduler.request_permission().await;
    Json(json!({"permission": permission}))
}
