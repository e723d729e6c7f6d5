/// Workflow management REST API endpoints
///
/// CRUD over stored workflows plus manual runs, next fire time and run logs.
/// Every save re-syncs the workflow's schedule; an invalid cron is answered
/// with 422 and the workflow is stored but left unscheduled.

use crate::{
    error::SchedulingError,
    notification::SharedNotificationSettings,
    runtime::scheduler::SchedulerService,
    storage::{LogFilter, LogLevel, LogSink, WorkflowStore},
    workflow::types::Workflow,
};
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::Json,
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;

/// Application state containing shared resources
#[derive(Clone)]
pub struct AppState {
    /// Workflow persistence
    pub store: Arc<dyn WorkflowStore>,
    /// Cron scheduler and retry manager
    pub scheduler: SchedulerService,
    /// Persistent run logs
    pub logs: Arc<dyn LogSink>,
    /// Live notification channel settings
    pub notification_settings: SharedNotificationSettings,
}

/// Status code with a JSON `{ "error": ... }` body
pub type ApiError = (StatusCode, Json<Value>);

pub fn api_error(status: StatusCode, message: impl Into<String>) -> ApiError {
    (status, Json(json!({ "error": message.into() })))
}

fn internal(context: &str, err: impl std::fmt::Display) -> ApiError {
    tracing::error!("{}: {}", context, err);
    api_error(StatusCode::INTERNAL_SERVER_ERROR, context)
}

/// Response for workflow creation/update operations
#[derive(Debug, Serialize)]
pub struct WorkflowResponse {
    pub id: String,
    pub message: String,
    pub scheduled: bool,
}

/// Request body for workflow creation and update
#[derive(Debug, Deserialize)]
pub struct CreateWorkflowRequest {
    pub workflow: Workflow,
}

#[derive(Debug, Deserialize)]
pub struct LogQuery {
    pub level: Option<LogLevel>,
    pub limit: Option<usize>,
}

/// Create workflow management routes
pub fn create_workflow_routes() -> Router<AppState> {
    Router::new()
        .route("/api/workflows", get(list_workflows).post(create_workflow))
        .route(
            "/api/workflows/{id}",
            get(get_workflow).put(update_workflow).delete(delete_workflow),
        )
        .route("/api/workflows/{id}/run", post(run_workflow))
        .route("/api/workflows/{id}/next-run", get(next_run))
        .route("/api/workflows/{id}/logs", get(workflow_logs))
}

/// Save, then bring the schedule in line with the saved definition
async fn save_and_sync(state: &AppState, workflow: Workflow) -> Result<(Workflow, bool), ApiError> {
    if workflow.name.trim().is_empty() {
        return Err(api_error(StatusCode::BAD_REQUEST, "workflow name is required"));
    }

    let saved = state
        .store
        .save(workflow)
        .await
        .map_err(|e| internal("Failed to save workflow", e))?;

    match state.scheduler.sync_workflow(&saved).await {
        Ok(scheduled) => Ok((saved, scheduled)),
        Err(e @ SchedulingError::InvalidCron { .. }) => {
            tracing::warn!("⚠️ Workflow {} saved but not scheduled: {}", saved.id, e);
            Err((
                StatusCode::UNPROCESSABLE_ENTITY,
                Json(json!({ "id": saved.id, "error": e.to_string() })),
            ))
        }
        Err(e) => Err(internal("Failed to schedule workflow", e)),
    }
}

/// Create a new workflow
///
/// POST /api/workflows
/// Body: { "workflow": { "name": "...", "modules": [...], "connections": [...] } }
async fn create_workflow(
    State(state): State<AppState>,
    Json(payload): Json<CreateWorkflowRequest>,
) -> Result<(StatusCode, Json<WorkflowResponse>), ApiError> {
    let workflow = payload.workflow;

    if !workflow.id.is_empty() {
        match state.store.get(&workflow.id).await {
            Ok(Some(_)) => {
                return Err(api_error(
                    StatusCode::CONFLICT,
                    format!("workflow {} already exists", workflow.id),
                ))
            }
            Ok(None) => {}
            Err(e) => return Err(internal("Failed to look up workflow", e)),
        }
    }

    let (saved, scheduled) = save_and_sync(&state, workflow).await?;
    tracing::info!("🔥 Created workflow: {} ({})", saved.id, saved.name);

    Ok((
        StatusCode::CREATED,
        Json(WorkflowResponse {
            message: format!("Workflow '{}' created successfully", saved.name),
            id: saved.id,
            scheduled,
        }),
    ))
}

/// List all workflows
///
/// GET /api/workflows
async fn list_workflows(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    let workflows = state
        .store
        .list()
        .await
        .map_err(|e| internal("Failed to list workflows", e))?;
    Ok(Json(json!({ "workflows": workflows })))
}

async fn find(state: &AppState, id: &str) -> Result<Workflow, ApiError> {
    match state.store.get(id).await {
        Ok(Some(workflow)) => Ok(workflow),
        Ok(None) => Err(api_error(StatusCode::NOT_FOUND, format!("workflow {id} not found"))),
        Err(e) => Err(internal("Failed to load workflow", e)),
    }
}

/// GET /api/workflows/{id}
async fn get_workflow(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Workflow>, ApiError> {
    find(&state, &id).await.map(Json)
}

/// Update an existing workflow
///
/// PUT /api/workflows/{id}
/// Run bookkeeping (`last_run`, `last_result`, `created_at`) is kept from the stored copy.
async fn update_workflow(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(payload): Json<CreateWorkflowRequest>,
) -> Result<Json<WorkflowResponse>, ApiError> {
    let existing = find(&state, &id).await?;

    let mut workflow = payload.workflow;
    workflow.id = id;
    workflow.created_at = existing.created_at;
    workflow.last_run = existing.last_run;
    workflow.last_result = existing.last_result;

    let (saved, scheduled) = save_and_sync(&state, workflow).await?;
    tracing::info!("🔥 Updated workflow: {} ({})", saved.id, saved.name);

    Ok(Json(WorkflowResponse {
        message: format!("Workflow '{}' updated successfully", saved.name),
        id: saved.id,
        scheduled,
    }))
}

/// Delete a workflow
///
/// DELETE /api/workflows/{id}
async fn delete_workflow(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    state.scheduler.unschedule(&id).await;

    match state.store.delete(&id).await {
        Ok(true) => {
            tracing::info!("🗑️ Deleted workflow: {}", id);
            Ok(Json(json!({ "message": "Workflow deleted successfully" })))
        }
        Ok(false) => Err(api_error(StatusCode::NOT_FOUND, format!("workflow {id} not found"))),
        Err(e) => Err(internal("Failed to delete workflow", e)),
    }
}

/// Start a run in the background
///
/// POST /api/workflows/{id}/run
async fn run_workflow(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    let workflow = find(&state, &id).await?;
    state.scheduler.trigger(&workflow.id);
    Ok((
        StatusCode::ACCEPTED,
        Json(json!({ "id": workflow.id, "message": format!("Workflow '{}' started", workflow.name) })),
    ))
}

/// GET /api/workflows/{id}/next-run
async fn next_run(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let workflow = find(&state, &id).await?;
    let next = state.scheduler.next_run_time(&workflow.id).await;
    Ok(Json(json!({ "id": workflow.id, "next_run": next })))
}

/// Most recent log entries of one workflow, newest first
///
/// GET /api/workflows/{id}/logs?level=warning&limit=50
async fn workflow_logs(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<LogQuery>,
) -> Result<Json<Value>, ApiError> {
    let mut filter = LogFilter::for_source(id);
    filter.level = query.level;
    if let Some(limit) = query.limit {
        filter.limit = limit;
    }
    let logs = state
        .logs
        .list(&filter)
        .await
        .map_err(|e| internal("Failed to read logs", e))?;
    Ok(Json(json!({ "logs": logs })))
}
