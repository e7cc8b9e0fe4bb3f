// /v1/scheduled-tasks — CRUD-lite over `ScheduledTask` plus its execution history.
// Full task editing (the teacher's update/delete/templates surface) is out of scope;
// this only covers create, pause/resume, and execution listing/cancellation.

use axum::extract::{Extension, Path, Query, State};
use axum::response::{IntoResponse, Response};
use chrono::Utc;
use common::errors::ApiError;
use common::models::{ConcurrencyMode, ExecutionStatus, JobStatus, Owner, ScheduledTask, TaskType};
use common::schedule::calculate_cron_next_execution;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::str::FromStr;
use uuid::Uuid;

use crate::response::{created, ok, ApiErrorResponse};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct CreateScheduledTaskRequest {
    pub name: String,
    pub description: Option<String>,
    pub cron_expression: String,
    #[serde(default = "common::schedule::default_timezone")]
    pub timezone: String,
    pub task_type: String,
    pub task_payload: Value,
    #[serde(default)]
    pub concurrency_mode: Option<String>,
    #[serde(default)]
    pub max_executions_per_day: Option<i32>,
    #[serde(default)]
    pub min_credits_required: Option<i64>,
    #[serde(default)]
    pub tags: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct ScheduledTaskData {
    pub uuid: Uuid,
    pub name: String,
    pub cron_expression: String,
    pub timezone: String,
    pub is_active: bool,
    pub is_paused: bool,
    pub next_execution_at: Option<chrono::DateTime<Utc>>,
}

impl From<ScheduledTask> for ScheduledTaskData {
    fn from(t: ScheduledTask) -> Self {
        Self {
            uuid: t.uuid,
            name: t.name,
            cron_expression: t.cron_expression,
            timezone: t.timezone,
            is_active: t.is_active,
            is_paused: t.is_paused,
            next_execution_at: t.next_execution_at,
        }
    }
}

pub async fn create(
    State(state): State<AppState>,
    Extension(owner): Extension<Owner>,
    body: axum::Json<CreateScheduledTaskRequest>,
) -> Response {
    match run_create(&state, owner, body.0).await {
        Ok(data) => created(data),
        Err(err) => ApiErrorResponse(err).into_response(),
    }
}

async fn run_create(
    state: &AppState,
    owner: Owner,
    req: CreateScheduledTaskRequest,
) -> Result<ScheduledTaskData, ApiError> {
    if req.name.trim().is_empty() {
        return Err(ApiError::new("VALIDATION_ERROR", "name must not be empty"));
    }
    let task_type = TaskType::from_str(&req.task_type)
        .map_err(|_| ApiError::new("VALIDATION_ERROR", format!("unknown task_type '{}'", req.task_type)))?;

    let now = Utc::now();
    let next_execution_at = calculate_cron_next_execution(&req.cron_expression, &req.timezone, now)?;
    let concurrency_mode = match req.concurrency_mode.as_deref() {
        Some("queue") => ConcurrencyMode::Queue,
        _ => ConcurrencyMode::Skip,
    };

    let draft = ScheduledTask {
        uuid: Uuid::new_v4(),
        owner,
        name: req.name,
        description: req.description,
        cron_expression: req.cron_expression,
        timezone: req.timezone,
        task_type,
        task_payload: req.task_payload,
        concurrency_mode,
        max_executions_per_day: req.max_executions_per_day,
        min_credits_required: req.min_credits_required.unwrap_or(1),
        is_active: true,
        is_paused: false,
        pause_reason: None,
        next_execution_at: Some(next_execution_at),
        last_execution_at: None,
        total_executions: 0,
        successful_executions: 0,
        failed_executions: 0,
        consecutive_failures: 0,
        tags: req.tags,
        metadata: json!({}),
        created_at: now,
        updated_at: now,
    };

    let task = state.tasks.create(&draft).await?;
    Ok(task.into())
}

pub async fn pause(State(state): State<AppState>, Path(uuid): Path<Uuid>, body: axum::Json<Value>) -> Response {
    let reason = body.get("reason").and_then(Value::as_str).unwrap_or("paused via api");
    match state.tasks.pause(uuid, reason).await {
        Ok(()) => ok(json!({ "uuid": uuid, "is_paused": true })),
        Err(err) => ApiErrorResponse(ApiError::from(err)).into_response(),
    }
}

pub async fn resume(State(state): State<AppState>, Path(uuid): Path<Uuid>) -> Response {
    match state.tasks.resume(uuid).await {
        Ok(()) => ok(json!({ "uuid": uuid, "is_paused": false })),
        Err(err) => ApiErrorResponse(ApiError::from(err)).into_response(),
    }
}

#[derive(Debug, Deserialize)]
pub struct ListExecutionsQuery {
    #[serde(default)]
    pub limit: Option<i64>,
}

pub async fn list_executions(
    State(state): State<AppState>,
    Path(uuid): Path<Uuid>,
    Query(query): Query<ListExecutionsQuery>,
) -> Response {
    let filter = common::db::repositories::TaskExecutionFilter {
        scheduled_task_uuid: Some(uuid),
        status: None,
        triggered_by: None,
        limit: query.limit,
    };
    match state.executions.find_with_filter(filter).await {
        Ok(executions) => ok(executions),
        Err(err) => ApiErrorResponse(ApiError::from(err)).into_response(),
    }
}

pub async fn cancel_execution(
    State(state): State<AppState>,
    Path((_task_uuid, execution_uuid)): Path<(Uuid, Uuid)>,
) -> Response {
    match run_cancel_execution(&state, execution_uuid).await {
        Ok(()) => ok(json!({ "uuid": execution_uuid, "status": "cancelled" })),
        Err(err) => ApiErrorResponse(err).into_response(),
    }
}

async fn run_cancel_execution(state: &AppState, execution_uuid: Uuid) -> Result<(), ApiError> {
    let mut execution = state.executions.find_by_uuid(execution_uuid).await?;
    if execution.status.is_terminal() {
        return Err(ApiError::new("CONFLICT", "execution is already in a terminal state"));
    }

    // Cancelling an execution must also stop the Job it spawned: without this a
    // running crawl or in-flight scrape keeps fetching/billing pages after the
    // execution is reported as cancelled.
    if let Some(job_uuid) = execution.job_uuid {
        let job = state.jobs.find_by_uuid(job_uuid).await?;
        state.progress.cancel(&job.job_id).await?;
        state.jobs.update_status(&job.job_id, JobStatus::Cancelled, Some(false)).await?;
    }

    execution.status = ExecutionStatus::Cancelled;
    execution.completed_at = Some(Utc::now());
    execution.updated_at = Utc::now();
    state.executions.update(&execution).await?;
    Ok(())
}
