// /v1/crawl — create, poll, and cancel a crawl's umbrella `Job`. Page-by-page
// traversal itself happens inside the worker (`common::worker::dispatch`); this
// handler only creates the queue-visible row and publishes the first message.

use axum::extract::{Extension, Path, State};
use axum::response::{IntoResponse, Response};
use chrono::{Duration, Utc};
use common::errors::ApiError;
use common::models::{Job, JobStatus, Owner, TaskType, TriggerSource};
use serde::{Deserialize, Serialize};
use serde_json::json;
use uuid::Uuid;

use crate::response::{created, ok, ApiErrorResponse};
use crate::state::AppState;

const JOB_EXPIRY_DAYS: i64 = 7;
const PUBLISH_RETRIES: u32 = 3;

#[derive(Debug, Deserialize)]
pub struct CrawlRequest {
    pub url: String,
    #[serde(default)]
    pub engine: Option<String>,
    #[serde(default)]
    pub limit: Option<i64>,
    #[serde(default)]
    pub store_in_cache: Option<bool>,
    #[serde(default)]
    pub max_age_ms: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct CrawlCreatedData {
    pub job_id: String,
    pub status: &'static str,
}

#[derive(Debug, Serialize)]
pub struct CrawlStatusData {
    pub job_id: String,
    pub status: String,
    pub total: i64,
    pub completed: i64,
    pub failed: i64,
    pub enqueued: i64,
    pub finalized: bool,
    pub cancelled: bool,
}

pub async fn create(
    State(state): State<AppState>,
    Extension(owner): Extension<Owner>,
    body: axum::Json<CrawlRequest>,
) -> Response {
    match run_create(&state, owner, body.0).await {
        Ok(data) => created(data),
        Err(err) => ApiErrorResponse(err).into_response(),
    }
}

async fn run_create(state: &AppState, owner: Owner, req: CrawlRequest) -> Result<CrawlCreatedData, ApiError> {
    if req.url.trim().is_empty() {
        return Err(ApiError::new("VALIDATION_ERROR", "url must not be empty"));
    }

    let engine_name = req.engine.as_deref().unwrap_or("cheerio");
    let now = Utc::now();
    let job_id = format!("crawl-{}", Uuid::new_v4());
    let payload = json!({
        "limit": req.limit.unwrap_or(10),
        "store_in_cache": req.store_in_cache.unwrap_or(true),
        "max_age_ms": req.max_age_ms,
    });

    let job_draft = Job {
        uuid: Uuid::new_v4(),
        job_id: job_id.clone(),
        api_key_id: owner.api_key_id,
        job_type: TaskType::Crawl,
        job_queue_name: Job::queue_name(TaskType::Crawl, engine_name),
        url: req.url,
        payload,
        origin: TriggerSource::Manual,
        status: JobStatus::Pending,
        is_success: None,
        total: 0,
        completed: 0,
        failed: 0,
        credits_used: 0,
        deducted_at: None,
        created_at: now,
        updated_at: now,
        expire_at: now + Duration::days(JOB_EXPIRY_DAYS),
    };

    let job = state.jobs.create(&job_draft).await?;
    state.progress.ensure_started(&job.job_id).await?;

    if let Err(err) = state.publisher.publish_with_retry(&job, 0, PUBLISH_RETRIES).await {
        tracing::warn!(job_id = %job.job_id, error = %err, "crawl committed but queue publish failed, worker poll will pick it up late");
    }

    Ok(CrawlCreatedData { job_id: job.job_id, status: "created" })
}

pub async fn status(State(state): State<AppState>, Path(job_id): Path<String>) -> Response {
    match run_status(&state, &job_id).await {
        Ok(data) => ok(data),
        Err(err) => ApiErrorResponse(err).into_response(),
    }
}

async fn run_status(state: &AppState, job_id: &str) -> Result<CrawlStatusData, ApiError> {
    let job = state.jobs.find_by_job_id(job_id).await?;
    let progress = state.progress.state(job_id).await?;

    Ok(CrawlStatusData {
        job_id: job.job_id,
        status: format!("{:?}", job.status).to_lowercase(),
        total: job.total,
        completed: job.completed,
        failed: job.failed,
        enqueued: progress.enqueued,
        finalized: progress.finalized,
        cancelled: progress.cancelled,
    })
}

pub async fn cancel(State(state): State<AppState>, Path(job_id): Path<String>) -> Response {
    match run_cancel(&state, &job_id).await {
        Ok(()) => ok(json!({ "job_id": job_id, "status": "cancelled" })),
        Err(err) => ApiErrorResponse(err).into_response(),
    }
}

async fn run_cancel(state: &AppState, job_id: &str) -> Result<(), ApiError> {
    state.progress.cancel(job_id).await?;
    state.jobs.update_status(job_id, JobStatus::Cancelled, Some(false)).await?;
    Ok(())
}
