// POST /v1/search — SERP lookup. Search engine adapters are out of scope (see
// `spec.md` §1); this delegates to `SyncTaskExecutor::execute_search`, which always
// reports the engine unavailable, the same way the scheduler's inline search path does.

use axum::extract::State;
use axum::response::{IntoResponse, Response};
use common::errors::ApiError;
use serde::{Deserialize, Serialize};

use crate::response::{ok, ApiErrorResponse};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct SearchRequest {
    pub query: String,
    #[serde(default)]
    pub limit: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct SearchResponseData {
    pub total: i64,
    pub succeeded: i64,
    pub failed: i64,
}

pub async fn search(State(state): State<AppState>, body: axum::Json<SearchRequest>) -> Response {
    if body.query.trim().is_empty() {
        return ApiErrorResponse(ApiError::new("VALIDATION_ERROR", "query must not be empty")).into_response();
    }

    match state.sync_executor.execute_search(&body.query, body.limit).await {
        Ok(outcome) => ok(SearchResponseData { total: outcome.total, succeeded: outcome.succeeded, failed: outcome.failed }),
        Err(err) => ApiErrorResponse(ApiError::from(err)).into_response(),
    }
}
