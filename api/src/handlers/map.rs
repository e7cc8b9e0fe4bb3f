// POST /v1/map — URL discovery via sitemap, delegated to `SyncTaskExecutor::execute_map`.

use axum::extract::State;
use axum::response::{IntoResponse, Response};
use common::errors::ApiError;
use serde::{Deserialize, Serialize};

use crate::response::{ok, ApiErrorResponse};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct MapRequest {
    pub url: String,
    #[serde(default)]
    pub limit: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct MapResponseData {
    pub total: i64,
}

pub async fn map(State(state): State<AppState>, body: axum::Json<MapRequest>) -> Response {
    if body.url.trim().is_empty() {
        return ApiErrorResponse(ApiError::new("VALIDATION_ERROR", "url must not be empty")).into_response();
    }

    match state.sync_executor.execute_map(&body.url, body.limit).await {
        Ok(outcome) => ok(MapResponseData { total: outcome.total }),
        Err(err) => ApiErrorResponse(ApiError::from(err)).into_response(),
    }
}
