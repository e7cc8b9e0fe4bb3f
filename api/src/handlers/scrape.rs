// POST /v1/scrape — synchronous single-page extraction. Delegates the actual fetch
// to the `ExtractionEngine` collaborator; format conversion (markdown/json/screenshot
// rendering) is the out-of-scope extraction-pipeline work `spec.md` §1 excludes.

use axum::extract::State;
use axum::response::{IntoResponse, Response};
use common::engine::resolve_engine;
use common::errors::ApiError;
use serde::{Deserialize, Serialize};

use crate::response::{ok, ApiErrorResponse};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct ScrapeRequest {
    pub url: String,
    #[serde(default)]
    pub engine: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ScrapeResponseData {
    pub url: String,
    pub status_code: i32,
    pub content_type: Option<String>,
    pub title: Option<String>,
    pub description: Option<String>,
}

pub async fn scrape(State(state): State<AppState>, body: axum::Json<ScrapeRequest>) -> Response {
    match run(&state, body.0).await {
        Ok(data) => ok(data),
        Err(err) => ApiErrorResponse(err).into_response(),
    }
}

async fn run(state: &AppState, req: ScrapeRequest) -> Result<ScrapeResponseData, ApiError> {
    if req.url.trim().is_empty() {
        return Err(ApiError::new("VALIDATION_ERROR", "url must not be empty"));
    }

    let engine_name = req.engine.as_deref().unwrap_or("cheerio");
    let engine = resolve_engine(engine_name, &state.engine_config);
    let page = engine.extract(&req.url).await?;

    Ok(ScrapeResponseData {
        url: page.final_url,
        status_code: page.status_code,
        content_type: page.content_type,
        title: page.title,
        description: page.description,
    })
}
