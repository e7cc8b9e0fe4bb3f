// Extraction engines: the pluggable fetchers behind a `{task_type}-{engine}` queue
// name. Cheerio (plain HTTP + HTML parse) is implemented; Playwright/Puppeteer are
// named interfaces only — out of scope for this backbone, which dispatches to them
// but does not embed a browser runtime.

use crate::config::EngineConfig;
use crate::errors::ExtractionError;
use std::time::Duration;
use tracing::{info, instrument, warn};

/// A single page fetched by an engine, ready for the cache layer to persist.
#[derive(Debug, Clone)]
pub struct ExtractedPage {
    pub final_url: String,
    pub status_code: i32,
    pub content_type: Option<String>,
    pub title: Option<String>,
    pub description: Option<String>,
    pub body: Vec<u8>,
}

#[async_trait::async_trait]
pub trait ExtractionEngine: Send + Sync {
    fn name(&self) -> &str;

    async fn extract(&self, url: &str) -> Result<ExtractedPage, ExtractionError>;
}

/// Fetches over plain HTTP and parses the HTML with `scraper`, no JS execution.
/// This is the only engine that runs in-process; `scrape-cheerio`/`crawl-cheerio`
/// queue consumers dispatch to it directly.
pub struct CheerioEngine {
    client: reqwest::Client,
}

impl CheerioEngine {
    pub fn new(config: &EngineConfig) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.nav_timeout_ms))
            .build()
            .expect("reqwest client configuration is valid");
        Self { client }
    }
}

#[async_trait::async_trait]
impl ExtractionEngine for CheerioEngine {
    fn name(&self) -> &str {
        "cheerio"
    }

    #[instrument(skip(self), fields(url = %url))]
    async fn extract(&self, url: &str) -> Result<ExtractedPage, ExtractionError> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| ExtractionError::FetchFailed(e.to_string()))?;

        let final_url = response.url().to_string();
        let status_code = response.status().as_u16() as i32;
        let content_type =
            response.headers().get("content-type").and_then(|v| v.to_str().ok()).map(str::to_string);

        let body = response.bytes().await.map_err(|e| ExtractionError::FetchFailed(e.to_string()))?;
        let html = String::from_utf8_lossy(&body);

        let (title, description) = parse_title_and_description(&html);

        info!(status_code, bytes = body.len(), "page fetched");

        Ok(ExtractedPage { final_url, status_code, content_type, title, description, body: body.to_vec() })
    }
}

fn parse_title_and_description(html: &str) -> (Option<String>, Option<String>) {
    use scraper::{Html, Selector};

    let document = Html::parse_document(html);

    let title_selector = Selector::parse("title").unwrap();
    let title = document.select(&title_selector).next().map(|el| el.text().collect::<String>().trim().to_string());

    let meta_selector = Selector::parse(r#"meta[name="description"]"#).unwrap();
    let description = document
        .select(&meta_selector)
        .next()
        .and_then(|el| el.value().attr("content"))
        .map(str::to_string);

    (title, description)
}

/// Stub for an engine requiring a browser runtime this backbone doesn't embed.
pub struct UnavailableEngine {
    engine_name: String,
}

impl UnavailableEngine {
    pub fn playwright() -> Self {
        Self { engine_name: "playwright".to_string() }
    }

    pub fn puppeteer() -> Self {
        Self { engine_name: "puppeteer".to_string() }
    }

    pub fn named(engine_name: impl Into<String>) -> Self {
        Self { engine_name: engine_name.into() }
    }
}

#[async_trait::async_trait]
impl ExtractionEngine for UnavailableEngine {
    fn name(&self) -> &str {
        &self.engine_name
    }

    async fn extract(&self, _url: &str) -> Result<ExtractedPage, ExtractionError> {
        warn!(engine = %self.engine_name, "engine not available in this deployment");
        Err(ExtractionError::EngineNotAvailable(self.engine_name.clone()))
    }
}

/// Resolves an engine by the name segment of a `{task_type}-{engine}` queue name.
pub fn resolve_engine(name: &str, config: &EngineConfig) -> Box<dyn ExtractionEngine> {
    match name {
        "cheerio" => Box::new(CheerioEngine::new(config)),
        "playwright" => Box::new(UnavailableEngine::playwright()),
        "puppeteer" => Box::new(UnavailableEngine::puppeteer()),
        other => Box::new(UnavailableEngine::named(other)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_title_and_description_extracts_both() {
        let html = r#"<html><head><title>Hi</title><meta name="description" content="desc"></head></html>"#;
        let (title, description) = parse_title_and_description(html);
        assert_eq!(title.as_deref(), Some("Hi"));
        assert_eq!(description.as_deref(), Some("desc"));
    }

    #[test]
    fn parse_title_and_description_handles_missing_tags() {
        let (title, description) = parse_title_and_description("<html></html>");
        assert!(title.is_none());
        assert!(description.is_none());
    }

    #[tokio::test]
    async fn unavailable_engine_reports_engine_not_available() {
        let engine = UnavailableEngine::playwright();
        let err = engine.extract("https://example.com").await.unwrap_err();
        assert!(matches!(err, ExtractionError::EngineNotAvailable(_)));
    }

    #[test]
    fn resolve_engine_falls_back_to_unavailable_for_unknown_name() {
        let config = EngineConfig { nav_timeout_ms: 1000, nav_wait_until: crate::config::NavWaitUntil::Load };
        let engine = resolve_engine("gecko", &config);
        assert_eq!(engine.name(), "gecko");
    }
}
