// Synchronous task execution: `search` and `map` task types run inline inside the
// scheduler process instead of fanning out to an engine worker queue. Grounded on
// `engine::{CheerioEngine, UnavailableEngine}` — map reuses the same fetch-and-parse
// path against a domain's sitemap; search has no in-process implementation since
// search engine adapters are a named, out-of-scope collaborator (see spec §1), so it
// always reports unavailable, the same way `UnavailableEngine` does for engines this
// backbone doesn't embed.

use crate::cache::CacheLayer;
use crate::config::EngineConfig;
use crate::errors::ExtractionError;
use crate::models::MapSource;
use regex::Regex;
use std::sync::Arc;
use tracing::{info, instrument, warn};

/// Result of running a `search`/`map` task inline, enough to finalize its Job row
/// and bill for the work without ever touching the crawl progress tracker.
#[derive(Debug, Clone)]
pub struct SyncExecutionOutcome {
    pub total: i64,
    pub succeeded: i64,
    pub failed: i64,
}

#[async_trait::async_trait]
pub trait SyncTaskExecutor: Send + Sync {
    async fn execute_map(&self, url: &str, limit: Option<i64>) -> Result<SyncExecutionOutcome, ExtractionError>;

    async fn execute_search(&self, query: &str, limit: Option<i64>) -> Result<SyncExecutionOutcome, ExtractionError>;
}

pub struct DefaultSyncTaskExecutor {
    client: reqwest::Client,
    cache: Arc<dyn CacheLayer>,
}

impl DefaultSyncTaskExecutor {
    pub fn new(config: &EngineConfig, cache: Arc<dyn CacheLayer>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_millis(config.nav_timeout_ms))
            .build()
            .expect("reqwest client configuration is valid");
        Self { client, cache }
    }

    fn sitemap_url(domain: &str) -> String {
        if domain.starts_with("http://") || domain.starts_with("https://") {
            format!("{}/sitemap.xml", domain.trim_end_matches('/'))
        } else {
            format!("https://{domain}/sitemap.xml")
        }
    }
}

#[async_trait::async_trait]
impl SyncTaskExecutor for DefaultSyncTaskExecutor {
    /// Fetches `{domain}/sitemap.xml` and extracts every `<loc>` entry, capped at
    /// `limit`, then caches the discovered URL list under `MapSource::Sitemap`.
    #[instrument(skip(self), fields(url))]
    async fn execute_map(&self, url: &str, limit: Option<i64>) -> Result<SyncExecutionOutcome, ExtractionError> {
        let sitemap_url = Self::sitemap_url(url);

        let response = self
            .client
            .get(&sitemap_url)
            .send()
            .await
            .map_err(|e| ExtractionError::FetchFailed(e.to_string()))?;

        if !response.status().is_success() {
            return Err(ExtractionError::FetchFailed(format!("sitemap returned {}", response.status())));
        }

        let body = response.text().await.map_err(|e| ExtractionError::FetchFailed(e.to_string()))?;
        let loc = Regex::new(r"<loc>\s*([^<\s]+)\s*</loc>").expect("static regex is valid");
        let mut urls: Vec<String> = loc.captures_iter(&body).map(|c| c[1].to_string()).collect();
        if let Some(limit) = limit.filter(|n| *n > 0) {
            urls.truncate(limit as usize);
        }

        let total = urls.len() as i64;
        self.cache.put_map(url, MapSource::Sitemap, urls, None, None).await.map_err(|e| {
            warn!(error = %e, "failed to cache map result");
            ExtractionError::FetchFailed(e.to_string())
        })?;

        info!(total, "map task discovered urls");
        Ok(SyncExecutionOutcome { total, succeeded: total, failed: 0 })
    }

    /// Search engine adapters are out of scope for this backbone; this always
    /// reports unavailable so the caller fails the Job cleanly instead of hanging.
    async fn execute_search(&self, _query: &str, _limit: Option<i64>) -> Result<SyncExecutionOutcome, ExtractionError> {
        Err(ExtractionError::EngineNotAvailable("search".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sitemap_url_adds_scheme_when_missing() {
        assert_eq!(DefaultSyncTaskExecutor::sitemap_url("example.com"), "https://example.com/sitemap.xml");
    }

    #[test]
    fn sitemap_url_respects_existing_scheme_and_trailing_slash() {
        assert_eq!(
            DefaultSyncTaskExecutor::sitemap_url("http://example.com/"),
            "http://example.com/sitemap.xml"
        );
    }
}
