// Job dispatcher: the handler a worker process registers with its queue consumer.
// Re-fetches the authoritative `Job` row by `job_id` (payload never travels over the
// wire, see `queue::publisher::JobMessage`), resolves the `{task_type}-{engine}`
// queue name to an extraction engine, and runs either a single-page scrape or a
// crawl's breadth-first page fan-out, driving the same cache/billing/progress
// collaborators the scheduler's synchronous path uses for search/map.

use crate::billing::BillingEngine;
use crate::cache::{CacheLayer, PageFetchResult};
use crate::config::{CacheConfig, EngineConfig};
use crate::db::repositories::JobRepository;
use crate::engine::{resolve_engine, ExtractedPage, ExtractionEngine};
use crate::errors::WorkerError;
use crate::models::{Job, JobStatus, MapSource, TaskType, WebhookEvent};
use crate::progress::ProgressTracker;
use crate::queue::publisher::JobMessage;
use crate::webhook::WebhookEmitter;
use chrono::Duration as ChronoDuration;
use regex::Regex;
use serde_json::Value;
use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use tracing::{info, instrument, warn};

pub struct WorkerDeps {
    pub jobs: JobRepository,
    pub cache: Arc<dyn CacheLayer>,
    pub progress: Arc<dyn ProgressTracker>,
    pub billing: Arc<dyn BillingEngine>,
    pub webhooks: Arc<dyn WebhookEmitter>,
    pub webhook_target: Option<String>,
    pub engine_config: EngineConfig,
    pub cache_config: CacheConfig,
    pub credits_enabled: bool,
}

/// Dispatches queue messages to scrape/crawl processing. One instance is shared by
/// every queue consumer a worker process registers.
pub struct JobDispatcher {
    deps: Arc<WorkerDeps>,
}

impl JobDispatcher {
    pub fn new(deps: WorkerDeps) -> Self {
        Self { deps: Arc::new(deps) }
    }

    /// Process one queue message end to end. Re-delivery of an already-terminal job
    /// (completed/failed/cancelled) is a no-op, since the consumer's at-least-once
    /// contract can redeliver after an ack that was lost in transit.
    #[instrument(skip(self, message), fields(job_id = %message.job_id))]
    pub async fn process(&self, message: JobMessage) -> Result<(), WorkerError> {
        let job = self.deps.jobs.find_by_job_id(&message.job_id).await.map_err(|e| match e {
            crate::errors::DatabaseError::NotFound => WorkerError::JobNotFound(message.job_id.clone()),
            other => WorkerError::Database(other),
        })?;

        if matches!(job.status, JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled) {
            info!(job_id = %job.job_id, status = ?job.status, "job already terminal, skipping redelivered message");
            return Ok(());
        }

        self.deps.jobs.update_status(&job.job_id, JobStatus::Running, None).await?;

        let (_, engine_name) = split_queue_name(&job.job_queue_name);
        let engine = resolve_engine(&engine_name, &self.deps.engine_config);

        let outcome = match job.job_type {
            TaskType::Crawl => self.process_crawl(&job, engine.as_ref()).await,
            _ => self.process_scrape(&job, engine.as_ref()).await,
        };

        if let Err(err) = &outcome {
            warn!(job_id = %job.job_id, error = %err, "job processing failed");
            self.deps.jobs.update_status(&job.job_id, JobStatus::Failed, Some(false)).await?;
            self.emit(match job.job_type {
                TaskType::Crawl => WebhookEvent::CrawlFailed { job_id: job.job_id.clone(), reason: err.to_string() },
                _ => WebhookEvent::ScrapeFailed { job_id: job.job_id.clone(), reason: err.to_string() },
            })
            .await;
        }

        outcome
    }

    /// Fetch the job's single URL, read-through the cache, bill one page, and mark
    /// the job completed/failed.
    async fn process_scrape(&self, job: &Job, engine: &dyn ExtractionEngine) -> Result<(), WorkerError> {
        let options_fingerprint = crate::cache::fingerprint(&[engine.name()]);
        let max_age = max_age_for(&job.payload, self.deps.cache_config.page_default_max_age_ms);

        let page = self.fetch_with_cache(&job.url, &options_fingerprint, max_age, engine, &job.payload).await?;
        let success = page.status_code != 0 && page.status_code < 400;

        self.deps.jobs.set_total(&job.job_id, 1).await?;
        self.deps.jobs.increment_progress(&job.job_id, if success { 1 } else { 0 }, if success { 0 } else { 1 }).await?;
        self.deps
            .jobs
            .update_status(&job.job_id, if success { JobStatus::Completed } else { JobStatus::Failed }, Some(success))
            .await?;

        if self.deps.credits_enabled {
            let idempotency_key = format!("scrape:page-success:{}", job.job_id);
            self.deps.billing.charge_to_used(&job.job_id, 1, "scrape_completed", &idempotency_key).await?;
        }

        self.emit(WebhookEvent::ScrapeCompleted { job_id: job.job_id.clone() }).await;
        Ok(())
    }

    /// Breadth-first same-domain crawl bounded by `payload.limit` (default 10),
    /// driving every counter update through the Redis-backed progress tracker so the
    /// API's status endpoint and the scheduler's stale-crawl sweep see live state.
    async fn process_crawl(&self, job: &Job, engine: &dyn ExtractionEngine) -> Result<(), WorkerError> {
        let limit = job.payload.get("limit").and_then(Value::as_i64).filter(|n| *n > 0).unwrap_or(10);
        let options_fingerprint = crate::cache::fingerprint(&[engine.name()]);
        let max_age = max_age_for(&job.payload, self.deps.cache_config.page_default_max_age_ms);

        self.deps.progress.ensure_started(&job.job_id).await?;
        self.deps.progress.begin_enqueue(&job.job_id).await?;
        self.deps.progress.increment_enqueued(&job.job_id, 1).await?;
        self.deps.progress.end_enqueue(&job.job_id).await?;

        if self.deps.credits_enabled {
            let idempotency_key = format!("crawl:dispatch:{}", job.job_id);
            self.deps.billing.charge_to_used(&job.job_id, 1, "crawl_dispatch_page1", &idempotency_key).await?;
        }

        let root_domain = domain_of(&job.url);
        let mut visited: HashSet<String> = HashSet::new();
        let mut frontier: VecDeque<String> = VecDeque::from([job.url.clone()]);
        let mut enqueued_count: i64 = 1;

        while let Some(url) = frontier.pop_front() {
            if !visited.insert(url.clone()) {
                continue;
            }

            // Step-boundary cancellation check: a `DELETE /v1/crawl/{jobId}` fired
            // mid-crawl must stop further fetching, not just be recorded and ignored.
            let state = self.deps.progress.state(&job.job_id).await?;
            if state.cancelled || state.finalized {
                info!(job_id = %job.job_id, "crawl cancelled or finalized, stopping fan-out");
                break;
            }

            let fetch_result = self.fetch_with_cache(&url, &options_fingerprint, max_age, engine, &job.payload).await;
            let success = matches!(&fetch_result, Ok(page) if page.status_code != 0 && page.status_code < 400);

            let outcome = self.deps.progress.mark_page_done(&job.job_id, success, limit, 1).await?;
            if outcome.stopped {
                break;
            }

            if let Ok(page) = &fetch_result {
                if success && enqueued_count < limit {
                    let html = String::from_utf8_lossy(&page.body);
                    for link in same_domain_links(&html, &url, &root_domain) {
                        if enqueued_count >= limit || visited.contains(&link) {
                            continue;
                        }
                        self.deps.progress.begin_enqueue(&job.job_id).await?;
                        self.deps.progress.increment_enqueued(&job.job_id, 1).await?;
                        self.deps.progress.end_enqueue(&job.job_id).await?;
                        enqueued_count += 1;
                        frontier.push_back(link);
                    }
                }
            }

            if self.deps.progress.try_finalize(&job.job_id, limit).await? {
                break;
            }
        }

        self.deps.progress.try_finalize(&job.job_id, limit).await?;
        self.finalize_crawl(job).await
    }

    async fn finalize_crawl(&self, job: &Job) -> Result<(), WorkerError> {
        let state = self.deps.progress.state(&job.job_id).await?;

        self.deps.jobs.set_total(&job.job_id, state.enqueued).await?;
        let success = state.succeeded > 0;
        self.deps
            .jobs
            .update_status(&job.job_id, if success { JobStatus::Completed } else { JobStatus::Failed }, Some(success))
            .await?;

        let summary = crate::models::CrawlSummary {
            job_id: job.job_id.clone(),
            total: state.enqueued,
            succeeded: state.succeeded,
            failed: state.failed,
            started_at: state.started_at,
            finished_at: state.finished_at,
        };

        if success {
            self.emit(WebhookEvent::CrawlCompleted { job_id: job.job_id.clone(), summary }).await;
        } else {
            self.emit(WebhookEvent::CrawlFailed {
                job_id: job.job_id.clone(),
                reason: "No pages were successfully processed".to_string(),
            })
            .await;
        }

        Ok(())
    }

    /// Read-through cache lookup: a fresh hit skips the network fetch entirely;
    /// otherwise fetch, then write through unless the response or payload opts out.
    async fn fetch_with_cache(
        &self,
        url: &str,
        options_fingerprint: &str,
        max_age: ChronoDuration,
        engine: &dyn ExtractionEngine,
        payload: &Value,
    ) -> Result<ExtractedPage, WorkerError> {
        let cache_enabled = self.deps.cache_config.enabled;

        if cache_enabled && max_age > ChronoDuration::zero() {
            if let Some(cached) = self.deps.cache.find_fresh_page(url, options_fingerprint, max_age).await? {
                if let Ok(body) = self.deps.cache.fetch_page_body(&cached).await {
                    return Ok(ExtractedPage {
                        final_url: url.to_string(),
                        status_code: cached.status_code,
                        content_type: cached.content_type,
                        title: cached.title,
                        description: cached.description,
                        body,
                    });
                }
                warn!(url, "cache hit but object store payload missing, refetching");
            }
        }

        let page = engine.extract(url).await?;

        let store_in_cache = payload.get("store_in_cache").and_then(Value::as_bool).unwrap_or(true);
        let cacheable = cache_enabled && store_in_cache && page.status_code != 0 && page.status_code < 400;
        if cacheable {
            let has_proxy = payload.get("proxy").is_some();
            self.deps
                .cache
                .put_page(PageFetchResult {
                    url: url.to_string(),
                    options_fingerprint: options_fingerprint.to_string(),
                    domain: domain_of(url),
                    body: page.body.clone(),
                    title: page.title.clone(),
                    description: page.description.clone(),
                    status_code: page.status_code,
                    content_type: page.content_type.clone(),
                    engine: engine.name().to_string(),
                    has_proxy,
                    has_screenshot: false,
                })
                .await?;
        }

        Ok(page)
    }

    async fn emit(&self, event: WebhookEvent) {
        let target = self.deps.webhook_target.as_deref();
        if let Err(err) = crate::webhook::emit_to_target(self.deps.webhooks.as_ref(), target, &event).await {
            warn!(error = %err, "webhook emission failed");
        }
    }
}

fn max_age_for(payload: &Value, default_ms: i64) -> ChronoDuration {
    let ms = payload.get("max_age_ms").and_then(Value::as_i64).unwrap_or(default_ms);
    if ms <= 0 {
        ChronoDuration::zero()
    } else {
        ChronoDuration::milliseconds(ms)
    }
}

/// Splits a `{task_type}-{engine}` queue name; defaults to "cheerio" when the engine
/// segment is missing so a malformed queue name degrades instead of panicking.
fn split_queue_name(queue_name: &str) -> (String, String) {
    match queue_name.split_once('-') {
        Some((task_type, engine)) => (task_type.to_string(), engine.to_string()),
        None => (queue_name.to_string(), "cheerio".to_string()),
    }
}

fn domain_of(url: &str) -> String {
    url.split("://").nth(1).unwrap_or(url).split('/').next().unwrap_or(url).to_string()
}

/// Extracts `href` targets from `html` that resolve to the same domain as `base_url`,
/// skipping fragment-only and non-http(s) links.
fn same_domain_links(html: &str, base_url: &str, root_domain: &str) -> Vec<String> {
    let href = Regex::new(r#"href\s*=\s*["']([^"'#]+)["']"#).expect("static regex is valid");
    let mut links = Vec::new();

    for capture in href.captures_iter(html) {
        let raw = &capture[1];
        let resolved = if raw.starts_with("http://") || raw.starts_with("https://") {
            raw.to_string()
        } else if let Some(root) = base_url.split("://").next() {
            format!("{root}://{root_domain}{}", if raw.starts_with('/') { raw.to_string() } else { format!("/{raw}") })
        } else {
            continue;
        };

        if domain_of(&resolved) == root_domain {
            links.push(resolved);
        }
    }

    links
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn split_queue_name_separates_type_and_engine() {
        assert_eq!(split_queue_name("scrape-cheerio"), ("scrape".to_string(), "cheerio".to_string()));
    }

    #[test]
    fn split_queue_name_falls_back_when_no_engine_segment() {
        assert_eq!(split_queue_name("scrape"), ("scrape".to_string(), "cheerio".to_string()));
    }

    #[test]
    fn domain_of_strips_scheme_and_path() {
        assert_eq!(domain_of("https://example.com/a/b"), "example.com");
    }

    #[test]
    fn same_domain_links_skips_other_domains() {
        let html = r#"<a href="https://example.com/a">a</a><a href="https://other.com/b">b</a><a href="/c">c</a>"#;
        let links = same_domain_links(html, "https://example.com", "example.com");
        assert_eq!(links, vec!["https://example.com/a".to_string(), "https://example.com/c".to_string()]);
    }

    #[test]
    fn max_age_for_treats_zero_as_force_refresh() {
        assert_eq!(max_age_for(&serde_json::json!({"max_age_ms": 0}), 1000), ChronoDuration::zero());
    }
}
