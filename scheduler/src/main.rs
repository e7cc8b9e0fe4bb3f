// Scheduler binary entry point

use common::bootstrap;
use common::config::Settings;
use common::db::repositories::{
    ApiKeyRepository, BillingLedgerRepository, JobRepository, MapCacheRepository, PageCacheRepository,
    ScheduledTaskRepository, TaskExecutionRepository, TemplateRepository,
};
use common::billing::{BillingEngine, PostgresBillingEngine};
use common::cache::{CacheLayer, ObjectStoreCacheLayer};
use common::lock::{DistributedLock, RedLock};
use common::queue::{JobPublisher, NatsJobPublisher};
use common::scheduler::{SchedulerDeps, SchedulerEngine};
use common::sync_exec::{DefaultSyncTaskExecutor, SyncTaskExecutor};
use common::webhook::{HttpWebhookEmitter, NoopWebhookEmitter, WebhookEmitter};
use std::sync::Arc;
use tracing::info;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    bootstrap::init_json_tracing();

    info!("Starting scheduler");

    let settings = Settings::load()?;
    info!(
        database_url = %settings.database.url,
        redis_url = %settings.redis.url,
        nats_url = %settings.nats.url,
        "Configuration loaded"
    );

    let db_pool = bootstrap::init_database_pool(&settings).await?;
    let redis_pool = bootstrap::init_redis_pool(&settings).await?;
    let minio_client = bootstrap::init_minio_client(&settings).await?;

    let nats_client = bootstrap::init_nats_client(&settings, &settings.nats.consumer_name).await?;
    info!("Initializing NATS stream");
    nats_client.initialize_stream().await?;

    if let Err(err) = common::telemetry::init_metrics(settings.observability.metrics_port) {
        tracing::warn!(error = %err, "failed to start metrics exporter");
    }

    let lock = Arc::new(RedLock::new(redis_pool)) as Arc<dyn DistributedLock>;
    let publisher = Arc::new(NatsJobPublisher::new(nats_client)) as Arc<dyn JobPublisher>;

    let jobs = JobRepository::new(db_pool.clone());
    let api_keys = ApiKeyRepository::new(db_pool.clone());
    let ledger = BillingLedgerRepository::new(db_pool.clone());
    let billing = Arc::new(PostgresBillingEngine::new(jobs.clone(), api_keys.clone(), ledger)) as Arc<dyn BillingEngine>;

    let pages = PageCacheRepository::new(db_pool.clone());
    let maps = MapCacheRepository::new(db_pool.clone());
    let cache = Arc::new(ObjectStoreCacheLayer::new(pages, maps, minio_client)) as Arc<dyn CacheLayer>;
    let sync_executor = Arc::new(DefaultSyncTaskExecutor::new(&settings.engine, cache)) as Arc<dyn SyncTaskExecutor>;

    let webhooks: Arc<dyn WebhookEmitter> = if settings.webhooks.enabled {
        Arc::new(HttpWebhookEmitter::new(settings.webhooks.signing_secret.clone(), true))
    } else {
        Arc::new(NoopWebhookEmitter)
    };

    let deps = SchedulerDeps {
        db: db_pool.clone(),
        tasks: ScheduledTaskRepository::new(db_pool.clone()),
        executions: TaskExecutionRepository::new(db_pool.clone()),
        jobs,
        api_keys,
        templates: TemplateRepository::new(db_pool.clone()),
        billing,
        publisher,
        lock,
        sync_executor,
        webhooks,
        webhook_target: settings.webhooks.default_target_url.clone(),
        engine_config: settings.engine.clone(),
        tiers: settings.tiers.clone(),
    };

    let scheduler = SchedulerEngine::new(deps, settings.scheduler.clone());
    info!(poll_interval_seconds = settings.scheduler.poll_interval_seconds, "Scheduler engine created, entering poll loop");

    let shutdown = tokio::signal::ctrl_c();
    tokio::select! {
        _ = scheduler.run_forever() => {}
        _ = shutdown => {
            info!("Shutdown signal received");
        }
    }

    info!("Scheduler stopped");
    Ok(())
}
