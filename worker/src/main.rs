// Worker binary entry point

use common::bootstrap;
use common::billing::{BillingEngine, PostgresBillingEngine};
use common::cache::{CacheLayer, ObjectStoreCacheLayer};
use common::config::Settings;
use common::db::repositories::{
    ApiKeyRepository, BillingLedgerRepository, JobRepository, MapCacheRepository, PageCacheRepository,
};
use common::progress::{ProgressTracker, RedisProgressTracker};
use common::queue::{JobConsumer, JobHandler, NatsJobConsumer};
use common::webhook::{HttpWebhookEmitter, NoopWebhookEmitter, WebhookEmitter};
use common::worker::{JobDispatcher, WorkerDeps};
use std::sync::Arc;
use tracing::{error, info};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    bootstrap::init_json_tracing();

    info!("Starting worker");

    let settings = Settings::load()?;

    let db_pool = bootstrap::init_database_pool(&settings).await?;
    let redis_pool = bootstrap::init_redis_pool(&settings).await?;
    let minio_client = bootstrap::init_minio_client(&settings).await?;

    let jobs = JobRepository::new(db_pool.clone());
    let api_keys = ApiKeyRepository::new(db_pool.clone());
    let ledger = BillingLedgerRepository::new(db_pool.clone());
    let billing = Arc::new(PostgresBillingEngine::new(jobs.clone(), api_keys, ledger)) as Arc<dyn BillingEngine>;

    let pages = PageCacheRepository::new(db_pool.clone());
    let maps = MapCacheRepository::new(db_pool.clone());
    let cache = Arc::new(ObjectStoreCacheLayer::new(pages, maps, minio_client)) as Arc<dyn CacheLayer>;

    let progress = Arc::new(RedisProgressTracker::new(
        redis_pool,
        jobs.clone(),
        billing.clone(),
        settings.credits.enabled,
    )) as Arc<dyn ProgressTracker>;

    let webhooks: Arc<dyn WebhookEmitter> = if settings.webhooks.enabled {
        Arc::new(HttpWebhookEmitter::new(settings.webhooks.signing_secret.clone(), true))
    } else {
        Arc::new(NoopWebhookEmitter)
    };

    let deps = WorkerDeps {
        jobs,
        cache,
        progress,
        billing,
        webhooks,
        webhook_target: settings.webhooks.default_target_url.clone(),
        engine_config: settings.engine.clone(),
        cache_config: settings.cache.clone(),
        credits_enabled: settings.credits.enabled,
    };
    let dispatcher = Arc::new(JobDispatcher::new(deps));

    let nats_client = bootstrap::init_nats_client(&settings, "worker-consumer").await?;
    info!("Initializing NATS stream");
    nats_client.initialize_stream().await?;

    if let Err(err) = common::telemetry::init_metrics(settings.observability.metrics_port) {
        error!(error = %err, "failed to start metrics exporter");
    }

    let handler: JobHandler = Arc::new(move |message| {
        let dispatcher = dispatcher.clone();
        Box::pin(async move { dispatcher.process(message).await.map_err(anyhow::Error::from) })
    });

    let consumer = NatsJobConsumer::new(nats_client, handler)
        .await
        .map_err(|e| {
            error!(error = %e, "Failed to create job consumer");
            e
        })?
        .with_batch_size(settings.worker.concurrency as usize);

    info!("Worker is running. Press Ctrl+C to shut down gracefully");

    let consumer = Arc::new(consumer);
    let consumer_for_shutdown = consumer.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Shutdown signal received, stopping consumer");
            consumer_for_shutdown.shutdown();
        }
    });

    consumer.start().await?;

    info!("Worker shutdown complete");
    Ok(())
}
