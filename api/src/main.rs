// API binary entry point

use common::billing::{BillingEngine, PostgresBillingEngine};
use common::bootstrap;
use common::cache::{CacheLayer, ObjectStoreCacheLayer};
use common::config::Settings;
use common::db::repositories::{
    ApiKeyRepository, BillingLedgerRepository, JobRepository, MapCacheRepository, PageCacheRepository,
    ScheduledTaskRepository, TaskExecutionRepository,
};
use common::progress::{ProgressTracker, RedisProgressTracker};
use common::queue::{JobPublisher, NatsJobPublisher};
use common::sync_exec::{DefaultSyncTaskExecutor, SyncTaskExecutor};
use common::telemetry;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::info;

mod auth;
mod handlers;
mod response;
mod routes;
mod state;

use state::AppState;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    bootstrap::init_json_tracing();

    info!("Starting API server");

    let settings = Arc::new(Settings::load()?);
    info!(host = %settings.server.host, port = %settings.server.port, "Configuration loaded");

    let db_pool = bootstrap::init_database_pool(&settings).await?;
    let redis_pool = bootstrap::init_redis_pool(&settings).await?;
    let minio_client = bootstrap::init_minio_client(&settings).await?;
    let nats_client = bootstrap::init_nats_client(&settings, "api-publisher").await?;
    info!("Initializing NATS stream");
    nats_client.initialize_stream().await?;

    if let Err(err) = telemetry::init_metrics(settings.observability.metrics_port) {
        tracing::warn!(error = %err, "failed to start metrics exporter");
    }

    let jobs = JobRepository::new(db_pool.clone());
    let api_keys = ApiKeyRepository::new(db_pool.clone());
    let ledger = BillingLedgerRepository::new(db_pool.clone());
    let billing = Arc::new(PostgresBillingEngine::new(jobs.clone(), api_keys.clone(), ledger)) as Arc<dyn BillingEngine>;

    let pages = PageCacheRepository::new(db_pool.clone());
    let maps = MapCacheRepository::new(db_pool.clone());
    let cache = Arc::new(ObjectStoreCacheLayer::new(pages, maps, minio_client)) as Arc<dyn CacheLayer>;
    let sync_executor =
        Arc::new(DefaultSyncTaskExecutor::new(&settings.engine, cache.clone())) as Arc<dyn SyncTaskExecutor>;

    let progress = Arc::new(RedisProgressTracker::new(
        redis_pool,
        jobs.clone(),
        billing.clone(),
        settings.credits.enabled,
    )) as Arc<dyn ProgressTracker>;

    let publisher = Arc::new(NatsJobPublisher::new(nats_client)) as Arc<dyn JobPublisher>;

    let state = AppState {
        tasks: ScheduledTaskRepository::new(db_pool.clone()),
        executions: TaskExecutionRepository::new(db_pool.clone()),
        jobs,
        api_keys,
        billing,
        publisher,
        progress,
        cache,
        sync_executor,
        engine_config: settings.engine.clone(),
        config: settings.clone(),
    };

    let app = routes::create_router(state);

    let addr = SocketAddr::from((settings.server.host.parse::<std::net::IpAddr>()?, settings.server.port));
    info!(addr = %addr, "Starting HTTP server");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).with_graceful_shutdown(shutdown_signal()).await?;

    info!("API server stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c().await.expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => { info!("received Ctrl+C signal"); }
        _ = terminate => { info!("received SIGTERM signal"); }
    }
}
