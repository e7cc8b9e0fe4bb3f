use axum::{
    routing::{delete, get, post},
    Router,
};
use tower::ServiceBuilder;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::auth::auth_middleware;
use crate::handlers;
use crate::state::AppState;

/// Create the main application router with all routes and middleware.
/// Prometheus metrics are served on their own listener (`telemetry::init_metrics`),
/// not as an axum route, so there is no `/metrics` entry here.
#[tracing::instrument(skip(state))]
pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any);

    let public_routes = Router::new().route("/health", get(handlers::health::health_check));

    let protected_routes = Router::new()
        .route("/v1/scrape", post(handlers::scrape::scrape))
        .route("/v1/search", post(handlers::search::search))
        .route("/v1/map", post(handlers::map::map))
        .route("/v1/crawl", post(handlers::crawl::create))
        .route("/v1/crawl/:job_id/status", get(handlers::crawl::status))
        .route("/v1/crawl/:job_id", delete(handlers::crawl::cancel))
        .route("/v1/scheduled-tasks", post(handlers::scheduled_tasks::create))
        .route("/v1/scheduled-tasks/:uuid/pause", post(handlers::scheduled_tasks::pause))
        .route("/v1/scheduled-tasks/:uuid/resume", post(handlers::scheduled_tasks::resume))
        .route("/v1/scheduled-tasks/:uuid/executions", get(handlers::scheduled_tasks::list_executions))
        .route(
            "/v1/scheduled-tasks/:uuid/executions/:execution_uuid/cancel",
            post(handlers::scheduled_tasks::cancel_execution),
        )
        .layer(axum::middleware::from_fn_with_state(state.clone(), auth_middleware));

    Router::new()
        .merge(public_routes)
        .merge(protected_routes)
        .layer(ServiceBuilder::new().layer(TraceLayer::new_for_http()).layer(cors))
        .with_state(state)
}
