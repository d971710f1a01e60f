use std::sync::Arc;

use axum::middleware::from_fn_with_state;
use axum::routing::{delete, get, post};
use axum::Router;
use tower_http::trace::TraceLayer;

use crate::api::handlers;
use crate::api::middleware::protection_middleware;
use crate::service::ProtectionService;

/// Build the application router.
///
/// Health endpoints stay outside the protection middleware so probes keep
/// answering while an address is blocked; everything under `/api/v1` and
/// `/demo` runs through the pipeline.
pub fn create_router(service: Arc<ProtectionService>) -> Router {
    let api = Router::new()
        .route("/status", get(handlers::service_status))
        .route("/stats", get(handlers::traffic_stats))
        .route(
            "/ip/blacklist",
            get(handlers::blacklist_list).post(handlers::blacklist_add),
        )
        .route("/ip/blacklist/{ip}", delete(handlers::blacklist_remove))
        .route(
            "/ip/whitelist",
            get(handlers::whitelist_list).post(handlers::whitelist_add),
        )
        .route("/ip/whitelist/{ip}", delete(handlers::whitelist_remove))
        .route(
            "/config/rate-limits",
            get(handlers::rate_limit_config).put(handlers::rate_limit_update),
        )
        .route("/circuit-breakers/", get(handlers::circuit_breakers));

    let demo = Router::new()
        .route("/", get(handlers::demo::index))
        .route("/slow", get(handlers::demo::slow))
        .route("/error", get(handlers::demo::error))
        .route("/echo", post(handlers::demo::echo));

    let protected = Router::new()
        .nest("/api/v1", api)
        .nest_service("/demo", demo)
        .layer(from_fn_with_state(service.clone(), protection_middleware));

    Router::new()
        .route("/health", get(handlers::health_basic))
        .route("/health/detailed", get(handlers::health_detailed))
        .merge(protected)
        .fallback(handlers::not_found)
        .layer(TraceLayer::new_for_http())
        .with_state(service)
}

/// Standalone router for the metrics exposition listener.
pub fn create_metrics_router(service: Arc<ProtectionService>, path: &str) -> Router {
    Router::new()
        .route(path, get(handlers::metrics_exposition))
        .with_state(service)
}
