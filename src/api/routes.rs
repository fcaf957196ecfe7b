//! API Routes
//!
//! Configures the Axum router with all coordination server endpoints.

use axum::{
    middleware,
    routing::{delete, get, post, put},
    Router,
};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

use super::handlers::{
    acquire_lock_handler, delete_handler, get_handler, health_handler, rate_limit_handler,
    release_lock_handler, set_handler, stats_handler, AppState,
};
use super::middleware::rate_limit;

/// Creates the main router with all endpoints configured.
///
/// Every route except `/health` counts against the caller's request quota,
/// so health checks keep working while a client is throttled.
pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/set", put(set_handler))
        .route("/get/:key", get(get_handler))
        .route("/del/:key", delete(delete_handler))
        .route(
            "/locks/:key",
            post(acquire_lock_handler).delete(release_lock_handler),
        )
        .route("/ratelimit/:identity", post(rate_limit_handler))
        .route("/stats", get(stats_handler))
        .route_layer(middleware::from_fn_with_state(state.clone(), rate_limit))
        .route("/health", get(health_handler))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
