//! HTTP routing.

use axum::{
    routing::{get, put},
    Router,
};
use tower_http::trace::TraceLayer;

use crate::handlers;
use crate::state::AppState;

/// Build the application router.
pub fn build_router(state: AppState) -> Router {
    let health_routes = Router::new()
        .route("/health", get(handlers::health_check))
        .route("/api/health", get(handlers::api_health));

    let instance_routes = Router::new()
        .route(
            "/v2/service_instances/{instance_id}",
            put(handlers::provision).delete(handlers::deprovision),
        )
        .route(
            "/v2/service_instances/{instance_id}/last_operation",
            get(handlers::last_operation),
        );

    Router::new()
        .merge(health_routes)
        .merge(instance_routes)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
