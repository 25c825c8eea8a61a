//! Route configuration.

use crate::auth::{require_admin, trace_middleware};
use crate::handlers;
use crate::metrics::metrics_handler;
use crate::state::AppState;
use axum::Router;
use axum::extract::DefaultBodyLimit;
use axum::middleware;
use axum::routing::{delete, get, post};
use tower_http::trace::TraceLayer;

/// Create the application router.
pub fn create_router(state: AppState) -> Router {
    let admin_routes = Router::new()
        .route(
            "/v1/admin/cleanup/images",
            post(handlers::trigger_cleanup),
        )
        .route("/v1/admin/cleanup/status", get(handlers::cleanup_status))
        .route("/v1/admin/audit", get(handlers::list_audit_logs))
        .route("/v1/uploads/images", post(handlers::upload_image))
        .route("/v1/uploads/images/{*key}", delete(handlers::delete_image))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            require_admin,
        ));

    // Health check is unauthenticated for load balancers and probes.
    let mut router = Router::new()
        .route("/v1/health", get(handlers::health_check))
        .merge(admin_routes);

    // Unauthenticated; restrict at the network level when enabled.
    if state.config.server.metrics_enabled {
        router = router.route("/metrics", get(metrics_handler));
    }

    router
        .layer(DefaultBodyLimit::max(state.config.server.max_body_bytes))
        .layer(middleware::from_fn(trace_middleware))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
