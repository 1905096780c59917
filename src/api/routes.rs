use axum::{
    routing::{get, post},
    Router,
};
use tower_http::cors::{Any, CorsLayer};

use crate::api::{handlers, state::AppState};

pub fn create_router(state: AppState) -> Router {
    // CORS configuration
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        // Agent-facing endpoints
        .route(
            "/api/agent/assignments/pending",
            get(handlers::assignments::get_pending_assignments),
        )
        .route(
            "/api/agent/assignments/:offer_id/accept",
            post(handlers::assignments::accept_assignment),
        )
        .route(
            "/api/agent/assignments/:offer_id/reject",
            post(handlers::assignments::reject_assignment),
        )
        // Internal endpoints (listings service)
        .route(
            "/api/internal/properties/:property_id/dispatch",
            post(handlers::system::dispatch_property),
        )
        // Admin endpoints
        .route(
            "/api/admin/assignments/exhausted",
            get(handlers::admin::get_exhausted_assignments),
        )
        .route(
            "/api/admin/assignments/flagged",
            get(handlers::admin::get_flagged_assignments),
        )
        .route(
            "/api/admin/assignments/:property_id/reopen",
            post(handlers::admin::reopen_assignment),
        )
        // Health check
        .route("/health", get(handlers::system::health_check))
        .layer(cors)
        .with_state(state)
}
