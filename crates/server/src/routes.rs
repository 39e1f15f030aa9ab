//! Route configuration.

use crate::handlers;
use crate::state::AppState;
use axum::Router;
use axum::routing::{delete, get, post, put};
use tower_http::trace::TraceLayer;

/// Create the application router.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        // Health check (for load balancers/k8s probes)
        .route("/v1/health", get(handlers::health_check))
        // Files
        .route(
            "/v1/files",
            get(handlers::list_files).post(handlers::direct_upload),
        )
        .route("/v1/files/{file_id}", delete(handlers::delete_file))
        .route("/v1/files/{file_id}/content", get(handlers::download_file))
        // Resumable upload sessions
        .route(
            "/v1/uploads/{token}",
            get(handlers::get_session).delete(handlers::abort_session),
        )
        .route(
            "/v1/uploads/{token}/segments/{index}",
            put(handlers::accept_segment),
        )
        .route("/v1/uploads/{token}/finalize", post(handlers::finalize_session))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
