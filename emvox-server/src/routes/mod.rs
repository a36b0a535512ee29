pub mod v1;

use axum::{Router, routing::get};
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::handlers::{realtime, system};
use crate::infra::app_state::AppState;

/// Create the main API router with all versions
pub fn create_api_router() -> Router<AppState> {
    Router::new().nest("/api/v1", v1::create_v1_router())
    // Future versions can be added here:
    // .nest("/api/v2", v2::create_v2_router())
}

/// Assemble the full application: public probes, the versioned API, and
/// the realtime watch endpoint, with CORS and tracing layered on top.
pub fn create_app(state: AppState) -> Router {
    Router::new()
        .route("/ping", get(system::ping_handler))
        .route("/health", get(system::health_handler))
        .route("/ws/tasks", get(realtime::task_snapshots))
        .merge(create_api_router())
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
