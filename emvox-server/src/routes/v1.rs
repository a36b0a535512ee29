use axum::{
    Router,
    routing::{get, post},
};

use crate::handlers::{system, tasks};
use crate::infra::app_state::AppState;

/// Create all v1 API routes
pub fn create_v1_router() -> Router<AppState> {
    Router::new()
        // Analysis task surface
        .route("/analysis/tasks", post(tasks::create_task))
        .route("/analysis/tasks/{id}", get(tasks::get_task))
        .route("/analysis/tasks/{id}/segments", get(tasks::get_task_segments))
        // Operator surface
        .route("/system/status", get(system::system_status))
}
