//! Liveness, health, and the admin status surface.

use axum::{Json, extract::State, http::StatusCode};
use serde::Serialize;
use serde_json::{Value, json};
use tracing::warn;

use emvox_core::store::QueueCounters;
use emvox_core::worker::WorkerStatus;

use crate::auth::RequireAuth;
use crate::errors::AppResult;
use crate::infra::app_state::{AppState, WorkerHandle};

pub async fn ping_handler() -> Result<Json<Value>, StatusCode> {
    Ok(Json(json!({
        "status": "ok",
        "message": "emvox analysis server is running",
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "version": env!("CARGO_PKG_VERSION")
    })))
}

/// Health probe backed by a live database round trip.
///
/// Returns `503` when the ping fails so load balancers drop the instance.
pub async fn health_handler(State(state): State<AppState>) -> Result<Json<Value>, StatusCode> {
    let mut health_status = json!({
        "status": "healthy",
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "version": env!("CARGO_PKG_VERSION"),
        "checks": {}
    });

    match state.store.ping().await {
        Ok(()) => {
            health_status["checks"]["database"] = json!({ "status": "healthy" });
            Ok(Json(health_status))
        }
        Err(err) => {
            warn!(error = %err, "health check failed: database unreachable");
            Err(StatusCode::SERVICE_UNAVAILABLE)
        }
    }
}

/// Queue and worker counters for operators; admin only.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusView {
    pub queue: QueueView,
    pub worker: WorkerView,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueView {
    pub active: i64,
    pub succeeded_last_24h: i64,
    pub failed_last_24h: i64,
    pub avg_duration_ms: Option<f64>,
    pub ser_timeouts_last_24h: i64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkerView {
    pub enabled: bool,
    pub worker_id: String,
    pub paused: bool,
    pub processed: u64,
    pub failed: u64,
    pub last_tick_ms: Option<i64>,
}

impl From<QueueCounters> for QueueView {
    fn from(counters: QueueCounters) -> Self {
        Self {
            active: counters.active,
            succeeded_last_24h: counters.succeeded,
            failed_last_24h: counters.failed,
            avg_duration_ms: counters.avg_duration_ms,
            ser_timeouts_last_24h: counters.ser_timeouts,
        }
    }
}

impl From<&WorkerHandle> for WorkerView {
    fn from(handle: &WorkerHandle) -> Self {
        let status = handle.status.as_deref();
        Self {
            enabled: handle.enabled,
            worker_id: handle.worker_id.clone(),
            paused: status.map(WorkerStatus::is_paused).unwrap_or(false),
            processed: status.map(WorkerStatus::processed).unwrap_or(0),
            failed: status.map(WorkerStatus::failed).unwrap_or(0),
            last_tick_ms: status.and_then(WorkerStatus::last_tick_ms),
        }
    }
}

pub async fn system_status(
    State(state): State<AppState>,
    RequireAuth(identity): RequireAuth,
) -> AppResult<Json<StatusView>> {
    let counters = state.tasks.queue_counters(identity).await?;
    Ok(Json(StatusView {
        queue: counters.into(),
        worker: WorkerView::from(&state.worker),
    }))
}
