//! Analysis task endpoints. Validation and ownership checks live in
//! [`AnalysisTaskService`](emvox_core::service::AnalysisTaskService);
//! these handlers only translate between HTTP and the service.

use axum::{
    Json,
    extract::{Path, Query, State},
};
use serde::Deserialize;

use emvox_core::service::{SegmentPage, TaskDetail, TaskView};
use emvox_core::types::{AudioId, TaskId};

use crate::auth::RequireAuth;
use crate::errors::AppResult;
use crate::infra::app_state::AppState;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateTaskBody {
    pub audio_id: i64,
}

#[derive(Debug, Default, Deserialize)]
pub struct PageParams {
    pub offset: Option<i64>,
    pub limit: Option<i64>,
}

/// Queue emotion analysis for an uploaded recording.
///
/// Idempotent per recording: if a live task already exists for the same
/// audio, that task is returned instead of a duplicate.
///
/// # Response
///
/// - `200 OK` with the task row (including its display `taskNo`)
/// - `400 Bad Request` if the recording is soft-deleted
/// - `403 Forbidden` if the caller does not own the recording
/// - `404 Not Found` if the recording does not exist
pub async fn create_task(
    State(state): State<AppState>,
    RequireAuth(identity): RequireAuth,
    Json(body): Json<CreateTaskBody>,
) -> AppResult<Json<TaskView>> {
    let view = state.tasks.enqueue(identity, AudioId(body.audio_id)).await?;
    Ok(Json(view))
}

/// Fetch one task with its recomputed risk summary and result metadata.
///
/// `riskSummary` and `result` stay `null` until a result bundle has been
/// persisted; the transcript itself is never returned here, only
/// `result.hasTranscript`.
pub async fn get_task(
    State(state): State<AppState>,
    RequireAuth(identity): RequireAuth,
    Path(id): Path<i64>,
) -> AppResult<Json<TaskDetail>> {
    let detail = state.tasks.task_detail(identity, TaskId(id)).await?;
    Ok(Json(detail))
}

/// Page through the per-segment emotion timeline of a task.
///
/// `limit` defaults to 50 and is capped at 500; `offset` floors at 0.
pub async fn get_task_segments(
    State(state): State<AppState>,
    RequireAuth(identity): RequireAuth,
    Path(id): Path<i64>,
    Query(page): Query<PageParams>,
) -> AppResult<Json<SegmentPage>> {
    let segments = state
        .tasks
        .segments(identity, TaskId(id), page.offset, page.limit)
        .await?;
    Ok(Json(segments))
}
