//! Task-facing application service behind the HTTP handlers.
//!
//! Owns validation and authorization for the task surface; handlers stay
//! thin. Risk summaries are recomputed from the persisted segments on
//! every read, mirroring the snapshot path.

use std::sync::Arc;

use chrono::{Duration, Utc};
use serde::Serialize;
use tracing::info;
use uuid::Uuid;

use crate::error::{EmvoxError, Result};
use crate::scoring::risk::{self, RiskAssessment};
use crate::store::{QueueCounters, TaskStore};
use crate::task_no::format_task_no;
use crate::types::{
    AnalysisTask, AudioId, Identity, SegmentRecord, TaskId, TaskStatus, UserId, UserRole,
    WIRE_TIMESTAMP_FORMAT,
};

pub const DEFAULT_SEGMENT_PAGE: i64 = 50;
pub const MAX_SEGMENT_PAGE: i64 = 500;

/// Window for the succeeded/failed/average counters on the status surface.
pub const STATUS_WINDOW_HOURS: i64 = 24;

/// Task row shaped for the HTTP surface.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskView {
    pub task_id: i64,
    pub task_no: String,
    pub audio_id: i64,
    pub status: TaskStatus,
    pub attempt_count: i32,
    pub max_attempts: i32,
    pub trace_id: Option<String>,
    pub error_message: Option<String>,
    pub next_run_at: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

impl TaskView {
    fn from_row(task: AnalysisTask, owner: UserId) -> Self {
        Self {
            task_id: task.id.0,
            task_no: format_task_no(owner, task.created_at, task.id),
            audio_id: task.audio_file_id.0,
            status: task.status,
            attempt_count: task.attempt_count,
            max_attempts: task.max_attempts,
            trace_id: task.trace_id,
            error_message: task.error_message,
            next_run_at: task
                .next_run_at
                .map(|at| at.format(WIRE_TIMESTAMP_FORMAT).to_string()),
            created_at: task.created_at.format(WIRE_TIMESTAMP_FORMAT).to_string(),
            updated_at: task.updated_at.format(WIRE_TIMESTAMP_FORMAT).to_string(),
        }
    }
}

/// Result row summary; the transcript itself stays in the raw bundle, the
/// detail view only reports whether one exists.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResultView {
    pub model_name: Option<String>,
    pub overall_emotion: Option<String>,
    pub confidence: Option<f64>,
    pub duration_ms: Option<i64>,
    pub sample_rate: Option<i32>,
    pub has_transcript: bool,
    pub updated_at: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskDetail {
    #[serde(flatten)]
    pub task: TaskView,
    pub risk_summary: Option<RiskAssessment>,
    pub result: Option<ResultView>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SegmentPage {
    pub items: Vec<SegmentRecord>,
    pub total: i64,
    pub offset: i64,
    pub limit: i64,
}

#[derive(Clone)]
pub struct AnalysisTaskService {
    store: Arc<dyn TaskStore>,
    max_attempts: i32,
}

impl AnalysisTaskService {
    pub fn new(store: Arc<dyn TaskStore>, max_attempts: i32) -> Self {
        Self {
            store,
            max_attempts,
        }
    }

    /// Queue analysis for a recording. Idempotent: a live task for the
    /// same audio is returned instead of a second insert.
    pub async fn enqueue(&self, identity: Identity, audio: AudioId) -> Result<TaskView> {
        let Some(record) = self.store.audio_file(audio).await? else {
            return Err(EmvoxError::NotFound(format!("audio {audio} not found")));
        };
        if !identity.can_access(record.owner_id) {
            return Err(EmvoxError::Forbidden(
                "not the owner of this recording".into(),
            ));
        }
        if !record.is_active() {
            return Err(EmvoxError::InvalidInput(format!(
                "audio {audio} is not active ({})",
                record.status
            )));
        }

        let trace_id = Uuid::now_v7().simple().to_string();
        let task = self
            .store
            .enqueue(audio, self.max_attempts, &trace_id)
            .await?;
        info!(
            task_id = %task.id,
            audio_id = %audio,
            status = %task.status,
            "analysis task enqueued"
        );
        Ok(TaskView::from_row(task, record.owner_id))
    }

    pub async fn task_detail(&self, identity: Identity, task: TaskId) -> Result<TaskDetail> {
        let Some(row) = self.store.find_by_id(task).await? else {
            return Err(EmvoxError::NotFound(format!("task {task} not found")));
        };
        let Some(audio) = self.store.audio_ref(task).await? else {
            return Err(EmvoxError::NotFound(format!("task {task} not found")));
        };
        if !identity.can_access(audio.owner_id) {
            return Err(EmvoxError::Forbidden(
                "not the owner of this recording".into(),
            ));
        }

        let (risk_summary, result) = match self.store.fetch_result(task).await? {
            Some(record) => {
                let segments = self.store.segments_all(task).await?;
                let summary = risk::evaluate(&segments, record.stored_text_neg());
                let has_transcript = !record.stored_transcript().is_empty();
                let view = ResultView {
                    model_name: record.model_name,
                    overall_emotion: record.overall_emotion,
                    confidence: record.confidence,
                    duration_ms: record.duration_ms,
                    sample_rate: record.sample_rate,
                    has_transcript,
                    updated_at: record.updated_at.format(WIRE_TIMESTAMP_FORMAT).to_string(),
                };
                (Some(summary), Some(view))
            }
            None => (None, None),
        };

        Ok(TaskDetail {
            task: TaskView::from_row(row, audio.owner_id),
            risk_summary,
            result,
        })
    }

    /// Ordered segment page; limit defaults to 50 and is capped at 500.
    pub async fn segments(
        &self,
        identity: Identity,
        task: TaskId,
        offset: Option<i64>,
        limit: Option<i64>,
    ) -> Result<SegmentPage> {
        let Some(audio) = self.store.audio_ref(task).await? else {
            return Err(EmvoxError::NotFound(format!("task {task} not found")));
        };
        if !identity.can_access(audio.owner_id) {
            return Err(EmvoxError::Forbidden(
                "not the owner of this recording".into(),
            ));
        }

        let offset = offset.unwrap_or(0).max(0);
        let limit = limit
            .unwrap_or(DEFAULT_SEGMENT_PAGE)
            .clamp(1, MAX_SEGMENT_PAGE);
        let items = self.store.segments_page(task, offset, limit).await?;
        let total = self.store.segment_count(task).await?;
        Ok(SegmentPage {
            items,
            total,
            offset,
            limit,
        })
    }

    /// Queue counters over the last [`STATUS_WINDOW_HOURS`]; admin only.
    pub async fn queue_counters(&self, identity: Identity) -> Result<QueueCounters> {
        if identity.role != UserRole::Admin {
            return Err(EmvoxError::Forbidden("admin only".into()));
        }
        let since = Utc::now() - Duration::hours(STATUS_WINDOW_HOURS);
        self.store.counters(since).await
    }
}
