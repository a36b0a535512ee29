//! Snapshot assembly for the realtime task watch endpoint.
//!
//! Snapshots are rebuilt from storage on every push tick; risk is always
//! recomputed from the persisted segments, never read off the task row.
//! Field order in the serialized frame is part of the wire contract, so
//! the payload struct below must keep its declaration order.

use std::sync::Arc;

use serde::Serialize;
use tracing::warn;

use crate::error::Result;
use crate::progress::{ProgressState, ProgressTracker};
use crate::scoring::risk::{self, RiskAssessment};
use crate::scoring::round2;
use crate::store::TaskStore;
use crate::task_no::format_task_no;
use crate::types::{SegmentRecord, TaskId, TaskStatus, WIRE_TIMESTAMP_FORMAT};

/// Curve length pushed for successful tasks.
pub const DEFAULT_CURVE_LIMIT: usize = 180;

/// One rendered snapshot frame. Watchers compare `text` byte-for-byte to
/// suppress identical pushes; `terminal` tells them to close after it.
#[derive(Clone, Debug)]
pub struct Snapshot {
    pub text: String,
    pub terminal: bool,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SnapshotPayload {
    event: &'static str,
    task_id: i64,
    task_no: String,
    status: &'static str,
    attempt_count: i32,
    max_attempts: i32,
    trace_id: Option<String>,
    next_run_at: Option<String>,
    updated_at: String,
    error_message: Option<String>,
    terminal: bool,
    risk_summary: Option<RiskAssessment>,
    progress_summary: Option<ProgressState>,
    risk_curve: Vec<CurvePoint>,
}

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct CurvePoint {
    index: i32,
    start_ms: i64,
    end_ms: i64,
    emotion_code: String,
    confidence: f64,
    risk_index: f64,
}

/// Builds watcher snapshots for single tasks on demand.
#[derive(Clone)]
pub struct SnapshotService {
    store: Arc<dyn TaskStore>,
    progress: ProgressTracker,
    curve_limit: usize,
}

impl SnapshotService {
    pub fn new(store: Arc<dyn TaskStore>, progress: ProgressTracker, curve_limit: usize) -> Self {
        Self {
            store,
            progress,
            curve_limit,
        }
    }

    /// Render the current snapshot, or `None` when the task (or its audio
    /// record) does not exist.
    pub async fn build(&self, task: TaskId) -> Result<Option<Snapshot>> {
        let Some(row) = self.store.find_by_id(task).await? else {
            return Ok(None);
        };
        let Some(audio) = self.store.audio_ref(task).await? else {
            return Ok(None);
        };

        let result = self.store.fetch_result(task).await?;
        let (risk_summary, segments) = match &result {
            Some(record) => {
                // Segment fetch failures degrade; the watcher keeps
                // getting frames, just without a curve.
                let segments = match self.store.segments_all(task).await {
                    Ok(segments) => segments,
                    Err(err) => {
                        warn!(task_id = %task, error = %err, "segment fetch for snapshot failed");
                        Vec::new()
                    }
                };
                let summary = risk::evaluate(&segments, record.stored_text_neg());
                (Some(summary), segments)
            }
            None => (None, Vec::new()),
        };

        let risk_curve = if row.status == TaskStatus::Success {
            curve(&segments, self.curve_limit)
        } else {
            Vec::new()
        };

        let terminal = row.status.is_terminal();
        let payload = SnapshotPayload {
            event: "snapshot",
            task_id: row.id.0,
            task_no: format_task_no(audio.owner_id, row.created_at, row.id),
            status: row.status.as_str(),
            attempt_count: row.attempt_count,
            max_attempts: row.max_attempts,
            trace_id: row.trace_id,
            next_run_at: row
                .next_run_at
                .map(|at| at.format(WIRE_TIMESTAMP_FORMAT).to_string()),
            updated_at: row.updated_at.format(WIRE_TIMESTAMP_FORMAT).to_string(),
            error_message: row.error_message,
            terminal,
            risk_summary,
            progress_summary: self.progress.current(task),
            risk_curve,
        };
        Ok(Some(Snapshot {
            text: serde_json::to_string(&payload)?,
            terminal,
        }))
    }
}

fn curve(segments: &[SegmentRecord], limit: usize) -> Vec<CurvePoint> {
    segments
        .iter()
        .take(limit)
        .map(|segment| CurvePoint {
            index: segment.seq,
            start_ms: segment.start_ms,
            end_ms: segment.end_ms,
            emotion_code: segment.emotion.clone(),
            confidence: segment.confidence,
            risk_index: round2(
                segment.confidence.clamp(0.0, 1.0) * emotion_risk_weight(&segment.emotion) * 100.0,
            ),
        })
        .collect()
}

/// Per-emotion weight feeding the curve's risk index.
fn emotion_risk_weight(code: &str) -> f64 {
    match code.to_uppercase().as_str() {
        "SAD" | "SADNESS" => 1.0,
        "ANG" | "ANGRY" | "ANGER" => 0.85,
        "NEU" | "NEUTRAL" => 0.35,
        "HAP" | "HAPPY" | "JOY" | "POSITIVE" => 0.10,
        _ => 0.45,
    }
}
