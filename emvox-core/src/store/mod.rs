//! Durable task store port.
//!
//! The analysis task table doubles as the job queue. Mutual exclusion is
//! DB-native: `claim` and the two completion paths are single conditional
//! `UPDATE` statements, and the affected-row count is the outcome. There
//! is no broker and no advisory locking.

mod postgres;

pub use postgres::{PgSessionDirectory, PgTaskStore, connect};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::Result;
use crate::types::{
    AnalysisResultRecord, AnalysisTask, AudioId, AudioRef, Identity, SegmentRecord, TaskId,
};

/// Everything the worker persists for a successful attempt, written in a
/// single transaction together with the `SUCCESS` transition.
#[derive(Clone, Debug)]
pub struct SuccessBundle {
    pub model_name: Option<String>,
    pub overall_emotion: String,
    pub confidence: f64,
    pub audio_duration_ms: Option<i64>,
    pub sample_rate: Option<i32>,
    pub raw: serde_json::Value,
    pub segments: Vec<SegmentRecord>,
    pub risk_level: String,
    pub ser_latency_ms: i64,
}

/// Aggregate counters surfaced on the system status endpoint.
#[derive(Clone, Copy, Debug, Default)]
pub struct QueueCounters {
    pub active: i64,
    pub succeeded: i64,
    pub failed: i64,
    pub avg_duration_ms: Option<f64>,
    pub ser_timeouts: i64,
}

#[async_trait]
pub trait TaskStore: Send + Sync {
    /// Insert a `PENDING` task for the recording, or return the existing
    /// live task (idempotent: at most one non-`DELETED` task per audio).
    async fn enqueue(
        &self,
        audio_id: AudioId,
        max_attempts: i32,
        trace_id: &str,
    ) -> Result<AnalysisTask>;

    /// FIFO candidate scan over `PENDING`/`RETRY_WAIT` rows whose
    /// `next_run_at` has passed (or is unset).
    async fn find_eligible(&self, limit: i64) -> Result<Vec<AnalysisTask>>;

    /// Try to take ownership of a candidate. True iff exactly one row
    /// flipped to `RUNNING`; losing the race is normal.
    async fn claim(&self, task: TaskId, worker_id: &str) -> Result<bool>;

    /// Flip an owned `RUNNING` row to `SUCCESS`, stamping duration and
    /// clearing the lock. False when the caller no longer owns the lock;
    /// callers log that and move on, they never retry it.
    async fn mark_success(&self, task: TaskId, worker_id: &str, ser_latency_ms: i64)
    -> Result<bool>;

    /// Count the attempt as failed: bump `attempt_count`, park the task in
    /// `RETRY_WAIT` with `next_run_at = NOW() + backoff`, or finalize it
    /// as `FAILED` once attempts are exhausted. False when the caller no
    /// longer owns the lock.
    async fn mark_retry_or_failed(
        &self,
        task: TaskId,
        worker_id: &str,
        error_message: &str,
        backoff_seconds: u64,
    ) -> Result<bool>;

    /// Atomic success unit: upsert the result row, replace the segment
    /// rows, flip the task to `SUCCESS`, upsert the report row. Rolls
    /// back and returns false when lock ownership was lost.
    async fn persist_success(
        &self,
        task: TaskId,
        worker_id: &str,
        bundle: &SuccessBundle,
    ) -> Result<bool>;

    async fn find_by_id(&self, task: TaskId) -> Result<Option<AnalysisTask>>;

    /// Audio record joined through the task: storage path + owner.
    async fn audio_ref(&self, task: TaskId) -> Result<Option<AudioRef>>;

    /// Audio record by its own id (enqueue-side validation).
    async fn audio_file(&self, audio: AudioId) -> Result<Option<AudioRef>>;

    /// Flip all live tasks for a recording to `DELETED`; returns how many
    /// rows changed.
    async fn mark_deleted_by_audio(&self, audio: AudioId) -> Result<u64>;

    async fn fetch_result(&self, task: TaskId) -> Result<Option<AnalysisResultRecord>>;

    /// Ordered segment page.
    async fn segments_page(
        &self,
        task: TaskId,
        offset: i64,
        limit: i64,
    ) -> Result<Vec<SegmentRecord>>;

    /// All segments in order, for risk recomputation.
    async fn segments_all(&self, task: TaskId) -> Result<Vec<SegmentRecord>>;

    async fn segment_count(&self, task: TaskId) -> Result<i64>;

    /// Counters for the status endpoint, windowed from `since`.
    async fn counters(&self, since: DateTime<Utc>) -> Result<QueueCounters>;

    /// Cheap connectivity probe (`SELECT 1`).
    async fn ping(&self) -> Result<()>;
}

/// Opaque-token identity lookup backing WebSocket and HTTP authorization.
#[async_trait]
pub trait SessionDirectory: Send + Sync {
    /// Resolve a bearer token to an identity; expired and unknown tokens
    /// both come back as `None`.
    async fn lookup(&self, token: &str) -> Result<Option<Identity>>;
}
