//! PostgreSQL implementation of the task store and session directory.
//!
//! All statements bind at runtime; the conditional updates rely on
//! `rows_affected()` as the CAS outcome.

use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPool, PgPoolOptions};
use tracing::warn;

use crate::error::{EmvoxError, Result};
use crate::store::{QueueCounters, SessionDirectory, SuccessBundle, TaskStore};
use crate::types::{
    AnalysisResultRecord, AnalysisTask, AudioId, AudioRef, Identity, SegmentRecord, TaskId,
    TaskStatus, UserId, UserRole,
};

/// Open a bounded connection pool against the primary database.
pub async fn connect(database_url: &str) -> Result<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(10)
        .acquire_timeout(Duration::from_secs(10))
        .connect(database_url)
        .await?;
    Ok(pool)
}

const TASK_COLUMNS: &str = "id, audio_file_id, status, attempt_count, max_attempts, \
     error_message, trace_id, locked_by, locked_at, next_run_at, started_at, \
     finished_at, duration_ms, ser_latency_ms, created_at, updated_at";

const MARK_SUCCESS_SQL: &str = "UPDATE analysis_tasks \
     SET status = 'SUCCESS', \
         finished_at = NOW(), \
         duration_ms = (EXTRACT(EPOCH FROM (NOW() - started_at)) * 1000)::BIGINT, \
         ser_latency_ms = $3, \
         error_message = NULL, \
         locked_by = NULL, \
         locked_at = NULL, \
         next_run_at = NULL, \
         updated_at = NOW() \
     WHERE id = $1 AND status = 'RUNNING' AND locked_by = $2";

#[derive(sqlx::FromRow)]
struct TaskRow {
    id: i64,
    audio_file_id: i64,
    status: String,
    attempt_count: i32,
    max_attempts: i32,
    error_message: Option<String>,
    trace_id: Option<String>,
    locked_by: Option<String>,
    locked_at: Option<DateTime<Utc>>,
    next_run_at: Option<DateTime<Utc>>,
    started_at: Option<DateTime<Utc>>,
    finished_at: Option<DateTime<Utc>>,
    duration_ms: Option<i64>,
    ser_latency_ms: Option<i64>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<TaskRow> for AnalysisTask {
    type Error = EmvoxError;

    fn try_from(row: TaskRow) -> Result<Self> {
        let status = TaskStatus::from_str(&row.status)
            .map_err(|e| EmvoxError::Internal(format!("corrupt task row {}: {e}", row.id)))?;
        Ok(AnalysisTask {
            id: TaskId(row.id),
            audio_file_id: AudioId(row.audio_file_id),
            status,
            attempt_count: row.attempt_count,
            max_attempts: row.max_attempts,
            error_message: row.error_message,
            trace_id: row.trace_id,
            locked_by: row.locked_by,
            locked_at: row.locked_at,
            next_run_at: row.next_run_at,
            started_at: row.started_at,
            finished_at: row.finished_at,
            duration_ms: row.duration_ms,
            ser_latency_ms: row.ser_latency_ms,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct AudioRow {
    audio_id: i64,
    owner_id: i64,
    storage_path: String,
    original_name: String,
    status: String,
}

impl From<AudioRow> for AudioRef {
    fn from(row: AudioRow) -> Self {
        AudioRef {
            audio_id: AudioId(row.audio_id),
            owner_id: UserId(row.owner_id),
            storage_path: row.storage_path,
            original_name: row.original_name,
            status: row.status,
        }
    }
}

#[derive(sqlx::FromRow)]
struct SegmentRow {
    seq: i32,
    start_ms: i64,
    end_ms: i64,
    emotion: String,
    confidence: f64,
}

impl From<SegmentRow> for SegmentRecord {
    fn from(row: SegmentRow) -> Self {
        SegmentRecord {
            seq: row.seq,
            start_ms: row.start_ms,
            end_ms: row.end_ms,
            emotion: row.emotion,
            confidence: row.confidence,
        }
    }
}

#[derive(sqlx::FromRow)]
struct ResultRow {
    task_id: i64,
    model_name: Option<String>,
    overall_emotion: Option<String>,
    confidence: Option<f64>,
    duration_ms: Option<i64>,
    sample_rate: Option<i32>,
    raw_json: serde_json::Value,
    updated_at: DateTime<Utc>,
}

impl From<ResultRow> for AnalysisResultRecord {
    fn from(row: ResultRow) -> Self {
        AnalysisResultRecord {
            task_id: TaskId(row.task_id),
            model_name: row.model_name,
            overall_emotion: row.overall_emotion,
            confidence: row.confidence,
            duration_ms: row.duration_ms,
            sample_rate: row.sample_rate,
            raw: row.raw_json,
            updated_at: row.updated_at,
        }
    }
}

#[derive(sqlx::FromRow)]
struct CountersRow {
    active: i64,
    succeeded: i64,
    failed: i64,
    avg_duration_ms: Option<f64>,
    ser_timeouts: i64,
}

#[derive(Clone, Debug)]
pub struct PgTaskStore {
    pool: PgPool,
}

impl PgTaskStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn find_live_by_audio(&self, audio: AudioId) -> Result<Option<AnalysisTask>> {
        let sql = format!(
            "SELECT {TASK_COLUMNS} FROM analysis_tasks \
             WHERE audio_file_id = $1 AND status <> 'DELETED' \
             ORDER BY created_at ASC LIMIT 1"
        );
        let row = sqlx::query_as::<_, TaskRow>(&sql)
            .bind(audio.0)
            .fetch_optional(&self.pool)
            .await?;
        row.map(AnalysisTask::try_from).transpose()
    }
}

#[async_trait]
impl TaskStore for PgTaskStore {
    async fn enqueue(
        &self,
        audio_id: AudioId,
        max_attempts: i32,
        trace_id: &str,
    ) -> Result<AnalysisTask> {
        // Fast path: reuse the live task instead of tripping the partial
        // unique index and spamming the Postgres log with violations.
        if let Some(existing) = self.find_live_by_audio(audio_id).await? {
            return Ok(existing);
        }

        let sql = format!(
            "INSERT INTO analysis_tasks \
                 (audio_file_id, status, attempt_count, max_attempts, trace_id, created_at, updated_at) \
             VALUES ($1, 'PENDING', 0, $2, $3, NOW(), NOW()) \
             RETURNING {TASK_COLUMNS}"
        );
        let inserted = sqlx::query_as::<_, TaskRow>(&sql)
            .bind(audio_id.0)
            .bind(max_attempts)
            .bind(trace_id)
            .fetch_one(&self.pool)
            .await;

        match inserted {
            Ok(row) => row.try_into(),
            Err(sqlx::Error::Database(db_err))
                if db_err.code().as_deref() == Some("23505") =>
            {
                // Lost the insert race; the winner is the live task.
                self.find_live_by_audio(audio_id).await?.ok_or_else(|| {
                    EmvoxError::Internal(format!(
                        "enqueue conflict for audio {audio_id} but no live task found"
                    ))
                })
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn find_eligible(&self, limit: i64) -> Result<Vec<AnalysisTask>> {
        let sql = format!(
            "SELECT {TASK_COLUMNS} FROM analysis_tasks \
             WHERE status IN ('PENDING', 'RETRY_WAIT') \
               AND (next_run_at IS NULL OR next_run_at <= NOW()) \
             ORDER BY created_at ASC, id ASC \
             LIMIT $1"
        );
        let rows = sqlx::query_as::<_, TaskRow>(&sql)
            .bind(limit)
            .fetch_all(&self.pool)
            .await?;
        rows.into_iter().map(AnalysisTask::try_from).collect()
    }

    async fn claim(&self, task: TaskId, worker_id: &str) -> Result<bool> {
        let updated = sqlx::query(
            "UPDATE analysis_tasks \
             SET status = 'RUNNING', \
                 locked_by = $2, \
                 locked_at = NOW(), \
                 started_at = COALESCE(started_at, NOW()), \
                 updated_at = NOW() \
             WHERE id = $1 \
               AND status IN ('PENDING', 'RETRY_WAIT') \
               AND (next_run_at IS NULL OR next_run_at <= NOW())",
        )
        .bind(task.0)
        .bind(worker_id)
        .execute(&self.pool)
        .await?;
        Ok(updated.rows_affected() == 1)
    }

    async fn mark_success(
        &self,
        task: TaskId,
        worker_id: &str,
        ser_latency_ms: i64,
    ) -> Result<bool> {
        let updated = sqlx::query(MARK_SUCCESS_SQL)
            .bind(task.0)
            .bind(worker_id)
            .bind(ser_latency_ms)
            .execute(&self.pool)
            .await?;
        Ok(updated.rows_affected() == 1)
    }

    async fn mark_retry_or_failed(
        &self,
        task: TaskId,
        worker_id: &str,
        error_message: &str,
        backoff_seconds: u64,
    ) -> Result<bool> {
        let updated = sqlx::query(
            "UPDATE analysis_tasks \
             SET attempt_count = attempt_count + 1, \
                 status = CASE WHEN attempt_count + 1 >= max_attempts \
                               THEN 'FAILED' ELSE 'RETRY_WAIT' END, \
                 error_message = $3, \
                 next_run_at = CASE WHEN attempt_count + 1 >= max_attempts \
                                    THEN NULL \
                                    ELSE NOW() + make_interval(secs => $4) END, \
                 finished_at = CASE WHEN attempt_count + 1 >= max_attempts \
                                    THEN NOW() ELSE NULL END, \
                 duration_ms = CASE WHEN attempt_count + 1 >= max_attempts \
                                    THEN (EXTRACT(EPOCH FROM (NOW() - started_at)) * 1000)::BIGINT \
                                    ELSE NULL END, \
                 locked_by = NULL, \
                 locked_at = NULL, \
                 updated_at = NOW() \
             WHERE id = $1 AND status = 'RUNNING' AND locked_by = $2",
        )
        .bind(task.0)
        .bind(worker_id)
        .bind(error_message)
        .bind(backoff_seconds as f64)
        .execute(&self.pool)
        .await?;
        Ok(updated.rows_affected() == 1)
    }

    async fn persist_success(
        &self,
        task: TaskId,
        worker_id: &str,
        bundle: &SuccessBundle,
    ) -> Result<bool> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            "INSERT INTO analysis_results \
                 (task_id, model_name, overall_emotion, confidence, duration_ms, sample_rate, \
                  raw_json, created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, NOW(), NOW()) \
             ON CONFLICT (task_id) DO UPDATE \
             SET model_name = EXCLUDED.model_name, \
                 overall_emotion = EXCLUDED.overall_emotion, \
                 confidence = EXCLUDED.confidence, \
                 duration_ms = EXCLUDED.duration_ms, \
                 sample_rate = EXCLUDED.sample_rate, \
                 raw_json = EXCLUDED.raw_json, \
                 updated_at = NOW()",
        )
        .bind(task.0)
        .bind(&bundle.model_name)
        .bind(&bundle.overall_emotion)
        .bind(bundle.confidence)
        .bind(bundle.audio_duration_ms)
        .bind(bundle.sample_rate)
        .bind(sqlx::types::Json(&bundle.raw))
        .execute(&mut *tx)
        .await?;

        sqlx::query("DELETE FROM analysis_segments WHERE task_id = $1")
            .bind(task.0)
            .execute(&mut *tx)
            .await?;
        for segment in &bundle.segments {
            sqlx::query(
                "INSERT INTO analysis_segments \
                     (task_id, seq, start_ms, end_ms, emotion, confidence) \
                 VALUES ($1, $2, $3, $4, $5, $6)",
            )
            .bind(task.0)
            .bind(segment.seq)
            .bind(segment.start_ms)
            .bind(segment.end_ms)
            .bind(&segment.emotion)
            .bind(segment.confidence)
            .execute(&mut *tx)
            .await?;
        }

        let updated = sqlx::query(MARK_SUCCESS_SQL)
            .bind(task.0)
            .bind(worker_id)
            .bind(bundle.ser_latency_ms)
            .execute(&mut *tx)
            .await?;
        if updated.rows_affected() != 1 {
            tx.rollback().await?;
            warn!(task_id = %task, worker_id, "lock ownership lost before success commit");
            return Ok(false);
        }

        let audio_id = sqlx::query_scalar::<_, i64>(
            "SELECT audio_file_id FROM analysis_tasks WHERE id = $1",
        )
        .bind(task.0)
        .fetch_one(&mut *tx)
        .await?;

        sqlx::query(
            "INSERT INTO analysis_reports \
                 (task_id, audio_file_id, report_json, risk_level, overall_emotion, created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5, NOW(), NOW()) \
             ON CONFLICT (task_id) DO UPDATE \
             SET report_json = EXCLUDED.report_json, \
                 risk_level = EXCLUDED.risk_level, \
                 overall_emotion = EXCLUDED.overall_emotion, \
                 updated_at = NOW()",
        )
        .bind(task.0)
        .bind(audio_id)
        .bind(sqlx::types::Json(&bundle.raw))
        .bind(&bundle.risk_level)
        .bind(&bundle.overall_emotion)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(true)
    }

    async fn find_by_id(&self, task: TaskId) -> Result<Option<AnalysisTask>> {
        let sql = format!("SELECT {TASK_COLUMNS} FROM analysis_tasks WHERE id = $1");
        let row = sqlx::query_as::<_, TaskRow>(&sql)
            .bind(task.0)
            .fetch_optional(&self.pool)
            .await?;
        row.map(AnalysisTask::try_from).transpose()
    }

    async fn audio_ref(&self, task: TaskId) -> Result<Option<AudioRef>> {
        let row = sqlx::query_as::<_, AudioRow>(
            "SELECT a.id AS audio_id, a.user_id AS owner_id, a.storage_path, \
                    a.original_name, a.status \
             FROM analysis_tasks t \
             JOIN audio_files a ON a.id = t.audio_file_id \
             WHERE t.id = $1",
        )
        .bind(task.0)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(AudioRef::from))
    }

    async fn audio_file(&self, audio: AudioId) -> Result<Option<AudioRef>> {
        let row = sqlx::query_as::<_, AudioRow>(
            "SELECT id AS audio_id, user_id AS owner_id, storage_path, \
                    original_name, status \
             FROM audio_files \
             WHERE id = $1",
        )
        .bind(audio.0)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(AudioRef::from))
    }

    async fn mark_deleted_by_audio(&self, audio: AudioId) -> Result<u64> {
        let updated = sqlx::query(
            "UPDATE analysis_tasks \
             SET status = 'DELETED', updated_at = NOW() \
             WHERE audio_file_id = $1 AND status <> 'DELETED'",
        )
        .bind(audio.0)
        .execute(&self.pool)
        .await?;
        Ok(updated.rows_affected())
    }

    async fn fetch_result(&self, task: TaskId) -> Result<Option<AnalysisResultRecord>> {
        let row = sqlx::query_as::<_, ResultRow>(
            "SELECT task_id, model_name, overall_emotion, confidence, duration_ms, \
                    sample_rate, raw_json, updated_at \
             FROM analysis_results \
             WHERE task_id = $1",
        )
        .bind(task.0)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(AnalysisResultRecord::from))
    }

    async fn segments_page(
        &self,
        task: TaskId,
        offset: i64,
        limit: i64,
    ) -> Result<Vec<SegmentRecord>> {
        let rows = sqlx::query_as::<_, SegmentRow>(
            "SELECT seq, start_ms, end_ms, emotion, confidence \
             FROM analysis_segments \
             WHERE task_id = $1 \
             ORDER BY seq ASC \
             OFFSET $2 LIMIT $3",
        )
        .bind(task.0)
        .bind(offset)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(SegmentRecord::from).collect())
    }

    async fn segments_all(&self, task: TaskId) -> Result<Vec<SegmentRecord>> {
        let rows = sqlx::query_as::<_, SegmentRow>(
            "SELECT seq, start_ms, end_ms, emotion, confidence \
             FROM analysis_segments \
             WHERE task_id = $1 \
             ORDER BY seq ASC",
        )
        .bind(task.0)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(SegmentRecord::from).collect())
    }

    async fn segment_count(&self, task: TaskId) -> Result<i64> {
        let count = sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM analysis_segments WHERE task_id = $1",
        )
        .bind(task.0)
        .fetch_one(&self.pool)
        .await?;
        Ok(count)
    }

    async fn counters(&self, since: DateTime<Utc>) -> Result<QueueCounters> {
        let row = sqlx::query_as::<_, CountersRow>(
            "SELECT \
                 COUNT(*) FILTER (WHERE status IN ('PENDING', 'RUNNING', 'RETRY_WAIT')) AS active, \
                 COUNT(*) FILTER (WHERE status = 'SUCCESS' AND finished_at >= $1) AS succeeded, \
                 COUNT(*) FILTER (WHERE status = 'FAILED' AND finished_at >= $1) AS failed, \
                 (AVG(duration_ms) FILTER (WHERE status = 'SUCCESS' AND finished_at >= $1))::DOUBLE PRECISION AS avg_duration_ms, \
                 COUNT(*) FILTER (WHERE error_message LIKE 'TIMEOUT:%' AND updated_at >= $1) AS ser_timeouts \
             FROM analysis_tasks",
        )
        .bind(since)
        .fetch_one(&self.pool)
        .await?;
        Ok(QueueCounters {
            active: row.active,
            succeeded: row.succeeded,
            failed: row.failed,
            avg_duration_ms: row.avg_duration_ms,
            ser_timeouts: row.ser_timeouts,
        })
    }

    async fn ping(&self) -> Result<()> {
        sqlx::query_scalar::<_, i32>("SELECT 1")
            .fetch_one(&self.pool)
            .await?;
        Ok(())
    }
}

#[derive(Clone, Debug)]
pub struct PgSessionDirectory {
    pool: PgPool,
}

impl PgSessionDirectory {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SessionDirectory for PgSessionDirectory {
    async fn lookup(&self, token: &str) -> Result<Option<Identity>> {
        let row = sqlx::query_as::<_, (i64, String, DateTime<Utc>)>(
            "SELECT s.user_id, u.role, s.expires_at \
             FROM user_sessions s \
             JOIN users u ON u.id = s.user_id \
             WHERE s.token = $1",
        )
        .bind(token)
        .fetch_optional(&self.pool)
        .await?;

        let Some((user_id, role, expires_at)) = row else {
            return Ok(None);
        };
        if expires_at <= Utc::now() {
            return Ok(None);
        }
        let role = UserRole::from_str(&role)
            .map_err(|e| EmvoxError::Internal(format!("corrupt session for user {user_id}: {e}")))?;
        Ok(Some(Identity {
            user_id: UserId(user_id),
            role,
        }))
    }
}
