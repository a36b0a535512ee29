//! Shared fixtures for unit tests.

use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::{EmvoxError, Result};
use crate::store::{QueueCounters, SuccessBundle, TaskStore};
use crate::types::{
    AnalysisResultRecord, AnalysisTask, AudioId, AudioRef, Identity, SegmentRecord, TaskId,
    TaskStatus, UserId, UserRole,
};

/// Primeable [`TaskStore`] stub. Reads return whatever was primed; the
/// write paths record their arguments. Anything a test did not prime or
/// expect panics.
#[derive(Default)]
pub(crate) struct StubStore {
    pub task: Mutex<Option<AnalysisTask>>,
    pub audio: Mutex<Option<AudioRef>>,
    pub result: Mutex<Option<AnalysisResultRecord>>,
    pub segments: Mutex<Vec<SegmentRecord>>,
    pub fail_segments: bool,
    pub reject_persist: bool,
    pub persisted: Mutex<Option<(String, SuccessBundle)>>,
    pub failures: Mutex<Vec<(String, String, u64)>>,
    pub enqueued: Mutex<Vec<(i64, i32, String)>>,
}

impl StubStore {
    pub fn with_audio(audio: AudioRef) -> Self {
        Self {
            audio: Mutex::new(Some(audio)),
            ..Self::default()
        }
    }
}

#[async_trait]
impl TaskStore for StubStore {
    async fn enqueue(&self, audio: AudioId, max_attempts: i32, trace_id: &str) -> Result<AnalysisTask> {
        self.enqueued
            .lock()
            .unwrap()
            .push((audio.0, max_attempts, trace_id.to_string()));
        if let Some(task) = self.task.lock().unwrap().clone() {
            return Ok(task);
        }
        let now = Utc::now();
        Ok(AnalysisTask {
            id: TaskId(1),
            audio_file_id: audio,
            status: TaskStatus::Pending,
            attempt_count: 0,
            max_attempts,
            error_message: None,
            trace_id: Some(trace_id.to_string()),
            locked_by: None,
            locked_at: None,
            next_run_at: None,
            started_at: None,
            finished_at: None,
            duration_ms: None,
            ser_latency_ms: None,
            created_at: now,
            updated_at: now,
        })
    }

    async fn find_eligible(&self, _: i64) -> Result<Vec<AnalysisTask>> {
        unimplemented!()
    }

    async fn claim(&self, _: TaskId, _: &str) -> Result<bool> {
        unimplemented!()
    }

    async fn mark_success(&self, _: TaskId, _: &str, _: i64) -> Result<bool> {
        unimplemented!()
    }

    async fn mark_retry_or_failed(
        &self,
        _task: TaskId,
        worker_id: &str,
        error_message: &str,
        backoff_seconds: u64,
    ) -> Result<bool> {
        self.failures.lock().unwrap().push((
            worker_id.to_string(),
            error_message.to_string(),
            backoff_seconds,
        ));
        Ok(true)
    }

    async fn persist_success(
        &self,
        _task: TaskId,
        worker_id: &str,
        bundle: &SuccessBundle,
    ) -> Result<bool> {
        if self.reject_persist {
            return Ok(false);
        }
        *self.persisted.lock().unwrap() = Some((worker_id.to_string(), bundle.clone()));
        Ok(true)
    }

    async fn find_by_id(&self, _: TaskId) -> Result<Option<AnalysisTask>> {
        Ok(self.task.lock().unwrap().clone())
    }

    async fn audio_ref(&self, _: TaskId) -> Result<Option<AudioRef>> {
        Ok(self.audio.lock().unwrap().clone())
    }

    async fn audio_file(&self, _: AudioId) -> Result<Option<AudioRef>> {
        Ok(self.audio.lock().unwrap().clone())
    }

    async fn mark_deleted_by_audio(&self, _: AudioId) -> Result<u64> {
        unimplemented!()
    }

    async fn fetch_result(&self, _: TaskId) -> Result<Option<AnalysisResultRecord>> {
        Ok(self.result.lock().unwrap().clone())
    }

    async fn segments_page(
        &self,
        _: TaskId,
        offset: i64,
        limit: i64,
    ) -> Result<Vec<SegmentRecord>> {
        let segments = self.segments.lock().unwrap();
        Ok(segments
            .iter()
            .skip(offset as usize)
            .take(limit as usize)
            .cloned()
            .collect())
    }

    async fn segments_all(&self, _: TaskId) -> Result<Vec<SegmentRecord>> {
        if self.fail_segments {
            return Err(EmvoxError::Internal("segment fetch failed".into()));
        }
        Ok(self.segments.lock().unwrap().clone())
    }

    async fn segment_count(&self, _: TaskId) -> Result<i64> {
        Ok(self.segments.lock().unwrap().len() as i64)
    }

    async fn counters(&self, _: DateTime<Utc>) -> Result<QueueCounters> {
        Ok(QueueCounters::default())
    }

    async fn ping(&self) -> Result<()> {
        Ok(())
    }
}

/// A `RUNNING` task row the way `claim` would leave it.
pub(crate) fn running_task(id: i64, attempt_count: i32, max_attempts: i32) -> AnalysisTask {
    let now = Utc::now();
    AnalysisTask {
        id: TaskId(id),
        audio_file_id: AudioId(5),
        status: TaskStatus::Running,
        attempt_count,
        max_attempts,
        error_message: None,
        trace_id: Some(format!("trace-{id}")),
        locked_by: Some("w1".into()),
        locked_at: Some(now),
        next_run_at: None,
        started_at: Some(now),
        finished_at: None,
        duration_ms: None,
        ser_latency_ms: None,
        created_at: now,
        updated_at: now,
    }
}

pub(crate) fn active_audio(storage_path: &str) -> AudioRef {
    AudioRef {
        audio_id: AudioId(5),
        owner_id: UserId(1),
        storage_path: storage_path.to_string(),
        original_name: "recording.wav".into(),
        status: "ACTIVE".into(),
    }
}

pub(crate) fn user_identity(id: i64) -> Identity {
    Identity {
        user_id: UserId(id),
        role: UserRole::User,
    }
}

pub(crate) fn admin_identity(id: i64) -> Identity {
    Identity {
        user_id: UserId(id),
        role: UserRole::Admin,
    }
}
