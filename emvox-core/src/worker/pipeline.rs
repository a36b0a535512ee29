//! Per-task processing: SER, ASR, scoring, atomic persist.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use serde_json::json;
use tracing::{error, info, warn};

use crate::clients::{EmotionClient, TranscriptionClient};
use crate::error::{EmvoxError, Result, classify, stored_error_message};
use crate::progress::{Phase, ProgressTracker};
use crate::scoring::{risk, text};
use crate::store::{SuccessBundle, TaskStore};
use crate::types::{AnalysisTask, SegmentRecord};
use crate::worker::backoff::{BackoffPolicy, backoff_seconds};

const STORED_ERROR_MAX_CHARS: usize = 2000;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum AttemptOutcome {
    Succeeded,
    LockLost,
    Failed,
}

pub(crate) struct Pipeline {
    store: Arc<dyn TaskStore>,
    emotion: Arc<dyn EmotionClient>,
    transcription: Arc<dyn TranscriptionClient>,
    progress: ProgressTracker,
    backoff: BackoffPolicy,
    worker_id: String,
}

impl Pipeline {
    pub(crate) fn new(
        store: Arc<dyn TaskStore>,
        emotion: Arc<dyn EmotionClient>,
        transcription: Arc<dyn TranscriptionClient>,
        progress: ProgressTracker,
        backoff: BackoffPolicy,
        worker_id: String,
    ) -> Self {
        Self {
            store,
            emotion,
            transcription,
            progress,
            backoff,
            worker_id,
        }
    }

    /// Run one claimed task through the full attempt, recording the outcome
    /// on the task row either way.
    pub(crate) async fn process(&self, task: &AnalysisTask) -> AttemptOutcome {
        match self.execute(task).await {
            Ok(true) => {
                info!("analysis persisted");
                AttemptOutcome::Succeeded
            }
            Ok(false) => {
                warn!("success not recorded, lock ownership lost");
                AttemptOutcome::LockLost
            }
            Err(err) => {
                self.record_failure(task, &err).await;
                AttemptOutcome::Failed
            }
        }
    }

    async fn execute(&self, task: &AnalysisTask) -> Result<bool> {
        let attempt = task.attempt_count + 1;
        self.progress.publish(
            task.id,
            Phase::Preparing,
            "resolving audio",
            BTreeMap::from([("attempt".to_string(), json!(attempt))]),
        );

        let audio = self.store.audio_ref(task.id).await?.ok_or_else(|| {
            EmvoxError::InvalidInput(format!("no audio record for task {}", task.id))
        })?;
        if !audio.is_active() {
            return Err(EmvoxError::InvalidInput(format!(
                "audio {} is not active ({})",
                audio.audio_id, audio.status
            )));
        }
        let path = Path::new(&audio.storage_path);
        if tokio::fs::metadata(path).await.is_err() {
            return Err(EmvoxError::InvalidInput(format!(
                "audio file missing on disk: {}",
                audio.storage_path
            )));
        }

        self.progress.publish(
            task.id,
            Phase::Emotion,
            "running emotion analysis",
            BTreeMap::new(),
        );
        let ser_started = Instant::now();
        let analysis = self.emotion.analyze(path, &audio.original_name).await?;
        let ser_latency_ms = ser_started.elapsed().as_millis() as i64;

        self.progress.publish(
            task.id,
            Phase::Transcribe,
            "transcribing audio",
            BTreeMap::new(),
        );
        let asr_report = match self.transcription.transcribe(path, &audio.original_name).await {
            Ok(report) => Some(report),
            Err(err) => {
                // Intentional degrade: the text signal is optional.
                warn!(error = %err, "transcription failed, continuing with empty transcript");
                None
            }
        };
        let transcript = asr_report
            .as_ref()
            .map(|report| report.text.clone())
            .unwrap_or_default();

        self.progress.publish(
            task.id,
            Phase::Scoring,
            "computing risk assessment",
            BTreeMap::new(),
        );
        let negativity = text::score(&transcript);
        let segments: Vec<SegmentRecord> = analysis
            .segments
            .iter()
            .enumerate()
            .map(|(index, segment)| SegmentRecord {
                seq: index as i32,
                start_ms: segment.start_ms,
                end_ms: segment.end_ms,
                emotion: segment.emotion_code.clone(),
                confidence: segment.confidence,
            })
            .collect();
        let assessment = risk::evaluate(&segments, negativity.text_neg);

        self.progress.publish(
            task.id,
            Phase::Saving,
            "persisting results",
            BTreeMap::new(),
        );
        let raw = json!({
            "ser": serde_json::to_value(&analysis)?,
            "asr": serde_json::to_value(&asr_report)?,
            "transcript": transcript,
            "textNeg": serde_json::to_value(&negativity)?,
            "riskAssessment": serde_json::to_value(&assessment)?,
        });
        let bundle = SuccessBundle {
            model_name: analysis.model.clone(),
            overall_emotion: analysis.emotion_code.clone(),
            confidence: analysis.confidence,
            audio_duration_ms: analysis.duration_ms,
            sample_rate: analysis.sample_rate,
            raw,
            segments,
            risk_level: assessment.risk_level.as_str().to_string(),
            ser_latency_ms,
        };

        let persisted = self
            .store
            .persist_success(task.id, &self.worker_id, &bundle)
            .await?;
        if persisted {
            self.progress.publish(
                task.id,
                Phase::Done,
                "analysis complete",
                BTreeMap::from([(
                    "riskLevel".to_string(),
                    json!(assessment.risk_level.as_str()),
                )]),
            );
        }
        Ok(persisted)
    }

    async fn record_failure(&self, task: &AnalysisTask, err: &EmvoxError) {
        let category = classify(err);
        let attempt = task.attempt_count + 1;
        let exhausted = attempt >= task.max_attempts;
        let message = stored_error_message(category, &err.to_string(), STORED_ERROR_MAX_CHARS);
        let backoff = backoff_seconds(self.backoff, attempt, category);

        let mut details = BTreeMap::from([
            ("category".to_string(), json!(category.as_str())),
            ("attempt".to_string(), json!(attempt)),
        ]);
        if exhausted {
            self.progress
                .publish(task.id, Phase::Failed, "analysis failed", details);
        } else {
            details.insert("retryInSeconds".to_string(), json!(backoff));
            self.progress.publish(
                task.id,
                Phase::FailedRetrying,
                "attempt failed, will retry",
                details,
            );
        }

        warn!(
            category = %category,
            attempt,
            exhausted,
            error = %err,
            "analysis attempt failed"
        );
        match self
            .store
            .mark_retry_or_failed(task.id, &self.worker_id, &message, backoff)
            .await
        {
            Ok(true) => {}
            Ok(false) => warn!("failure not recorded, lock ownership lost"),
            Err(store_err) => error!(error = %store_err, "recording attempt failure failed"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::io::Write;
    use std::sync::Mutex;

    use async_trait::async_trait;

    use crate::clients::{
        EmotionAnalysis, FixtureEmotionClient, FixtureTranscriptionClient, TranscriptReport,
    };
    use crate::error::ClientError;
    use crate::test_utils::{StubStore, active_audio, running_task};
    use crate::types::TaskId;

    struct TimingOutEmotionClient;

    #[async_trait]
    impl EmotionClient for TimingOutEmotionClient {
        async fn analyze(&self, _: &Path, _: &str) -> Result<EmotionAnalysis> {
            Err(ClientError::Timeout {
                service: "ser",
                message: "deadline exceeded after 180s".into(),
            }
            .into())
        }
        async fn health(&self) -> bool {
            false
        }
        async fn warmup(&self) -> bool {
            false
        }
    }

    struct UnreachableTranscriptionClient;

    #[async_trait]
    impl TranscriptionClient for UnreachableTranscriptionClient {
        async fn transcribe(&self, _: &Path, _: &str) -> Result<TranscriptReport> {
            Err(ClientError::Transport {
                service: "asr",
                message: "connection refused".into(),
            }
            .into())
        }
    }

    fn task(attempt_count: i32, max_attempts: i32) -> AnalysisTask {
        running_task(11, attempt_count, max_attempts)
    }

    fn audio_at(path: &Path) -> crate::types::AudioRef {
        active_audio(&path.to_string_lossy())
    }

    fn temp_audio(len: usize) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(&vec![0u8; len]).unwrap();
        file.flush().unwrap();
        file
    }

    fn pipeline(
        store: Arc<StubStore>,
        emotion: Arc<dyn EmotionClient>,
        transcription: Arc<dyn TranscriptionClient>,
        progress: ProgressTracker,
    ) -> Pipeline {
        Pipeline::new(
            store,
            emotion,
            transcription,
            progress,
            BackoffPolicy::default(),
            "w1".to_string(),
        )
    }

    #[tokio::test]
    async fn successful_attempt_persists_a_full_bundle() {
        let file = temp_audio(48_000);
        let store = Arc::new(StubStore::with_audio(audio_at(file.path())));
        let progress = ProgressTracker::new();
        let pipeline = pipeline(
            store.clone(),
            Arc::new(FixtureEmotionClient::default()),
            Arc::new(FixtureTranscriptionClient),
            progress.clone(),
        );

        let outcome = pipeline.process(&task(0, 4)).await;
        assert_eq!(outcome, AttemptOutcome::Succeeded);

        let (worker_id, bundle) = store.persisted.lock().unwrap().clone().unwrap();
        assert_eq!(worker_id, "w1");
        assert_eq!(bundle.overall_emotion, "neutral");
        assert_eq!(bundle.model_name.as_deref(), Some("fixture-ser"));
        assert_eq!(bundle.sample_rate, Some(16_000));
        assert_eq!(bundle.segments.len(), 2);
        assert_eq!(bundle.segments[1].seq, 1);
        assert_eq!(bundle.risk_level, "NORMAL");
        assert!(bundle.ser_latency_ms >= 0);

        assert_eq!(bundle.raw["ser"]["emotionCode"], "neutral");
        assert!(!bundle.raw["asr"].is_null());
        assert!(!bundle.raw["transcript"].as_str().unwrap().is_empty());
        assert_eq!(bundle.raw["riskAssessment"]["risk_level"], "NORMAL");

        let state = progress.current(TaskId(11)).unwrap();
        assert_eq!(state.phase, Phase::Done);
        assert_eq!(state.sequence, 6);
    }

    #[tokio::test]
    async fn transcription_failure_degrades_to_empty_transcript() {
        let file = temp_audio(48_000);
        let store = Arc::new(StubStore::with_audio(audio_at(file.path())));
        let pipeline = pipeline(
            store.clone(),
            Arc::new(FixtureEmotionClient::default()),
            Arc::new(UnreachableTranscriptionClient),
            ProgressTracker::new(),
        );

        let outcome = pipeline.process(&task(0, 4)).await;
        assert_eq!(outcome, AttemptOutcome::Succeeded);

        let (_, bundle) = store.persisted.lock().unwrap().clone().unwrap();
        assert!(bundle.raw["asr"].is_null());
        assert_eq!(bundle.raw["transcript"], "");
        assert_eq!(bundle.raw["textNeg"]["hitCount"], 0);
        assert!(store.failures.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn emotion_timeout_fails_the_attempt_with_floored_backoff() {
        let file = temp_audio(1_000);
        let store = Arc::new(StubStore::with_audio(audio_at(file.path())));
        let progress = ProgressTracker::new();
        let pipeline = pipeline(
            store.clone(),
            Arc::new(TimingOutEmotionClient),
            Arc::new(FixtureTranscriptionClient),
            progress.clone(),
        );

        let outcome = pipeline.process(&task(0, 4)).await;
        assert_eq!(outcome, AttemptOutcome::Failed);

        let failures = store.failures.lock().unwrap();
        let (_, message, backoff) = &failures[0];
        assert!(message.starts_with("TIMEOUT:"), "got {message}");
        assert_eq!(*backoff, 180);

        let state = progress.current(TaskId(11)).unwrap();
        assert_eq!(state.phase, Phase::FailedRetrying);
        assert_eq!(state.details["category"], "TIMEOUT");
    }

    #[tokio::test]
    async fn exhausted_attempts_publish_terminal_failure() {
        let file = temp_audio(1_000);
        let store = Arc::new(StubStore::with_audio(audio_at(file.path())));
        let progress = ProgressTracker::new();
        let pipeline = pipeline(
            store.clone(),
            Arc::new(TimingOutEmotionClient),
            Arc::new(FixtureTranscriptionClient),
            progress.clone(),
        );

        pipeline.process(&task(3, 4)).await;

        let state = progress.current(TaskId(11)).unwrap();
        assert_eq!(state.phase, Phase::Failed);
        assert_eq!(state.details["attempt"], 4);
    }

    #[tokio::test]
    async fn missing_audio_file_fails_the_attempt() {
        let audio = audio_at(Path::new("/nonexistent/audio.wav"));
        let store = Arc::new(StubStore::with_audio(audio));
        let pipeline = pipeline(
            store.clone(),
            Arc::new(FixtureEmotionClient::default()),
            Arc::new(FixtureTranscriptionClient),
            ProgressTracker::new(),
        );

        let outcome = pipeline.process(&task(0, 4)).await;
        assert_eq!(outcome, AttemptOutcome::Failed);

        let failures = store.failures.lock().unwrap();
        assert!(failures[0].1.starts_with("UNKNOWN:"));
    }

    #[tokio::test]
    async fn lost_lock_is_not_an_error() {
        let file = temp_audio(1_000);
        let store = Arc::new(StubStore {
            audio: Mutex::new(Some(audio_at(file.path()))),
            reject_persist: true,
            ..StubStore::default()
        });
        let pipeline = pipeline(
            store.clone(),
            Arc::new(FixtureEmotionClient::default()),
            Arc::new(FixtureTranscriptionClient),
            ProgressTracker::new(),
        );

        let outcome = pipeline.process(&task(0, 4)).await;
        assert_eq!(outcome, AttemptOutcome::LockLost);
        assert!(store.failures.lock().unwrap().is_empty());
    }
}
