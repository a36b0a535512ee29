//! Fixed-delay polling worker.
//!
//! One loop per process; horizontal scaling is just more processes pointed
//! at the same database, with `claim`'s conditional update as the only
//! coordination. Candidates are processed sequentially within a tick, and
//! the poll delay is measured from the end of one tick to the start of the
//! next.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, info, info_span, warn};
use uuid::Uuid;

use crate::clients::{EmotionClient, TranscriptionClient};
use crate::progress::ProgressTracker;
use crate::store::TaskStore;
use crate::types::AnalysisTask;

mod backoff;
mod pipeline;

pub use backoff::{BackoffPolicy, backoff_seconds};

use pipeline::{AttemptOutcome, Pipeline};

#[derive(Clone, Debug)]
pub struct WorkerSettings {
    pub poll_interval_ms: u64,
    pub batch_size: i64,
    pub backoff: BackoffPolicy,
    /// Probe the emotion service before consuming ticks. Off for fixture
    /// deployments where the probe is meaningless.
    pub probe_health: bool,
    pub health_cooldown_ms: u64,
}

impl Default for WorkerSettings {
    fn default() -> Self {
        Self {
            poll_interval_ms: 1_000,
            batch_size: 20,
            backoff: BackoffPolicy::default(),
            probe_health: true,
            health_cooldown_ms: 5_000,
        }
    }
}

/// Counters shared with the status endpoint.
#[derive(Debug, Default)]
pub struct WorkerStatus {
    paused: AtomicBool,
    processed: AtomicU64,
    failed: AtomicU64,
    last_tick_ms: AtomicI64,
}

impl WorkerStatus {
    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::Relaxed)
    }

    pub fn processed(&self) -> u64 {
        self.processed.load(Ordering::Relaxed)
    }

    pub fn failed(&self) -> u64 {
        self.failed.load(Ordering::Relaxed)
    }

    /// Wall-clock millis of the last tick, `None` before the first one.
    pub fn last_tick_ms(&self) -> Option<i64> {
        let stamp = self.last_tick_ms.load(Ordering::Relaxed);
        (stamp != 0).then_some(stamp)
    }

    fn set_paused(&self, paused: bool) {
        self.paused.store(paused, Ordering::Relaxed);
    }

    fn stamp_tick(&self, now_ms: i64) {
        self.last_tick_ms.store(now_ms, Ordering::Relaxed);
    }
}

/// `{app}-{hostname}-{pid}`, or `{app}-{uuid}` when the hostname is not
/// available. Stable for the process lifetime; lock ownership checks
/// compare against it.
pub fn derive_worker_id(app: &str) -> String {
    compose_worker_id(app, std::env::var("HOSTNAME").ok().as_deref())
}

fn compose_worker_id(app: &str, hostname: Option<&str>) -> String {
    match hostname {
        Some(host) if !host.trim().is_empty() => {
            format!("{app}-{}-{}", host.trim(), std::process::id())
        }
        _ => format!("{app}-{}", Uuid::new_v4().simple()),
    }
}

struct HealthGate {
    probe_enabled: bool,
    cooldown: Duration,
    last_probe: Option<Instant>,
    healthy: bool,
}

impl HealthGate {
    fn new(probe_enabled: bool, cooldown: Duration) -> Self {
        Self {
            probe_enabled,
            cooldown,
            last_probe: None,
            healthy: true,
        }
    }

    /// Whether consumption may proceed. Probes at most once per cooldown
    /// window; the cached verdict holds in between.
    async fn allow(&mut self, client: &dyn EmotionClient) -> bool {
        if !self.probe_enabled {
            return true;
        }
        let due = self
            .last_probe
            .is_none_or(|at| at.elapsed() >= self.cooldown);
        if due {
            self.healthy = client.health().await;
            self.last_probe = Some(Instant::now());
        }
        self.healthy
    }
}

pub struct Worker {
    store: Arc<dyn TaskStore>,
    emotion: Arc<dyn EmotionClient>,
    settings: WorkerSettings,
    status: Arc<WorkerStatus>,
    worker_id: String,
    pipeline: Pipeline,
}

impl Worker {
    pub fn new(
        store: Arc<dyn TaskStore>,
        emotion: Arc<dyn EmotionClient>,
        transcription: Arc<dyn TranscriptionClient>,
        progress: ProgressTracker,
        settings: WorkerSettings,
        worker_id: String,
    ) -> Self {
        let pipeline = Pipeline::new(
            Arc::clone(&store),
            Arc::clone(&emotion),
            transcription,
            progress,
            settings.backoff,
            worker_id.clone(),
        );
        Self {
            store,
            emotion,
            settings,
            status: Arc::new(WorkerStatus::default()),
            worker_id,
            pipeline,
        }
    }

    pub fn status(&self) -> Arc<WorkerStatus> {
        Arc::clone(&self.status)
    }

    pub fn worker_id(&self) -> &str {
        &self.worker_id
    }

    pub async fn run(self, shutdown: CancellationToken) {
        info!(worker_id = %self.worker_id, "analysis worker started");
        let mut gate = HealthGate::new(
            self.settings.probe_health,
            Duration::from_millis(self.settings.health_cooldown_ms),
        );
        let poll = Duration::from_millis(self.settings.poll_interval_ms);

        loop {
            self.tick(&mut gate, &shutdown).await;
            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!(worker_id = %self.worker_id, "analysis worker shutting down");
                    break;
                }
                _ = tokio::time::sleep(poll) => {}
            }
        }
    }

    async fn tick(&self, gate: &mut HealthGate, shutdown: &CancellationToken) {
        self.status.stamp_tick(Utc::now().timestamp_millis());

        let was_paused = self.status.is_paused();
        let allowed = gate.allow(self.emotion.as_ref()).await;
        self.status.set_paused(!allowed);
        if !allowed {
            if !was_paused {
                warn!("emotion service unhealthy, pausing task consumption");
            }
            return;
        }
        if was_paused {
            info!("emotion service recovered, resuming task consumption");
        }

        let candidates = match self.store.find_eligible(self.settings.batch_size).await {
            Ok(candidates) => candidates,
            Err(err) => {
                warn!(error = %err, "eligible-task query failed");
                return;
            }
        };

        for task in candidates {
            if shutdown.is_cancelled() {
                break;
            }
            match self.store.claim(task.id, &self.worker_id).await {
                // Lost races are normal with multiple workers; skip quietly.
                Ok(false) => {}
                Ok(true) => self.process(task).await,
                Err(err) => warn!(task_id = %task.id, error = %err, "claim failed"),
            }
        }
    }

    async fn process(&self, task: AnalysisTask) {
        let span = info_span!(
            "analysis_task",
            task_id = %task.id,
            trace_id = task.trace_id.as_deref().unwrap_or(""),
        );
        match self.pipeline.process(&task).instrument(span).await {
            AttemptOutcome::Succeeded => {
                self.status.processed.fetch_add(1, Ordering::Relaxed);
            }
            AttemptOutcome::Failed => {
                self.status.failed.fetch_add(1, Ordering::Relaxed);
            }
            AttemptOutcome::LockLost => {}
        }
    }
}
