use std::{fmt, sync::Arc};

use emvox_core::progress::ProgressTracker;
use emvox_core::realtime::SnapshotService;
use emvox_core::service::AnalysisTaskService;
use emvox_core::store::{SessionDirectory, TaskStore};
use emvox_core::worker::WorkerStatus;

/// Shared handler state. Cheap to clone; everything heavyweight sits
/// behind an `Arc`.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn TaskStore>,
    pub sessions: Arc<dyn SessionDirectory>,
    pub tasks: AnalysisTaskService,
    pub snapshots: SnapshotService,
    pub progress: ProgressTracker,
    pub worker: WorkerHandle,
    /// Rebuild cadence for realtime watchers, already floored by the
    /// config guard rails.
    pub push_interval_ms: u64,
}

impl fmt::Debug for AppState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AppState").finish_non_exhaustive()
    }
}

/// What the status endpoint knows about the embedded worker. `status` is
/// `None` when the worker is disabled for this process.
#[derive(Clone, Debug)]
pub struct WorkerHandle {
    pub enabled: bool,
    pub worker_id: String,
    pub status: Option<Arc<WorkerStatus>>,
}

impl WorkerHandle {
    pub fn disabled(worker_id: String) -> Self {
        Self {
            enabled: false,
            worker_id,
            status: None,
        }
    }

    pub fn running(worker_id: String, status: Arc<WorkerStatus>) -> Self {
        Self {
            enabled: true,
            worker_id,
            status: Some(status),
        }
    }
}
