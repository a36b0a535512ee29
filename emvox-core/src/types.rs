use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Timestamp layout used on every wire surface (snapshots, HTTP views).
pub(crate) const WIRE_TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Unique identifier for analysis tasks. Database-generated; the numeric
/// value also feeds the human-readable task number.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub struct TaskId(pub i64);

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Unique identifier for uploaded audio recordings.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub struct AudioId(pub i64);

impl fmt::Display for AudioId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Unique identifier for user accounts.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub struct UserId(pub i64);

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lifecycle states of an analysis task. `RUNNING` rows always carry a
/// lock (`locked_by`/`locked_at`); `DELETED` rows are invisible to the
/// queue. `CANCELED` never arises from the pipeline itself but is part of
/// the wire contract and terminal for watchers.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskStatus {
    Pending,
    Running,
    RetryWait,
    Success,
    Failed,
    Canceled,
    Deleted,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "PENDING",
            TaskStatus::Running => "RUNNING",
            TaskStatus::RetryWait => "RETRY_WAIT",
            TaskStatus::Success => "SUCCESS",
            TaskStatus::Failed => "FAILED",
            TaskStatus::Canceled => "CANCELED",
            TaskStatus::Deleted => "DELETED",
        }
    }

    /// Watchers stop pushing once a task reaches one of these.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskStatus::Success | TaskStatus::Failed | TaskStatus::Canceled
        )
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(TaskStatus::Pending),
            "RUNNING" => Ok(TaskStatus::Running),
            "RETRY_WAIT" => Ok(TaskStatus::RetryWait),
            "SUCCESS" => Ok(TaskStatus::Success),
            "FAILED" => Ok(TaskStatus::Failed),
            "CANCELED" => Ok(TaskStatus::Canceled),
            "DELETED" => Ok(TaskStatus::Deleted),
            other => Err(format!("unknown task status '{other}'")),
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UserRole {
    Admin,
    User,
}

impl UserRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            UserRole::Admin => "admin",
            UserRole::User => "user",
        }
    }
}

impl FromStr for UserRole {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "admin" => Ok(UserRole::Admin),
            "user" => Ok(UserRole::User),
            other => Err(format!("unknown role '{other}'")),
        }
    }
}

/// Resolved caller identity, produced by the session directory and used
/// only to authorize pipeline operations.
#[derive(Clone, Copy, Debug)]
pub struct Identity {
    pub user_id: UserId,
    pub role: UserRole,
}

impl Identity {
    /// Owners see their own recordings; admins see everything.
    pub fn can_access(&self, owner: UserId) -> bool {
        self.role == UserRole::Admin || self.user_id == owner
    }
}

/// One row of the analysis task table.
#[derive(Clone, Debug)]
pub struct AnalysisTask {
    pub id: TaskId,
    pub audio_file_id: AudioId,
    pub status: TaskStatus,
    pub attempt_count: i32,
    pub max_attempts: i32,
    pub error_message: Option<String>,
    pub trace_id: Option<String>,
    pub locked_by: Option<String>,
    pub locked_at: Option<DateTime<Utc>>,
    pub next_run_at: Option<DateTime<Utc>>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub duration_ms: Option<i64>,
    pub ser_latency_ms: Option<i64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Audio-file record joined to a task: storage location plus owner, which
/// is all the pipeline and authorization checks need.
#[derive(Clone, Debug)]
pub struct AudioRef {
    pub audio_id: AudioId,
    pub owner_id: UserId,
    pub storage_path: String,
    pub original_name: String,
    pub status: String,
}

impl AudioRef {
    pub fn is_active(&self) -> bool {
        self.status == "ACTIVE"
    }
}

/// Persisted per-segment emotion classification, ordered by `seq`.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SegmentRecord {
    pub seq: i32,
    pub start_ms: i64,
    pub end_ms: i64,
    pub emotion: String,
    pub confidence: f64,
}

/// Persisted analysis result row: the denormalized overall emotion plus
/// the full raw payload bundle.
#[derive(Clone, Debug)]
pub struct AnalysisResultRecord {
    pub task_id: TaskId,
    pub model_name: Option<String>,
    pub overall_emotion: Option<String>,
    pub confidence: Option<f64>,
    pub duration_ms: Option<i64>,
    pub sample_rate: Option<i32>,
    pub raw: serde_json::Value,
    pub updated_at: DateTime<Utc>,
}

impl AnalysisResultRecord {
    /// Text-negativity share read back out of the raw bundle. Older rows
    /// only carried it inside the risk assessment block.
    pub fn stored_text_neg(&self) -> f64 {
        self.raw
            .pointer("/textNeg/textNeg")
            .and_then(serde_json::Value::as_f64)
            .or_else(|| {
                self.raw
                    .pointer("/riskAssessment/text_neg")
                    .and_then(serde_json::Value::as_f64)
            })
            .unwrap_or(0.0)
    }

    /// Transcript text out of the raw bundle; empty when transcription
    /// degraded for the attempt.
    pub fn stored_transcript(&self) -> &str {
        self.raw
            .pointer("/transcript")
            .and_then(serde_json::Value::as_str)
            .or_else(|| {
                self.raw
                    .pointer("/asr/text")
                    .and_then(serde_json::Value::as_str)
            })
            .unwrap_or("")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_round_trips_through_db_strings() {
        for status in [
            TaskStatus::Pending,
            TaskStatus::Running,
            TaskStatus::RetryWait,
            TaskStatus::Success,
            TaskStatus::Failed,
            TaskStatus::Canceled,
            TaskStatus::Deleted,
        ] {
            assert_eq!(status.as_str().parse::<TaskStatus>(), Ok(status));
        }
    }

    #[test]
    fn terminal_statuses_match_watcher_contract() {
        assert!(TaskStatus::Success.is_terminal());
        assert!(TaskStatus::Failed.is_terminal());
        assert!(TaskStatus::Canceled.is_terminal());
        assert!(!TaskStatus::Deleted.is_terminal());
        assert!(!TaskStatus::RetryWait.is_terminal());
    }

    #[test]
    fn admins_access_everything_owners_only_their_own() {
        let admin = Identity {
            user_id: UserId(1),
            role: UserRole::Admin,
        };
        let owner = Identity {
            user_id: UserId(2),
            role: UserRole::User,
        };
        assert!(admin.can_access(UserId(99)));
        assert!(owner.can_access(UserId(2)));
        assert!(!owner.can_access(UserId(3)));
    }

    fn result_with_raw(raw: serde_json::Value) -> AnalysisResultRecord {
        AnalysisResultRecord {
            task_id: TaskId(1),
            model_name: None,
            overall_emotion: None,
            confidence: None,
            duration_ms: None,
            sample_rate: None,
            raw,
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn raw_bundle_lookups_fall_back_to_older_layouts() {
        let current = result_with_raw(serde_json::json!({
            "textNeg": {"textNeg": 0.25},
            "transcript": "最近压力很大"
        }));
        assert_eq!(current.stored_text_neg(), 0.25);
        assert_eq!(current.stored_transcript(), "最近压力很大");

        let legacy = result_with_raw(serde_json::json!({
            "riskAssessment": {"text_neg": 0.5},
            "asr": {"text": "睡不着"}
        }));
        assert_eq!(legacy.stored_text_neg(), 0.5);
        assert_eq!(legacy.stored_transcript(), "睡不着");

        let bare = result_with_raw(serde_json::json!({"asr": null}));
        assert_eq!(bare.stored_text_neg(), 0.0);
        assert_eq!(bare.stored_transcript(), "");
    }
}
