//! Process-local progress, last-write-wins.
//!
//! Progress only augments the persisted task status; it is lost on restart
//! by design, so nothing here touches the store. One worker writes, any
//! number of realtime connections read.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::Utc;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::types::TaskId;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Phase {
    #[default]
    Preparing,
    Emotion,
    Transcribe,
    Scoring,
    Saving,
    Done,
    FailedRetrying,
    Failed,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressState {
    pub phase: Phase,
    pub message: String,
    pub sequence: u64,
    pub emitted_at_ms: i64,
    pub details: BTreeMap<String, Value>,
}

#[derive(Clone, Debug, Default)]
pub struct ProgressTracker {
    states: Arc<DashMap<i64, ProgressState>>,
}

impl ProgressTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Overwrite the task's progress with the next sequence number.
    pub fn publish(
        &self,
        task: TaskId,
        phase: Phase,
        message: &str,
        details: BTreeMap<String, Value>,
    ) -> ProgressState {
        let mut entry = self.states.entry(task.0).or_default();
        let state = entry.value_mut();
        state.sequence += 1;
        state.phase = phase;
        state.message = message.to_string();
        state.emitted_at_ms = Utc::now().timestamp_millis();
        state.details = sanitize(details);
        state.clone()
    }

    pub fn current(&self, task: TaskId) -> Option<ProgressState> {
        self.states.get(&task.0).map(|entry| entry.value().clone())
    }

    /// Forget a task. Harmless when nothing was ever published for it.
    pub fn clear(&self, task: TaskId) {
        self.states.remove(&task.0);
    }
}

fn sanitize(details: BTreeMap<String, Value>) -> BTreeMap<String, Value> {
    details
        .into_iter()
        .filter(|(key, value)| !key.trim().is_empty() && !value.is_null())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    use serde_json::json;

    #[test]
    fn sequence_increases_per_task() {
        let tracker = ProgressTracker::new();
        let a = TaskId(1);
        let b = TaskId(2);

        tracker.publish(a, Phase::Preparing, "start", BTreeMap::new());
        let second = tracker.publish(a, Phase::Emotion, "ser", BTreeMap::new());
        let other = tracker.publish(b, Phase::Preparing, "start", BTreeMap::new());

        assert_eq!(second.sequence, 2);
        assert_eq!(other.sequence, 1);
    }

    #[test]
    fn last_write_wins() {
        let tracker = ProgressTracker::new();
        let task = TaskId(7);

        tracker.publish(task, Phase::Emotion, "ser", BTreeMap::new());
        tracker.publish(task, Phase::Scoring, "risk", BTreeMap::new());

        let current = tracker.current(task).unwrap();
        assert_eq!(current.phase, Phase::Scoring);
        assert_eq!(current.message, "risk");
        assert_eq!(current.sequence, 2);
    }

    #[test]
    fn unknown_task_has_no_progress() {
        let tracker = ProgressTracker::new();
        assert!(tracker.current(TaskId(99)).is_none());
    }

    #[test]
    fn clear_forgets_the_task() {
        let tracker = ProgressTracker::new();
        let task = TaskId(5);

        tracker.publish(task, Phase::Done, "ok", BTreeMap::new());
        tracker.clear(task);

        assert!(tracker.current(task).is_none());
        // A fresh publish starts the sequence over.
        let state = tracker.publish(task, Phase::Preparing, "again", BTreeMap::new());
        assert_eq!(state.sequence, 1);
    }

    #[test]
    fn details_drop_blank_keys_and_null_values() {
        let tracker = ProgressTracker::new();
        let mut details = BTreeMap::new();
        details.insert("attempt".to_string(), json!(2));
        details.insert("".to_string(), json!("dropped"));
        details.insert("  ".to_string(), json!("dropped"));
        details.insert("reason".to_string(), Value::Null);

        let state = tracker.publish(TaskId(3), Phase::FailedRetrying, "retry", details);

        assert_eq!(state.details.len(), 1);
        assert_eq!(state.details["attempt"], json!(2));
    }

    #[test]
    fn serializes_with_camel_case_keys() {
        let tracker = ProgressTracker::new();
        let state = tracker.publish(TaskId(4), Phase::Done, "ok", BTreeMap::new());
        let json = serde_json::to_value(&state).unwrap();

        assert_eq!(json["phase"], "DONE");
        assert!(json.get("emittedAtMs").is_some());
        assert!(json.get("sequence").is_some());
    }
}
