use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use super::OwnerId;
use crate::{Task, TaskKey};

/// Milliseconds since the unix epoch; clamps pre-epoch times to `0`.
pub fn unix_millis(t: SystemTime) -> i64 {
    t.duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

/// Nanoseconds since the unix epoch; clamps pre-epoch times to `0`.
pub fn unix_nanos(t: SystemTime) -> i64 {
    t.duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as i64)
        .unwrap_or(0)
}

/// Durable projection of one execution, written through the log batcher.
///
/// Timestamps are unix milliseconds. `task_error` is empty on success.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskLogRecord {
    pub task_type: String,
    #[serde(rename = "user_id")]
    pub owner_id: OwnerId,
    #[serde(rename = "task_name")]
    pub name: String,
    pub task_id: i64,
    #[serde(rename = "task_output")]
    pub output: String,
    #[serde(rename = "task_error")]
    pub error: String,
    /// When the scheduler accepted the Save.
    pub schedule_time: i64,
    /// When the executor picked the status up.
    pub real_schedule_time: i64,
    /// When the workload was spawned (after the mutex was taken).
    pub exec_time: i64,
    pub finish_time: i64,
}

impl TaskLogRecord {
    pub fn key(&self) -> TaskKey {
        TaskKey::new(self.task_type.clone(), self.owner_id, self.name.clone())
    }

    pub fn is_success(&self) -> bool {
        self.error.is_empty()
    }
}

/// Alert payload for a failed execution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WarnMessage {
    pub task_type: String,
    #[serde(rename = "user_id")]
    pub owner_id: OwnerId,
    #[serde(rename = "task_name")]
    pub name: String,
    #[serde(default)]
    pub task_id: i64,
    pub message: String,
    /// Unix nanoseconds.
    pub generate_time: i64,
}

impl WarnMessage {
    pub fn for_task(task: &Task, message: impl Into<String>, at: SystemTime) -> Self {
        Self {
            task_type: task.task_type.clone(),
            owner_id: task.owner_id,
            name: task.name.clone(),
            task_id: task.id,
            message: message.into(),
            generate_time: unix_nanos(at),
        }
    }

    /// Placeholder used when a stored warning cannot be decoded.
    pub fn malformed(key: &str, at: SystemTime) -> Self {
        Self {
            task_type: String::new(),
            owner_id: 0,
            name: String::new(),
            task_id: 0,
            message: format!("unreadable warning stored under {key}"),
            generate_time: unix_nanos(at),
        }
    }

    pub fn key(&self) -> TaskKey {
        TaskKey::new(self.task_type.clone(), self.owner_id, self.name.clone())
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[test]
    fn epoch_helpers() {
        let t = UNIX_EPOCH + Duration::from_millis(1_500);
        assert_eq!(unix_millis(t), 1_500);
        assert_eq!(unix_nanos(t), 1_500_000_000);
        assert_eq!(unix_millis(UNIX_EPOCH - Duration::from_secs(1)), 0);
    }

    #[test]
    fn log_record_wire_names() {
        let rec = TaskLogRecord {
            task_type: "image".into(),
            owner_id: 42,
            name: "job1".into(),
            task_id: 0,
            output: "ok".into(),
            error: String::new(),
            schedule_time: 1,
            real_schedule_time: 2,
            exec_time: 3,
            finish_time: 4,
        };
        let json = serde_json::to_value(&rec).unwrap();
        assert_eq!(json["user_id"], 42);
        assert_eq!(json["task_output"], "ok");
        assert_eq!(json["task_error"], "");
        assert_eq!(json["real_schedule_time"], 2);
        assert!(rec.is_success());
        assert_eq!(rec.key(), TaskKey::new("image", 42, "job1"));
    }

    #[test]
    fn warn_for_task() {
        let task = Task::new("video", 3, "clip").with_id(9);
        let at = UNIX_EPOCH + Duration::from_secs(2);
        let warn = WarnMessage::for_task(&task, "boom", at);
        assert_eq!(warn.key(), task.key());
        assert_eq!(warn.task_id, 9);
        assert_eq!(warn.generate_time, 2_000_000_000);

        let bad = WarnMessage::malformed("/drover/warn/x", at);
        assert!(bad.message.contains("/drover/warn/x"));
    }
}
