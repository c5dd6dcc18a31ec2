use drover_model::{Task, TaskEvent, TaskKey};
use tracing::debug;

use super::Classify;
use crate::CoreError;

fn parse_key(key: &str) -> Result<TaskKey, CoreError> {
    TaskKey::parse(key).map_err(|_| CoreError::InvalidKey(key.to_string()))
}

/// Task-definition directory: Put → Save, Delete → Delete.
#[derive(Debug, Default, Clone, Copy)]
pub struct TaskDefinitions;

impl Classify for TaskDefinitions {
    type Event = TaskEvent;

    fn name(&self) -> &'static str {
        "tasks"
    }

    fn on_put(&self, key: &str, value: &[u8]) -> Result<Option<TaskEvent>, CoreError> {
        let task: Task = serde_json::from_slice(value)?;
        let stored = parse_key(key)?;
        if task.key() != stored {
            debug!(target: "drover.sync", key, task = %task.key(), "definition stored under a different key");
        }
        Ok(Some(TaskEvent::Save(task)))
    }

    fn on_delete(&self, key: &str) -> Result<Option<TaskEvent>, CoreError> {
        Ok(Some(TaskEvent::Delete(parse_key(key)?)))
    }
}

/// Kill-signal directory: Put → Kill, Delete ignored.
///
/// Markers are leased; their deletion only means the lease ran out.
/// Markers present at start are stale and not replayed.
#[derive(Debug, Default, Clone, Copy)]
pub struct KillSignals;

impl Classify for KillSignals {
    type Event = TaskEvent;

    fn name(&self) -> &'static str {
        "killer"
    }

    fn on_put(&self, key: &str, _value: &[u8]) -> Result<Option<TaskEvent>, CoreError> {
        Ok(Some(TaskEvent::Kill(parse_key(key)?)))
    }

    fn on_delete(&self, _key: &str) -> Result<Option<TaskEvent>, CoreError> {
        Ok(None)
    }

    fn replay_snapshot(&self) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn definitions_parse_value() {
        let value = br#"{"task_type":"image","user_id":42,"task_name":"job1"}"#;
        let ev = TaskDefinitions.on_put("image/42/job1", value).unwrap();
        assert_eq!(ev, Some(TaskEvent::Save(Task::new("image", 42, "job1"))));

        assert!(matches!(
            TaskDefinitions.on_put("image/42/job1", b"[]"),
            Err(CoreError::Serialization(_))
        ));
        assert!(matches!(
            TaskDefinitions.on_delete("image/x/job1"),
            Err(CoreError::InvalidKey(_))
        ));
    }

    #[test]
    fn kill_signals_map_puts_only() {
        assert_eq!(
            KillSignals.on_put("video/1/a", b"").unwrap(),
            Some(TaskEvent::Kill(TaskKey::new("video", 1, "a")))
        );
        assert_eq!(KillSignals.on_delete("video/1/a").unwrap(), None);
        assert!(!KillSignals.replay_snapshot());
    }
}
