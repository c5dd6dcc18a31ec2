use crate::{Task, TaskKey};

/// A scheduling event derived from the coordination store.
///
/// Produced by the store watchers, consumed exactly once by the scheduler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskEvent {
    /// A definition was created or replaced.
    Save(Task),
    /// A definition was removed.
    Delete(TaskKey),
    /// An operator asked to kill the running execution.
    Kill(TaskKey),
}

impl TaskEvent {
    pub fn key(&self) -> TaskKey {
        match self {
            TaskEvent::Save(task) => task.key(),
            TaskEvent::Delete(key) | TaskEvent::Kill(key) => key.clone(),
        }
    }

    /// Short symbolic name for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            TaskEvent::Save(_) => "save",
            TaskEvent::Delete(_) => "delete",
            TaskEvent::Kill(_) => "kill",
        }
    }
}
