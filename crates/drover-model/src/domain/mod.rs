mod task;
pub use task::{Task, TaskKey, TASK_TYPES};

mod event;
pub use event::TaskEvent;

mod record;
pub use record::{TaskLogRecord, WarnMessage, unix_millis, unix_nanos};

mod layout;
pub use layout::{Layout, strip_task_key};

/// Owner (user) identifier as stored in task definitions.
pub type OwnerId = u64;
