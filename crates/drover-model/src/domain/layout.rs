use crate::{ModelError, TaskKey};

/// Directory layout of the coordination store.
///
/// Every directory prefix ends with `/`; task-scoped keys are
/// `<prefix><type>/<owner>/<name>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Layout {
    pub tasks: String,
    pub killer: String,
    pub lock: String,
    pub warn: String,
    pub finish: String,
    pub fail: String,
    pub workers: String,
    /// Single leader-election key (not a directory).
    pub leader: String,
}

impl Default for Layout {
    fn default() -> Self {
        Self::with_root("/drover/")
    }
}

impl Layout {
    /// Build the default layout below `root`.
    pub fn with_root(root: &str) -> Self {
        let root = if root.ends_with('/') {
            root.to_string()
        } else {
            format!("{root}/")
        };
        Self {
            tasks: format!("{root}tasks/"),
            killer: format!("{root}killer/"),
            lock: format!("{root}lock/"),
            warn: format!("{root}warn/"),
            finish: format!("{root}finish/"),
            fail: format!("{root}fail/"),
            workers: format!("{root}workers/"),
            leader: format!("{root}leader"),
        }
    }

    pub fn task_key(&self, key: &TaskKey) -> String {
        format!("{}{}", self.tasks, key.path())
    }

    pub fn kill_key(&self, key: &TaskKey) -> String {
        format!("{}{}", self.killer, key.path())
    }

    pub fn lock_key(&self, key: &TaskKey) -> String {
        format!("{}{}", self.lock, key.path())
    }

    pub fn warn_key(&self, key: &TaskKey) -> String {
        format!("{}{}", self.warn, key.path())
    }

    pub fn finish_key(&self, key: &TaskKey) -> String {
        format!("{}{}", self.finish, key.path())
    }

    pub fn fail_key(&self, key: &TaskKey) -> String {
        format!("{}{}", self.fail, key.path())
    }

    pub fn worker_key(&self, identity: &str) -> String {
        format!("{}{}", self.workers, identity)
    }
}

/// Strip `prefix` from a full store key and parse the remainder as a task identity.
pub fn strip_task_key(prefix: &str, full: &str) -> Result<TaskKey, ModelError> {
    let rest = full
        .strip_prefix(prefix)
        .ok_or_else(|| ModelError::InvalidKey(full.to_string()))?;
    TaskKey::parse(rest)
}
