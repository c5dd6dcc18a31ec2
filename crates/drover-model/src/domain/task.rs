use std::{fmt, str::FromStr, time::Duration};

use serde::{Deserialize, Serialize};

use super::OwnerId;
use crate::ModelError;

/// Task types accepted by the control plane.
pub const TASK_TYPES: [&str; 2] = ["image", "video"];

/// Identity of a task: `(task-type, owner-id, task-name)`.
///
/// Renders as the relative store path `<type>/<owner>/<name>`, which is the
/// suffix used under every task-scoped directory of the [`Layout`](crate::Layout).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskKey {
    pub task_type: String,
    pub owner_id: OwnerId,
    pub name: String,
}

impl TaskKey {
    pub fn new(task_type: impl Into<String>, owner_id: OwnerId, name: impl Into<String>) -> Self {
        Self {
            task_type: task_type.into(),
            owner_id,
            name: name.into(),
        }
    }

    /// Relative store path of this identity.
    pub fn path(&self) -> String {
        format!("{}/{}/{}", self.task_type, self.owner_id, self.name)
    }

    /// Parse a relative store path (`<type>/<owner>/<name>`).
    ///
    /// Leading slashes are tolerated, since directory prefixes are sometimes
    /// configured without a trailing separator.
    pub fn parse(path: &str) -> Result<Self, ModelError> {
        let trimmed = path.trim_start_matches('/');
        let mut parts = trimmed.splitn(3, '/');
        let (Some(task_type), Some(owner), Some(name)) = (parts.next(), parts.next(), parts.next())
        else {
            return Err(ModelError::InvalidKey(path.to_string()));
        };
        if task_type.is_empty() || name.is_empty() {
            return Err(ModelError::InvalidKey(path.to_string()));
        }
        let owner_id = owner
            .parse::<OwnerId>()
            .map_err(|_| ModelError::InvalidKey(path.to_string()))?;
        Ok(Self::new(task_type, owner_id, name))
    }
}

impl fmt::Display for TaskKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.task_type, self.owner_id, self.name)
    }
}

impl FromStr for TaskKey {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

/// A task definition as persisted under the task directory.
///
/// Immutable once created; re-saving a definition replaces it wholesale.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    /// Task type (e.g. `"image"`, `"video"`).
    pub task_type: String,
    /// Owner that submitted the task.
    #[serde(rename = "user_id")]
    pub owner_id: OwnerId,
    /// Task name, unique per `(type, owner)`.
    #[serde(rename = "task_name")]
    pub name: String,
    /// Optional numeric id carried through to log records.
    #[serde(rename = "task_id", default)]
    pub id: i64,
    /// Execution time-out in seconds; `0` means unbounded.
    #[serde(rename = "task_time_out", default)]
    pub timeout_secs: u64,
}

impl Task {
    pub fn new(task_type: impl Into<String>, owner_id: OwnerId, name: impl Into<String>) -> Self {
        Self {
            task_type: task_type.into(),
            owner_id,
            name: name.into(),
            id: 0,
            timeout_secs: 0,
        }
    }

    pub fn with_timeout_secs(mut self, secs: u64) -> Self {
        self.timeout_secs = secs;
        self
    }

    pub fn with_id(mut self, id: i64) -> Self {
        self.id = id;
        self
    }

    pub fn key(&self) -> TaskKey {
        TaskKey::new(self.task_type.clone(), self.owner_id, self.name.clone())
    }

    /// Execution bound, if the task specifies a positive time-out.
    pub fn timeout(&self) -> Option<Duration> {
        (self.timeout_secs > 0).then(|| Duration::from_secs(self.timeout_secs))
    }

    /// Validate a definition before it is accepted by the control plane.
    pub fn validate(&self) -> Result<(), ModelError> {
        if !TASK_TYPES.contains(&self.task_type.as_str()) {
            return Err(ModelError::InvalidType(self.task_type.clone()));
        }
        let valid_name = (1..=16).contains(&self.name.len())
            && self
                .name
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_');
        if !valid_name {
            return Err(ModelError::InvalidName(self.name.clone()));
        }
        Ok(())
    }
}
