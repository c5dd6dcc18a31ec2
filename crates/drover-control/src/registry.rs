use std::{sync::Arc, time::Duration};

use drover_core::{CoreError, DocumentSink, StoreHandle};
use drover_model::{Layout, Task, TaskKey, TaskLogRecord, strip_task_key};
use drover_store::{Revision, StoreError, WatchKind, WatchStream};
use tracing::{debug, info, warn};

use crate::ControlError;

/// How a task's run ended, as reported by the worker that ran it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskOutcome {
    Succeeded,
    Failed,
}

/// Task definitions, kill markers, completion notifications and the
/// execution log.
#[derive(Clone)]
pub struct TaskRegistry {
    store: StoreHandle,
    layout: Layout,
    kill_ttl: Duration,
    logs: Arc<dyn DocumentSink>,
}

impl TaskRegistry {
    pub fn new(
        store: StoreHandle,
        layout: Layout,
        kill_ttl: Duration,
        logs: Arc<dyn DocumentSink>,
    ) -> Self {
        Self {
            store,
            layout,
            kill_ttl,
            logs,
        }
    }

    /// Validate and store a definition; returns the revision of the write.
    pub async fn save(&self, task: &Task) -> Result<Revision, ControlError> {
        task.validate()?;
        let value = serde_json::to_vec(task)?;
        let revision = self
            .store
            .put(&self.layout.task_key(&task.key()), value, None)
            .await?;
        info!(target: "drover.control", task = %task.key(), revision, "task saved");
        Ok(revision)
    }

    /// Delete a definition, returning it if it existed and was readable.
    pub async fn remove(&self, key: &TaskKey) -> Result<Option<Task>, ControlError> {
        let Some(prev) = self.store.delete(&self.layout.task_key(key)).await? else {
            return Ok(None);
        };
        match serde_json::from_slice(&prev.value) {
            Ok(task) => Ok(Some(task)),
            Err(e) => {
                warn!(target: "drover.control", key = %prev.key, error = %e, "removed definition was unreadable");
                Ok(None)
            }
        }
    }

    /// Every readable definition; unreadable ones are skipped.
    pub async fn list(&self) -> Result<Vec<Task>, ControlError> {
        let snap = self.store.get_prefix(&self.layout.tasks).await?;
        Ok(snap
            .kvs
            .iter()
            .filter_map(|kv| match serde_json::from_slice(&kv.value) {
                Ok(task) => Some(task),
                Err(e) => {
                    warn!(target: "drover.control", key = %kv.key, error = %e, "skipping unreadable definition");
                    None
                }
            })
            .collect())
    }

    /// Post a short-lived kill marker. Workers that are not running the
    /// task ignore it.
    pub async fn kill(&self, key: &TaskKey) -> Result<(), ControlError> {
        let lease = self.store.grant(self.kill_ttl).await?;
        self.store
            .put(&self.layout.kill_key(key), Vec::new(), Some(lease))
            .await?;
        info!(target: "drover.control", task = %key, "kill requested");
        Ok(())
    }

    /// Execution records of tasks called `name`, newest first.
    ///
    /// `skip` records are passed over, then at most `limit` are returned
    /// (0 returns everything that remains).
    pub async fn query_log(
        &self,
        name: &str,
        skip: usize,
        limit: usize,
    ) -> Result<Vec<TaskLogRecord>, ControlError> {
        let records = self.logs.find_by_task(name, skip, limit).await?;
        debug!(target: "drover.control", task = name, skip, limit, found = records.len(), "log query");
        Ok(records)
    }

    /// Wait for the next finish or fail notification of `key`.
    ///
    /// Notifications already present are not considered.
    pub async fn await_outcome(
        &self,
        key: &TaskKey,
        timeout: Duration,
    ) -> Result<TaskOutcome, ControlError> {
        let finish_key = self.layout.finish_key(key);
        let revision = self.store.get_prefix(&finish_key).await?.revision;
        self.await_outcome_after(key, revision, timeout).await
    }

    /// Save `task`, then wait for the outcome of that submission.
    pub async fn submit(&self, task: &Task, timeout: Duration) -> Result<TaskOutcome, ControlError> {
        let revision = self.save(task).await?;
        self.await_outcome_after(&task.key(), revision, timeout).await
    }

    async fn await_outcome_after(
        &self,
        key: &TaskKey,
        revision: Revision,
        timeout: Duration,
    ) -> Result<TaskOutcome, ControlError> {
        let mut finish = self
            .store
            .watch_prefix(&self.layout.finish_key(key), revision + 1)
            .await?;
        let mut fail = self
            .store
            .watch_prefix(&self.layout.fail_key(key), revision + 1)
            .await?;

        let wait = async {
            tokio::select! {
                r = next_put(&mut finish, &self.layout.finish, key) => r.map(|()| TaskOutcome::Succeeded),
                r = next_put(&mut fail, &self.layout.fail, key) => r.map(|()| TaskOutcome::Failed),
            }
        };
        match tokio::time::timeout(timeout, wait).await {
            Ok(outcome) => {
                let outcome = outcome?;
                debug!(target: "drover.control", task = %key, ?outcome, "outcome observed");
                Ok(outcome)
            }
            Err(_) => Err(CoreError::Timeout.into()),
        }
    }
}

/// Next Put of exactly `key` under directory `dir`; the watch also sees
/// longer keys sharing its prefix.
async fn next_put(watch: &mut WatchStream, dir: &str, key: &TaskKey) -> Result<(), ControlError> {
    while let Some(ev) = watch.next().await {
        if ev.kind == WatchKind::Put
            && strip_task_key(dir, &ev.kv.key).is_ok_and(|seen| seen == *key)
        {
            return Ok(());
        }
    }
    Err(StoreError::Closed.into())
}
