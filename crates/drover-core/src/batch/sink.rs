use std::sync::{
    Arc, Mutex, MutexGuard, PoisonError,
    atomic::{AtomicBool, Ordering},
};

use async_trait::async_trait;
use drover_model::TaskLogRecord;
use drover_store::StoreError;

use crate::CoreError;

/// Durable destination of execution-log batches.
#[async_trait]
pub trait DocumentSink: Send + Sync + 'static {
    async fn insert_many(&self, records: Vec<TaskLogRecord>) -> Result<(), CoreError>;

    /// Records of every task called `name`, newest `exec_time` first.
    ///
    /// The first `skip` matches are passed over and at most `limit` are
    /// returned; a `limit` of 0 means no limit.
    async fn find_by_task(
        &self,
        name: &str,
        skip: usize,
        limit: usize,
    ) -> Result<Vec<TaskLogRecord>, CoreError>;
}

/// Sink that keeps every committed batch in memory.
#[derive(Clone, Default)]
pub struct MemorySink {
    batches: Arc<Mutex<Vec<Vec<TaskLogRecord>>>>,
    failing: Arc<AtomicBool>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make subsequent inserts fail.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn batches(&self) -> Vec<Vec<TaskLogRecord>> {
        self.lock().clone()
    }

    pub fn records(&self) -> Vec<TaskLogRecord> {
        self.lock().iter().flatten().cloned().collect()
    }

    fn lock(&self) -> MutexGuard<'_, Vec<Vec<TaskLogRecord>>> {
        self.batches.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn check(&self) -> Result<(), CoreError> {
        if self.failing.load(Ordering::SeqCst) {
            Err(CoreError::Transport(StoreError::Unavailable))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl DocumentSink for MemorySink {
    async fn insert_many(&self, records: Vec<TaskLogRecord>) -> Result<(), CoreError> {
        self.check()?;
        self.lock().push(records);
        Ok(())
    }

    async fn find_by_task(
        &self,
        name: &str,
        skip: usize,
        limit: usize,
    ) -> Result<Vec<TaskLogRecord>, CoreError> {
        self.check()?;
        let mut found: Vec<TaskLogRecord> = self
            .lock()
            .iter()
            .flatten()
            .filter(|r| r.name == name)
            .cloned()
            .collect();
        found.sort_by(|a, b| b.exec_time.cmp(&a.exec_time));
        let limit = if limit == 0 { usize::MAX } else { limit };
        Ok(found.into_iter().skip(skip).take(limit).collect())
    }
}
