//! Execution-log batching.
//!
//! [`LogBatcher`] owns the current batch and is the only place that
//! commits or rotates it. A batch commits when it reaches the configured
//! size or when its deadline timer fires first. The timer never touches
//! the batch: it posts the id of the batch it was armed for, and the loop
//! commits only if that batch is still current. Commits run on their own
//! task and are not retried.

mod sink;
pub use sink::{DocumentSink, MemorySink};

use std::sync::Arc;

use drover_model::TaskLogRecord;
use tokio::{sync::mpsc, task::JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use crate::BatchConfig;

struct Batch {
    id: u64,
    records: Vec<TaskLogRecord>,
    timer: JoinHandle<()>,
}

/// Producer side of a [`LogBatcher`].
#[derive(Clone)]
pub struct LogBatcherHandle {
    tx: mpsc::Sender<TaskLogRecord>,
}

impl LogBatcherHandle {
    /// Queue a record; waits while the queue is full.
    pub async fn submit(&self, record: TaskLogRecord) {
        if self.tx.send(record).await.is_err() {
            debug!(target: "drover.batch", "log batcher stopped; record dropped");
        }
    }
}

pub struct LogBatcher {
    cfg: BatchConfig,
    sink: Arc<dyn DocumentSink>,
    records: mpsc::Receiver<TaskLogRecord>,
    deadlines: mpsc::UnboundedReceiver<u64>,
    deadline_tx: mpsc::UnboundedSender<u64>,
    current: Option<Batch>,
    next_id: u64,
}

impl LogBatcher {
    pub fn new(cfg: BatchConfig, sink: Arc<dyn DocumentSink>) -> (Self, LogBatcherHandle) {
        let (tx, records) = mpsc::channel(cfg.capacity.max(1));
        let (deadline_tx, deadlines) = mpsc::unbounded_channel();
        let batcher = Self {
            cfg,
            sink,
            records,
            deadlines,
            deadline_tx,
            current: None,
            next_id: 0,
        };
        (batcher, LogBatcherHandle { tx })
    }

    pub async fn run(mut self, shutdown: CancellationToken) {
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                Some(record) = self.records.recv() => {
                    self.on_record(record);
                }
                Some(id) = self.deadlines.recv() => {
                    self.on_deadline(id);
                }
                else => break,
            }
        }
        if let Some(batch) = self.current.take() {
            debug!(target: "drover.batch", batch = batch.id, records = batch.records.len(), "flushing on shutdown");
            self.commit(batch);
        }
    }

    /// Id of the batch currently being filled.
    pub fn current_batch(&self) -> Option<u64> {
        self.current.as_ref().map(|b| b.id)
    }

    /// Append a record; returns the id of the batch if this record filled it.
    pub fn on_record(&mut self, record: TaskLogRecord) -> Option<u64> {
        if self.current.is_none() {
            self.current = Some(self.open_batch());
        }
        let batch = self.current.as_mut()?;
        trace!(target: "drover.batch", batch = batch.id, task = %record.key(), "record queued");
        batch.records.push(record);

        if batch.records.len() < self.cfg.size() {
            return None;
        }
        let batch = self.current.take()?;
        let id = batch.id;
        trace!(target: "drover.batch", batch = id, "size reached");
        self.commit(batch);
        Some(id)
    }

    /// Deadline for batch `id`; commits only if it is still the current one.
    pub fn on_deadline(&mut self, id: u64) -> bool {
        match self.current.take() {
            Some(batch) if batch.id == id => {
                trace!(target: "drover.batch", batch = id, "deadline reached");
                self.commit(batch);
                true
            }
            other => {
                trace!(target: "drover.batch", batch = id, "stale deadline ignored");
                self.current = other;
                false
            }
        }
    }

    fn open_batch(&mut self) -> Batch {
        self.next_id += 1;
        let id = self.next_id;
        let tx = self.deadline_tx.clone();
        let interval = self.cfg.commit_interval;
        let timer = tokio::spawn(async move {
            tokio::time::sleep(interval).await;
            let _ = tx.send(id);
        });
        Batch {
            id,
            records: Vec::with_capacity(self.cfg.size()),
            timer,
        }
    }

    fn commit(&self, batch: Batch) {
        batch.timer.abort();
        let sink = Arc::clone(&self.sink);
        let (id, records) = (batch.id, batch.records);
        tokio::spawn(async move {
            let count = records.len();
            let failed = records.iter().filter(|r| !r.is_success()).count();
            match sink.insert_many(records).await {
                Ok(()) => debug!(target: "drover.batch", batch = id, count, failed, "committed"),
                Err(e) => warn!(target: "drover.batch", batch = id, count, failed, error = %e, "commit failed; batch lost"),
            }
        });
    }
}
