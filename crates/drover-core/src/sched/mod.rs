//! The worker's scheduling loop.
//!
//! [`Scheduler`] is the sole owner of the execution table. It consumes
//! task events and execution results one at a time, so every scheduling
//! decision is totally ordered with every completion and the table needs
//! no lock. Per task identity: `absent → tracked` on Save, `tracked →
//! absent` only when the result is processed.

use std::{collections::HashMap, sync::Arc, time::SystemTime};

use drover_model::{Layout, TaskEvent, TaskKey, WarnMessage};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::{
    AlertTransport, CancelScope, CoreError, ExecError, ExecResult, ExecStatus, Executor,
    LogBatcherHandle, MetricsHandle, Notifier, WorkerConfig,
};

/// Producer side of the scheduler's bounded event queue.
#[derive(Clone)]
pub struct SchedulerHandle {
    tx: mpsc::Sender<TaskEvent>,
    metrics: MetricsHandle,
}

impl SchedulerHandle {
    /// Enqueue without waiting; a full queue drops the event.
    ///
    /// Lost Saves come back with the next full resync; lost Kills do not.
    pub fn push_event(&self, event: TaskEvent) -> bool {
        match self.tx.try_send(event) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(event)) => {
                warn!(target: "drover.sched", task = %event.key(), kind = event.kind(), "event queue full; event dropped");
                self.metrics.event_dropped(event.kind());
                false
            }
            Err(mpsc::error::TrySendError::Closed(event)) => {
                debug!(target: "drover.sched", task = %event.key(), "scheduler stopped; event dropped");
                false
            }
        }
    }
}

pub struct Scheduler {
    events: mpsc::Receiver<TaskEvent>,
    results: mpsc::UnboundedReceiver<ExecResult>,
    results_tx: mpsc::UnboundedSender<ExecResult>,
    table: HashMap<TaskKey, CancelScope>,
    executor: Executor,
    logs: LogBatcherHandle,
    notifier: Notifier,
    alerts: Arc<dyn AlertTransport>,
    layout: Layout,
    warn_topic: String,
    metrics: MetricsHandle,
}

impl Scheduler {
    pub fn new(
        cfg: &WorkerConfig,
        executor: Executor,
        logs: LogBatcherHandle,
        notifier: Notifier,
        alerts: Arc<dyn AlertTransport>,
        metrics: MetricsHandle,
    ) -> (Self, SchedulerHandle) {
        let (tx, events) = mpsc::channel(cfg.event_capacity.max(1));
        let (results_tx, results) = mpsc::unbounded_channel();
        let sched = Self {
            events,
            results,
            results_tx,
            table: HashMap::new(),
            executor,
            logs,
            notifier,
            alerts,
            layout: cfg.layout.clone(),
            warn_topic: cfg.warn_topic.clone(),
            metrics: metrics.clone(),
        };
        (sched, SchedulerHandle { tx, metrics })
    }

    pub fn is_tracked(&self, key: &TaskKey) -> bool {
        self.table.contains_key(key)
    }

    pub fn tracked_len(&self) -> usize {
        self.table.len()
    }

    pub async fn run(mut self, shutdown: CancellationToken) {
        info!(target: "drover.sched", "scheduler started");
        loop {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                Some(result) = self.results.recv() => {
                    if let Err(e) = self.handle_result(result).await {
                        warn!(target: "drover.sched", error = %e, "result handling");
                    }
                }
                Some(event) = self.events.recv() => {
                    if let Err(e) = self.handle_event(event) {
                        debug!(target: "drover.sched", error = %e, "event rejected");
                    }
                }
            }
        }
        for (key, scope) in self.table.drain() {
            debug!(target: "drover.sched", task = %key, "cancelling on shutdown");
            scope.cancel();
        }
        info!(target: "drover.sched", "scheduler stopped");
    }

    /// Apply one task event to the table.
    pub fn handle_event(&mut self, event: TaskEvent) -> Result<(), CoreError> {
        match event {
            TaskEvent::Save(task) => {
                let key = task.key();
                if self.table.contains_key(&key) {
                    debug!(target: "drover.sched", task = %key, "already running; save ignored");
                    return Ok(());
                }
                let scope = CancelScope::for_task(&task);
                self.table.insert(key.clone(), scope.clone());
                trace!(target: "drover.sched", task = %key, timeout = ?task.timeout(), "dispatching");

                let tx = self.results_tx.clone();
                self.executor
                    .execute(ExecStatus::new(task, scope), move |result| {
                        let _ = tx.send(result);
                    });
                Ok(())
            }
            TaskEvent::Delete(key) => {
                // A running execution is left alone.
                debug!(target: "drover.sched", task = %key, running = self.table.contains_key(&key), "definition deleted");
                Ok(())
            }
            TaskEvent::Kill(key) => match self.table.get(&key) {
                Some(scope) => {
                    info!(target: "drover.sched", task = %key, "killing");
                    scope.cancel();
                    Ok(())
                }
                None => Err(CoreError::NotFound(format!("{key} is not running"))),
            },
        }
    }

    /// Untrack the execution and drive its side effects.
    ///
    /// A result for an untracked identity has no side effects and is
    /// reported as [`CoreError::NotFound`].
    pub async fn handle_result(&mut self, result: ExecResult) -> Result<(), CoreError> {
        let task = &result.status.task;
        let key = task.key();
        let Some(scope) = self.table.remove(&key) else {
            return Err(CoreError::NotFound(format!("no execution tracked for {key}")));
        };
        // releases a pending deadline timer
        scope.cancel();

        let outcome = result.outcome();
        self.metrics
            .task_completed(&task.task_type, outcome, result.duration());
        let record = result.to_log_record();

        match &result.error {
            Some(ExecError::LockBusy) => {
                trace!(target: "drover.sched", task = %key, "lock held by another worker");
            }
            Some(error) => {
                warn!(target: "drover.sched", task = %key, error = %error, "task failed");
                self.logs.submit(record).await;
                if let Err(e) = self.notifier.failed(task).await {
                    warn!(target: "drover.sched", task = %key, error = %e, "fail notification");
                }
                self.alert(&result, error);
            }
            None => {
                debug!(target: "drover.sched", task = %key, "task finished");
                self.logs.submit(record).await;
                if let Err(e) = self.notifier.finished(task).await {
                    warn!(target: "drover.sched", task = %key, error = %e, "finish notification");
                }
            }
        }
        Ok(())
    }

    fn alert(&self, result: &ExecResult, error: &ExecError) {
        let task = &result.status.task;
        let at = result.status.finished_at.unwrap_or_else(SystemTime::now);
        let message = WarnMessage::for_task(task, error.to_string(), at);
        let value = match serde_json::to_vec(&message) {
            Ok(value) => value,
            Err(e) => {
                warn!(target: "drover.sched", task = %task.key(), error = %e, "encode warning");
                return;
            }
        };
        let key = self.layout.warn_key(&task.key()).into_bytes();
        if let Err(e) = self.alerts.publish(&self.warn_topic, key, value) {
            warn!(target: "drover.sched", task = %task.key(), error = %e, "alert publish");
        }
    }
}
