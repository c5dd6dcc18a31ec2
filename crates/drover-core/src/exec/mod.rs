//! Guarded execution of one task.
//!
//! [`Executor::execute`] takes the per-task execution mutex, runs the
//! [`Workload`] under the status' cancel scope, always releases the mutex
//! and reports back through a completion callback fired exactly once.

mod status;
pub use status::{CancelScope, ExecResult, ExecStatus};

mod workload;
pub use workload::{Workload, WorkloadOutcome};

use std::{
    sync::Arc,
    time::{Duration, SystemTime},
};

use drover_model::Layout;
use tracing::{debug, trace, warn};

use crate::{
    CoreError, ExecError, MetricsHandle, NoopMetrics,
    coord::{LeasedKey, StoreHandle},
};

#[derive(Clone)]
pub struct Executor {
    store: StoreHandle,
    workload: Arc<dyn Workload>,
    layout: Layout,
    identity: String,
    lock_ttl: Duration,
    metrics: MetricsHandle,
}

impl Executor {
    pub fn new(
        store: StoreHandle,
        workload: Arc<dyn Workload>,
        layout: Layout,
        identity: impl Into<String>,
        lock_ttl: Duration,
    ) -> Self {
        Self {
            store,
            workload,
            layout,
            identity: identity.into(),
            lock_ttl,
            metrics: NoopMetrics::handle(),
        }
    }

    pub fn with_metrics(mut self, metrics: MetricsHandle) -> Self {
        self.metrics = metrics;
        self
    }

    /// Run `status` in the background and hand the result to `on_complete`.
    pub fn execute<F>(&self, status: ExecStatus, on_complete: F)
    where
        F: FnOnce(ExecResult) + Send + 'static,
    {
        let this = self.clone();
        tokio::spawn(async move {
            let result = this.run(status).await;
            on_complete(result);
        });
    }

    /// Inline variant of [`execute`](Self::execute).
    pub async fn run(&self, mut status: ExecStatus) -> ExecResult {
        status.dispatched_at = Some(SystemTime::now());
        let key = status.task.key();

        let mut mutex = LeasedKey::new(
            self.store.clone(),
            self.layout.lock_key(&key),
            self.lock_ttl,
        );
        if let Err(e) = mutex.acquire(self.identity.as_bytes().to_vec()).await {
            let error = match e {
                CoreError::Conflict(_) => {
                    trace!(target: "drover.exec", task = %key, "execution lock busy");
                    self.metrics.lock_conflict(&status.task.task_type);
                    ExecError::LockBusy
                }
                other => {
                    warn!(target: "drover.exec", task = %key, error = %other, "execution lock failed");
                    ExecError::Store(other.to_string())
                }
            };
            status.finished_at = Some(SystemTime::now());
            return ExecResult {
                status,
                output: Vec::new(),
                error: Some(error),
            };
        }

        status.started_at = Some(SystemTime::now());
        self.metrics.task_started(&status.task.task_type);
        debug!(target: "drover.exec", task = %key, workload = self.workload.name(), "started");

        let workload = Arc::clone(&self.workload);
        let task = status.task.clone();
        let cancel = status.scope.token();
        let joined = tokio::spawn(async move { workload.run(&task, cancel).await }).await;
        let outcome = joined.unwrap_or_else(|e| {
            WorkloadOutcome::failed(Vec::new(), ExecError::Spawn(format!("workload aborted: {e}")))
        });

        mutex.release().await;
        status.finished_at = Some(SystemTime::now());

        let error = match outcome.result {
            Ok(()) => None,
            Err(_) if status.scope.deadline_exceeded() => Some(ExecError::Timeout),
            Err(_) if status.scope.is_cancelled() => Some(ExecError::Cancelled),
            Err(e) => Some(e),
        };
        debug!(target: "drover.exec", task = %key, error = ?error, "finished");

        ExecResult {
            status,
            output: outcome.output,
            error,
        }
    }
}
