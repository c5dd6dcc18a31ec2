//! Metrics seam.
//!
//! The engine reports through [`MetricsBackend`]; the default is
//! [`NoopMetrics`]. A Prometheus implementation lives in `drover-prometheus`.

use std::{sync::Arc, time::Duration};

/// Terminal outcome of one execution, as seen by the scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Outcome {
    Success,
    Failure,
    Timeout,
    Cancelled,
    LockBusy,
}

impl Outcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Outcome::Success => "success",
            Outcome::Failure => "failure",
            Outcome::Timeout => "timeout",
            Outcome::Cancelled => "cancelled",
            Outcome::LockBusy => "lock_busy",
        }
    }
}

pub trait MetricsBackend: Send + Sync + 'static {
    /// A workload was spawned (the execution mutex was taken).
    fn task_started(&self, task_type: &str);

    fn task_completed(&self, task_type: &str, outcome: Outcome, duration: Duration);

    fn lock_conflict(&self, task_type: &str);

    /// A task event was dropped because the scheduler queue was full.
    fn event_dropped(&self, kind: &str);
}

pub type MetricsHandle = Arc<dyn MetricsBackend>;

#[derive(Debug, Default, Clone, Copy)]
pub struct NoopMetrics;

impl MetricsBackend for NoopMetrics {
    fn task_started(&self, _task_type: &str) {}
    fn task_completed(&self, _task_type: &str, _outcome: Outcome, _duration: Duration) {}
    fn lock_conflict(&self, _task_type: &str) {}
    fn event_dropped(&self, _kind: &str) {}
}

impl NoopMetrics {
    pub fn handle() -> MetricsHandle {
        Arc::new(NoopMetrics)
    }
}
