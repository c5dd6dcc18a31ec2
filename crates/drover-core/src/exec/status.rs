use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::{Duration, SystemTime},
};

use drover_model::{Task, TaskLogRecord, unix_millis};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::{ExecError, Outcome};

/// Cancellation handle of one execution.
///
/// Either manually cancelable only, or additionally bound to a deadline;
/// a deadline firing is remembered so the executor can tell a time-out
/// from an explicit kill.
#[derive(Debug, Clone)]
pub struct CancelScope {
    token: CancellationToken,
    deadline: Option<Instant>,
    timed_out: Arc<AtomicBool>,
}

impl CancelScope {
    pub fn manual() -> Self {
        Self {
            token: CancellationToken::new(),
            deadline: None,
            timed_out: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Scope that cancels itself after `timeout`. Must be called inside a
    /// tokio runtime.
    pub fn with_timeout(timeout: Duration) -> Self {
        let scope = Self {
            deadline: Some(Instant::now() + timeout),
            ..Self::manual()
        };
        let token = scope.token.clone();
        let timed_out = Arc::clone(&scope.timed_out);
        tokio::spawn(async move {
            tokio::select! {
                _ = token.cancelled() => {}
                _ = tokio::time::sleep(timeout) => {
                    timed_out.store(true, Ordering::SeqCst);
                    token.cancel();
                }
            }
        });
        scope
    }

    /// Scope matching the task's time-out bound.
    pub fn for_task(task: &Task) -> Self {
        match task.timeout() {
            Some(timeout) => Self::with_timeout(timeout),
            None => Self::manual(),
        }
    }

    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    pub fn deadline_exceeded(&self) -> bool {
        self.timed_out.load(Ordering::SeqCst)
    }
}

/// Execution state handed from the scheduler to the executor.
#[derive(Debug, Clone)]
pub struct ExecStatus {
    pub task: Task,
    pub scope: CancelScope,
    /// When the scheduler accepted the Save.
    pub scheduled_at: SystemTime,
    /// When the executor picked the status up.
    pub dispatched_at: Option<SystemTime>,
    /// When the workload was spawned.
    pub started_at: Option<SystemTime>,
    pub finished_at: Option<SystemTime>,
}

impl ExecStatus {
    pub fn new(task: Task, scope: CancelScope) -> Self {
        Self {
            task,
            scope,
            scheduled_at: SystemTime::now(),
            dispatched_at: None,
            started_at: None,
            finished_at: None,
        }
    }
}

/// Terminal result of one `execute` call.
#[derive(Debug, Clone)]
pub struct ExecResult {
    pub status: ExecStatus,
    /// Combined stdout/stderr.
    pub output: Vec<u8>,
    pub error: Option<ExecError>,
}

impl ExecResult {
    pub fn outcome(&self) -> Outcome {
        match &self.error {
            None => Outcome::Success,
            Some(ExecError::LockBusy) => Outcome::LockBusy,
            Some(ExecError::Timeout) => Outcome::Timeout,
            Some(ExecError::Cancelled) => Outcome::Cancelled,
            Some(_) => Outcome::Failure,
        }
    }

    /// Wall time between spawn and finish; zero if never started.
    pub fn duration(&self) -> Duration {
        match (self.status.started_at, self.status.finished_at) {
            (Some(start), Some(end)) => end.duration_since(start).unwrap_or_default(),
            _ => Duration::ZERO,
        }
    }

    pub fn to_log_record(&self) -> TaskLogRecord {
        let st = &self.status;
        let ms = |t: Option<SystemTime>| t.map(unix_millis).unwrap_or(0);
        TaskLogRecord {
            task_type: st.task.task_type.clone(),
            owner_id: st.task.owner_id,
            name: st.task.name.clone(),
            task_id: st.task.id,
            output: String::from_utf8_lossy(&self.output).into_owned(),
            error: self
                .error
                .as_ref()
                .map(ToString::to_string)
                .unwrap_or_default(),
            schedule_time: unix_millis(st.scheduled_at),
            real_schedule_time: ms(st.dispatched_at),
            exec_time: ms(st.started_at),
            finish_time: ms(st.finished_at),
        }
    }
}
