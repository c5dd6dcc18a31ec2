//! Supervisor events as tracing records.

use async_trait::async_trait;
use taskvisor::{Event, EventKind, Subscribe};
use tracing::{debug, error, info, trace, warn};

/// Events a single journal may hold before the supervisor starts dropping.
const QUEUE_CAPACITY: usize = 1024;

/// Writes every supervisor event under the `drover.supervise` target.
#[derive(Debug, Default, Clone, Copy)]
pub struct Journal;

impl Journal {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Subscribe for Journal {
    async fn on_event(&self, event: &Event) {
        record(event);
    }

    fn name(&self) -> &'static str {
        "drover-journal"
    }

    fn queue_capacity(&self) -> usize {
        QUEUE_CAPACITY
    }
}

/// Short description of an event kind.
pub fn describe(kind: EventKind) -> &'static str {
    match kind {
        EventKind::TaskAddRequested => "loop add requested",
        EventKind::TaskAdded => "loop added",
        EventKind::TaskRemoveRequested => "loop removal requested",
        EventKind::TaskRemoved => "loop removed",
        EventKind::TaskStarting => "attempt starting",
        EventKind::TaskStopped => "attempt stopped",
        EventKind::TaskFailed => "attempt failed",
        EventKind::TimeoutHit => "attempt timed out",
        EventKind::BackoffScheduled => "restart scheduled",
        EventKind::ActorExhausted => "restarts exhausted",
        EventKind::ActorDead => "loop terminated permanently",
        EventKind::ShutdownRequested => "shutdown signal received",
        EventKind::AllStoppedWithinGrace => "all loops stopped within grace",
        EventKind::GraceExceeded => "loops still running after grace",
        EventKind::SubscriberOverflow => "supervisor event dropped",
        EventKind::SubscriberPanicked => "event subscriber panicked",
        EventKind::ControllerRejected => "submission rejected",
        EventKind::ControllerSubmitted => "submission accepted",
        EventKind::ControllerSlotTransition => "slot transition",
    }
}

fn record(event: &Event) {
    let task = event.task.as_deref().unwrap_or("-");
    let reason = event.reason.as_deref().unwrap_or("");
    let attempt = event.attempt.unwrap_or(0);
    let msg = describe(event.kind);

    match event.kind {
        EventKind::TaskAddRequested
        | EventKind::TaskRemoveRequested
        | EventKind::TaskRemoved
        | EventKind::TaskStopped
        | EventKind::ControllerSubmitted => {
            trace!(target: "drover.supervise", task, "{msg}")
        }
        EventKind::TaskAdded | EventKind::ControllerSlotTransition => {
            debug!(target: "drover.supervise", task, "{msg}")
        }
        // attempt failures are already reported by the loop itself
        EventKind::TaskStarting | EventKind::TaskFailed => {
            debug!(target: "drover.supervise", task, attempt, reason, "{msg}")
        }
        EventKind::BackoffScheduled => debug!(
            target: "drover.supervise",
            task,
            attempt,
            delay_ms = event.delay_ms.unwrap_or(0),
            "{msg}"
        ),
        EventKind::ShutdownRequested | EventKind::AllStoppedWithinGrace => {
            info!(target: "drover.supervise", "{msg}")
        }
        EventKind::TimeoutHit => warn!(
            target: "drover.supervise",
            task,
            timeout_ms = event.timeout_ms.unwrap_or(0),
            "{msg}"
        ),
        EventKind::GraceExceeded | EventKind::ActorExhausted | EventKind::ControllerRejected => {
            warn!(target: "drover.supervise", task, reason, "{msg}")
        }
        EventKind::ActorDead | EventKind::SubscriberOverflow | EventKind::SubscriberPanicked => {
            error!(target: "drover.supervise", task, reason, "{msg}")
        }
    }
}
