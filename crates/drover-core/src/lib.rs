//! Coordination and scheduling engine of a drover worker.
//!
//! Dependency order, leaves first:
//! [`LeasedKey`] → {[`WatchSync`], [`LeaderElector`], [`Heartbeat`]} →
//! [`Executor`] → [`Scheduler`] → [`LogBatcher`].
//!
//! Every long-running loop is an explicit object constructed once. Loops
//! that must survive store or transport failures expose a single attempt
//! and are restarted by a [`Supervision`]; the scheduler and batcher are
//! driven by `run(shutdown)`. State owned by a loop is never touched from
//! outside it. [`WorkerNode`] wires the whole worker side together.

pub mod error;
pub use error::{CoreError, ExecError};

pub mod config;
pub use config::{BatchConfig, WorkerConfig, default_identity};

pub mod metrics;
pub use metrics::{MetricsBackend, MetricsHandle, NoopMetrics, Outcome};

pub mod supervise;
pub use supervise::{Subscribers, Supervision};

pub mod coord;
pub use coord::{Heartbeat, LeaderElector, LeasedKey, StoreHandle};

pub mod sync;
pub use sync::{Classify, KillSignals, TaskDefinitions, WatchSync};

pub mod exec;
pub use exec::{CancelScope, ExecResult, ExecStatus, Executor, Workload, WorkloadOutcome};

pub mod sched;
pub use sched::{Scheduler, SchedulerHandle};

pub mod batch;
pub use batch::{DocumentSink, LogBatcher, LogBatcherHandle, MemorySink};

pub mod notify;
pub use notify::Notifier;

pub mod alert;
pub use alert::{AlertRelay, AlertTransport, MemoryTransport, Subscription};

mod worker;
pub use worker::WorkerNode;
