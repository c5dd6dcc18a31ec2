//! Restartable loops under one taskvisor supervisor.
//!
//! A loop is registered as a single *attempt*: a future that runs until its
//! stop token is cancelled (`Ok`) or until something breaks (`Err`). The
//! supervisor restarts failed attempts after a fixed back-off; an attempt
//! that ends because of shutdown is not restarted.

use std::{future::Future, sync::Arc, time::Duration};

use taskvisor::{
    BackoffPolicy, SupervisorConfig, JitterPolicy, RestartPolicy, Subscribe, Supervisor,
    TaskError, TaskFn, TaskRef, TaskSpec,
};
use tokio_util::{sync::CancellationToken, task::TaskTracker};
use tracing::{debug, warn};

use crate::CoreError;

/// Event subscribers attached to a node's supervisor.
pub type Subscribers = Vec<Arc<dyn Subscribe>>;

/// Loops of one node, run under a single supervisor until `shutdown`.
pub struct Supervision {
    shutdown: CancellationToken,
    active: TaskTracker,
    specs: Vec<TaskSpec>,
    names: Vec<&'static str>,
    subscribers: Subscribers,
}

impl Supervision {
    pub fn new(shutdown: CancellationToken) -> Self {
        Self {
            shutdown,
            active: TaskTracker::new(),
            specs: Vec::new(),
            names: Vec::new(),
            subscribers: Vec::new(),
        }
    }

    pub fn with_subscribers(mut self, subscribers: Subscribers) -> Self {
        self.subscribers = subscribers;
        self
    }

    /// Names of the registered loops, in registration order.
    pub fn names(&self) -> &[&'static str] {
        &self.names
    }

    /// Register a loop restarted `retry` after every failed attempt.
    ///
    /// The token handed to `attempt` is cancelled on shutdown; an error
    /// returned after that is not treated as a failure.
    pub fn add<F, Fut>(&mut self, name: &'static str, retry: Duration, attempt: F)
    where
        F: Fn(CancellationToken) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), CoreError>> + Send + 'static,
    {
        let attempt = Arc::new(attempt);
        let shutdown = self.shutdown.clone();
        let active = self.active.clone();

        let task: TaskRef = TaskFn::arc(name, move |ctx: CancellationToken| {
            let attempt = Arc::clone(&attempt);
            let shutdown = shutdown.clone();
            active.track_future(async move {
                if shutdown.is_cancelled() {
                    return Ok(());
                }
                if ctx.is_cancelled() {
                    return Err(TaskError::Canceled);
                }

                let stop = shutdown.child_token();
                let work = attempt(stop.clone());
                tokio::pin!(work);
                let result = tokio::select! {
                    r = &mut work => r,
                    _ = ctx.cancelled() => {
                        stop.cancel();
                        work.await
                    }
                };

                if ctx.is_cancelled() {
                    return Err(TaskError::Canceled);
                }
                match result {
                    Ok(()) => Ok(()),
                    Err(_) if shutdown.is_cancelled() => Ok(()),
                    Err(e) => {
                        match &e {
                            CoreError::Conflict(_) => {
                                debug!(target: "drover.supervise", task = name, error = %e, "attempt contended")
                            }
                            _ => warn!(target: "drover.supervise", task = name, error = %e, "attempt failed"),
                        }
                        Err(TaskError::Fail {
                            reason: e.to_string(),
                        })
                    }
                }
            })
        });

        self.specs.push(TaskSpec::new(
            task,
            RestartPolicy::OnFailure,
            fixed_backoff(retry),
            None,
        ));
        self.names.push(name);
    }

    /// Run every registered loop until `shutdown`, then give running
    /// attempts `grace` to wind down.
    pub async fn run(self, grace: Duration) {
        let Self {
            shutdown,
            active,
            specs,
            names,
            subscribers,
        } = self;

        let sup = Supervisor::builder(SupervisorConfig::default())
            .with_subscribers(subscribers)
            .build();
        let runner = Arc::clone(&sup);
        let mut supervisor = tokio::spawn(async move { runner.run(specs).await });
        debug!(target: "drover.supervise", tasks = ?names, "supervisor started");

        tokio::select! {
            _ = shutdown.cancelled() => {}
            joined = &mut supervisor => {
                match joined {
                    Ok(Ok(())) => debug!(target: "drover.supervise", "supervisor finished"),
                    Ok(Err(e)) => warn!(target: "drover.supervise", error = %e, "supervisor failed"),
                    Err(e) => warn!(target: "drover.supervise", error = %e, "supervisor aborted"),
                }
                active.close();
                active.wait().await;
                return;
            }
        }

        active.close();
        if tokio::time::timeout(grace, active.wait()).await.is_err() {
            warn!(target: "drover.supervise", grace_ms = grace.as_millis() as u64, "loops still running after grace");
        }
        supervisor.abort();
        match supervisor.await {
            Ok(Err(e)) => warn!(target: "drover.supervise", error = %e, "supervisor failed"),
            Err(e) if !e.is_cancelled() => warn!(target: "drover.supervise", error = %e, "supervisor aborted"),
            _ => {}
        }
        debug!(target: "drover.supervise", tasks = ?names, "supervisor stopped");
    }
}

fn fixed_backoff(retry: Duration) -> BackoffPolicy {
    BackoffPolicy {
        first: retry,
        max: retry,
        factor: 1.0,
        jitter: JitterPolicy::None,
        ..BackoffPolicy::default()
    }
}
