use std::sync::Arc;

use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::{
    AlertRelay, AlertTransport, CoreError, DocumentSink, Executor, Heartbeat, KillSignals,
    LogBatcher, MetricsHandle, NoopMetrics, Notifier, Scheduler, Subscribers, Supervision,
    TaskDefinitions, WatchSync, WorkerConfig, Workload, coord::StoreHandle,
};

/// Everything a worker process runs, built once and stopped through one token.
pub struct WorkerNode {
    cfg: WorkerConfig,
    store: StoreHandle,
    workload: Arc<dyn Workload>,
    sink: Arc<dyn DocumentSink>,
    transport: Arc<dyn AlertTransport>,
    metrics: MetricsHandle,
    subscribers: Subscribers,
}

impl WorkerNode {
    pub fn new(
        cfg: WorkerConfig,
        store: StoreHandle,
        workload: Arc<dyn Workload>,
        sink: Arc<dyn DocumentSink>,
        transport: Arc<dyn AlertTransport>,
    ) -> Self {
        Self {
            cfg,
            store,
            workload,
            sink,
            transport,
            metrics: NoopMetrics::handle(),
            subscribers: Vec::new(),
        }
    }

    pub fn with_metrics(mut self, metrics: MetricsHandle) -> Self {
        self.metrics = metrics;
        self
    }

    /// Attach observers of the node's supervisor events.
    pub fn with_subscribers(mut self, subscribers: Subscribers) -> Self {
        self.subscribers = subscribers;
        self
    }

    /// Start every loop and wait for `shutdown`.
    ///
    /// Watches, membership and the alert relay run under one supervisor
    /// that restarts them with the back-offs from [`WorkerConfig`].
    ///
    /// Fails only when the store is unreachable at startup.
    pub async fn run(self, shutdown: CancellationToken) -> Result<(), CoreError> {
        let cfg = self.cfg;
        let layout = cfg.layout.clone();
        self.store.get_prefix(&layout.workers).await?;

        let (batcher, logs) = LogBatcher::new(cfg.batch.clone(), self.sink);
        let executor = Executor::new(
            self.store.clone(),
            self.workload,
            layout.clone(),
            cfg.identity.clone(),
            cfg.lock_ttl,
        )
        .with_metrics(self.metrics.clone());
        let (scheduler, handle) = Scheduler::new(
            &cfg,
            executor,
            logs,
            Notifier::new(self.store.clone(), layout.clone()),
            self.transport.clone(),
            self.metrics,
        );

        let tasks = Arc::new(WatchSync::new(
            self.store.clone(),
            layout.tasks.clone(),
            TaskDefinitions,
        ));
        let kills = Arc::new(WatchSync::new(
            self.store.clone(),
            layout.killer.clone(),
            KillSignals,
        ));
        let heartbeat = Arc::new(Heartbeat::new(
            self.store.clone(),
            layout.worker_key(&cfg.identity),
            cfg.identity.clone(),
            cfg.heartbeat_ttl,
        ));
        let relay = Arc::new(AlertRelay::new(
            self.store.clone(),
            self.transport,
            cfg.warn_topic.clone(),
            cfg.alert_ttl,
        ));

        let mut loops = Supervision::new(shutdown.clone()).with_subscribers(self.subscribers);
        {
            let handle = handle.clone();
            loops.add("drover-sync-tasks", cfg.watch_retry, move |stop| {
                let (tasks, handle) = (tasks.clone(), handle.clone());
                async move {
                    tasks
                        .sync(
                            move |ev| {
                                handle.push_event(ev);
                            },
                            stop,
                        )
                        .await
                }
            });
        }
        loops.add("drover-sync-kills", cfg.watch_retry, move |stop| {
            let (kills, handle) = (kills.clone(), handle.clone());
            async move {
                kills
                    .sync(
                        move |ev| {
                            handle.push_event(ev);
                        },
                        stop,
                    )
                    .await
            }
        });
        loops.add("drover-heartbeat", cfg.heartbeat_retry, move |stop| {
            let heartbeat = heartbeat.clone();
            async move { heartbeat.register(stop).await }
        });
        loops.add("drover-relay", cfg.relay_retry, move |stop| {
            let relay = relay.clone();
            async move { relay.relay(stop).await }
        });

        let mut set = JoinSet::new();
        set.spawn(batcher.run(shutdown.clone()));
        set.spawn(scheduler.run(shutdown.clone()));
        set.spawn(loops.run(cfg.shutdown_grace));
        info!(target: "drover.worker", identity = %cfg.identity, "worker started");

        while let Some(joined) = set.join_next().await {
            if let Err(e) = joined {
                warn!(target: "drover.worker", error = %e, "worker loop aborted");
            }
        }
        info!(target: "drover.worker", identity = %cfg.identity, "worker stopped");
        Ok(())
    }
}
