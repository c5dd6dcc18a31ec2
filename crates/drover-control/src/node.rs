use std::sync::Arc;

use drover_core::{DocumentSink, LeaderElector, StoreHandle, Subscribers, Supervision};
use drover_model::WarnMessage;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::{AlertForwarder, ControlError, MasterConfig, TaskRegistry, WorkerDirectory};

/// A master process: request-side handles plus the leader-gated forwarder.
///
/// Any number of masters may run; they share nothing but the store and the
/// execution log.
pub struct MasterNode {
    cfg: MasterConfig,
    store: StoreHandle,
    logs: Arc<dyn DocumentSink>,
    elector: Arc<LeaderElector>,
    forwarder: Arc<AlertForwarder>,
    subscribers: Subscribers,
}

impl MasterNode {
    pub fn new(cfg: MasterConfig, store: StoreHandle, logs: Arc<dyn DocumentSink>) -> Self {
        Self::build(cfg, store, logs, None)
    }

    /// Like [`MasterNode::new`], also delivering forwarded warnings to `outbox`.
    pub fn with_outbox(
        cfg: MasterConfig,
        store: StoreHandle,
        logs: Arc<dyn DocumentSink>,
        outbox: mpsc::UnboundedSender<WarnMessage>,
    ) -> Self {
        Self::build(cfg, store, logs, Some(outbox))
    }

    fn build(
        cfg: MasterConfig,
        store: StoreHandle,
        logs: Arc<dyn DocumentSink>,
        outbox: Option<mpsc::UnboundedSender<WarnMessage>>,
    ) -> Self {
        let elector = LeaderElector::new(
            store.clone(),
            cfg.layout.leader.clone(),
            cfg.identity.clone(),
            cfg.leader_ttl,
        );
        let mut forwarder = AlertForwarder::new(store.clone(), cfg.layout.warn.clone());
        if let Some(outbox) = outbox {
            forwarder = forwarder.with_outbox(outbox);
        }
        Self {
            cfg,
            store,
            logs,
            elector: Arc::new(elector),
            forwarder: Arc::new(forwarder),
            subscribers: Vec::new(),
        }
    }

    /// Attach observers of the node's supervisor events.
    pub fn with_subscribers(mut self, subscribers: Subscribers) -> Self {
        self.subscribers = subscribers;
        self
    }

    pub fn registry(&self) -> TaskRegistry {
        TaskRegistry::new(
            self.store.clone(),
            self.cfg.layout.clone(),
            self.cfg.kill_ttl,
            self.logs.clone(),
        )
    }

    pub fn workers(&self) -> WorkerDirectory {
        WorkerDirectory::new(self.store.clone(), self.cfg.layout.workers.clone())
    }

    pub fn is_leader(&self) -> bool {
        self.elector.is_leader()
    }

    pub fn leadership(&self) -> watch::Receiver<bool> {
        self.elector.subscribe()
    }

    /// Campaign until `shutdown`, forwarding warnings while leading.
    ///
    /// The campaign runs supervised and is retried `leader_backoff` after
    /// every conflict or lost term. Fails only when the store is
    /// unreachable at startup.
    pub async fn run(&self, shutdown: CancellationToken) -> Result<(), ControlError> {
        self.store.get_prefix(&self.cfg.layout.tasks).await?;
        info!(target: "drover.control", identity = %self.cfg.identity, "master started");

        let mut loops =
            Supervision::new(shutdown.clone()).with_subscribers(self.subscribers.clone());
        let (elector, forwarder) = (self.elector.clone(), self.forwarder.clone());
        loops.add("drover-elect", self.cfg.leader_backoff, move |stop| {
            let (elector, forwarder) = (elector.clone(), forwarder.clone());
            async move {
                let duty = move |term| forwarder.clone().forward(term);
                elector.campaign(&duty, stop).await
            }
        });
        loops.run(self.cfg.shutdown_grace).await;

        info!(target: "drover.control", identity = %self.cfg.identity, "master stopped");
        Ok(())
    }
}
