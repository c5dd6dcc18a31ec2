use std::sync::Arc;

use anyhow::Context;
use drover_control::{MasterConfig, MasterNode};
use drover_core::{
    DocumentSink, MemorySink, MemoryTransport, MetricsHandle, StoreHandle, Subscribers,
    WorkerConfig, WorkerNode,
};
use drover_exec::{ProcConfig, ProcWorkload};
use drover_observe::{Journal, LoggerConfig, logger_init};
use drover_prometheus::PrometheusMetrics;
use drover_store::MemoryStore;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Program used for task workloads; the task name is passed as its last argument.
const PROGRAM_ENV: &str = "DROVER_PROGRAM";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 1) Logger
    let log_cfg = LoggerConfig::from_env().context("logger config")?;
    logger_init(&log_cfg).context("logger init")?;
    info!(format = %log_cfg.format, level = %log_cfg.level, "logger initialized");

    // 2) Shared infrastructure
    let store: StoreHandle = Arc::new(MemoryStore::new());
    let metrics = PrometheusMetrics::new().context("metrics registry")?;
    let metrics_handle: MetricsHandle = Arc::new(metrics.clone());
    let logs: Arc<dyn DocumentSink> = Arc::new(MemorySink::new());
    let journal = || -> Subscribers { vec![Arc::new(Journal::new())] };

    // 3) Worker
    let mut proc_cfg = ProcConfig::default();
    if let Ok(program) = std::env::var(PROGRAM_ENV) {
        proc_cfg.program = program;
    }
    info!(program = %proc_cfg.program, args = ?proc_cfg.args, "workload configured");
    let worker = WorkerNode::new(
        WorkerConfig::default(),
        store.clone(),
        Arc::new(ProcWorkload::new(proc_cfg)),
        logs.clone(),
        Arc::new(MemoryTransport::new()),
    )
    .with_metrics(metrics_handle)
    .with_subscribers(journal());

    // 4) Master
    let master = MasterNode::new(MasterConfig::default(), store, logs).with_subscribers(journal());

    // 5) Run until Ctrl+C
    let shutdown = CancellationToken::new();
    let worker_task = tokio::spawn(worker.run(shutdown.clone()));
    let master_task = tokio::spawn({
        let sd = shutdown.clone();
        async move { master.run(sd).await }
    });
    info!("agent running; press Ctrl+C to stop");

    tokio::signal::ctrl_c().await.context("ctrl-c handler")?;
    info!("shutting down...");
    shutdown.cancel();

    worker_task.await.context("worker join")?.context("worker")?;
    master_task.await.context("master join")?.context("master")?;

    match metrics.encode_text() {
        Ok(text) => debug!(metrics = %text, "final metrics"),
        Err(e) => debug!(error = %e, "metrics encoding failed"),
    }
    Ok(())
}
