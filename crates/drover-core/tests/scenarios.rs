use std::{
    future::Future,
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use drover_core::{
    BatchConfig, ExecError, MemorySink, MemoryTransport, StoreHandle, WorkerConfig, WorkerNode,
    Workload, WorkloadOutcome,
};
use drover_model::{Layout, Task, WarnMessage};
use drover_store::{CoordinationStore, MemoryStore};
use tokio_util::sync::CancellationToken;

/// Behaviour is picked by task-name prefix: `ok*` succeeds, `slow*` succeeds
/// after 300ms, `hang*` waits for cancellation, anything else exits 1.
struct Scripted {
    runs: Arc<AtomicUsize>,
}

#[async_trait]
impl Workload for Scripted {
    fn name(&self) -> &'static str {
        "scripted"
    }

    async fn run(&self, task: &Task, cancel: CancellationToken) -> WorkloadOutcome {
        self.runs.fetch_add(1, Ordering::SeqCst);
        let name = task.name.as_str();
        if name.starts_with("ok") {
            WorkloadOutcome::ok("hello")
        } else if name.starts_with("slow") {
            tokio::select! {
                _ = cancel.cancelled() => WorkloadOutcome::failed("", ExecError::Cancelled),
                _ = tokio::time::sleep(Duration::from_millis(300)) => WorkloadOutcome::ok("slow"),
            }
        } else if name.starts_with("hang") {
            cancel.cancelled().await;
            WorkloadOutcome::failed("partial", ExecError::Cancelled)
        } else {
            WorkloadOutcome::failed("boom", ExecError::NonZeroExit { code: 1 })
        }
    }
}

struct Cluster {
    store: MemoryStore,
    sink: MemorySink,
    runs: Arc<AtomicUsize>,
    shutdown: CancellationToken,
    layout: Layout,
}

fn config(identity: &str) -> WorkerConfig {
    WorkerConfig {
        identity: identity.to_string(),
        watch_retry: Duration::from_millis(50),
        heartbeat_ttl: Duration::from_millis(500),
        heartbeat_retry: Duration::from_millis(100),
        alert_ttl: Duration::from_secs(5),
        relay_retry: Duration::from_millis(50),
        shutdown_grace: Duration::from_secs(1),
        batch: BatchConfig {
            size: 1,
            commit_interval: Duration::from_millis(100),
            capacity: 64,
        },
        ..WorkerConfig::default()
    }
}

async fn start(workers: &[&str]) -> Cluster {
    let store = MemoryStore::new();
    let sink = MemorySink::new();
    let transport = MemoryTransport::new();
    let runs = Arc::new(AtomicUsize::new(0));
    let shutdown = CancellationToken::new();

    for id in workers {
        let handle: StoreHandle = Arc::new(store.clone());
        let node = WorkerNode::new(
            config(id),
            handle,
            Arc::new(Scripted { runs: runs.clone() }),
            Arc::new(sink.clone()),
            Arc::new(transport.clone()),
        );
        let sd = shutdown.clone();
        tokio::spawn(async move { node.run(sd).await });
    }
    // let the watches come up
    tokio::time::sleep(Duration::from_millis(100)).await;

    Cluster {
        store,
        sink,
        runs,
        shutdown,
        layout: Layout::default(),
    }
}

async fn eventually<F, Fut>(mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    for _ in 0..150 {
        if check().await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    false
}

async fn submit(c: &Cluster, task: &Task) {
    let value = serde_json::to_vec(task).unwrap();
    c.store
        .put(&c.layout.task_key(&task.key()), value, None)
        .await
        .unwrap();
}

async fn exists(store: &MemoryStore, key: &str) -> bool {
    store.get(key).await.unwrap().is_some()
}

async fn records_len(sink: &MemorySink, n: usize) -> bool {
    sink.records().len() == n
}

async fn runs_eq(runs: &AtomicUsize, n: usize) -> bool {
    runs.load(Ordering::SeqCst) == n
}

async fn members_eq(store: &MemoryStore, prefix: &str, n: usize) -> bool {
    store.get_prefix(prefix).await.unwrap().kvs.len() == n
}

#[tokio::test]
async fn successful_task_notifies_and_logs_without_alert() {
    let c = start(&["w1"]).await;
    let task = Task::new("image", 42, "ok_job1");
    submit(&c, &task).await;

    let finish = c.layout.finish_key(&task.key());
    assert!(eventually(|| exists(&c.store, &finish)).await);
    assert!(eventually(|| records_len(&c.sink, 1)).await);

    let record = &c.sink.records()[0];
    assert_eq!(record.error, "");
    assert_eq!(record.output, "hello");
    assert!(!exists(&c.store, &c.layout.fail_key(&task.key())).await);
    assert!(!exists(&c.store, &c.layout.warn_key(&task.key())).await);

    // mutex released after the run
    assert!(!exists(&c.store, &c.layout.lock_key(&task.key())).await);
    c.shutdown.cancel();
}

#[tokio::test]
async fn timed_out_task_fails_and_alerts() {
    let c = start(&["w1"]).await;
    let task = Task::new("image", 42, "hang_job1").with_timeout_secs(1);
    submit(&c, &task).await;

    let fail = c.layout.fail_key(&task.key());
    assert!(eventually(|| exists(&c.store, &fail)).await);

    let warn_key = c.layout.warn_key(&task.key());
    assert!(eventually(|| exists(&c.store, &warn_key)).await);
    let kv = c.store.get(&warn_key).await.unwrap().unwrap();
    let warning: WarnMessage = serde_json::from_slice(&kv.value).unwrap();
    assert_eq!(warning.message, ExecError::Timeout.to_string());
    assert!(kv.lease.is_some());

    assert!(eventually(|| records_len(&c.sink, 1)).await);
    assert_eq!(c.sink.records()[0].error, ExecError::Timeout.to_string());
    assert!(!exists(&c.store, &c.layout.finish_key(&task.key())).await);
    c.shutdown.cancel();
}

#[tokio::test]
async fn kill_marker_cancels_running_task() {
    let c = start(&["w1"]).await;
    let task = Task::new("video", 7, "hang_clip");
    submit(&c, &task).await;
    assert!(eventually(|| runs_eq(&c.runs, 1)).await);

    let lease = c.store.grant(Duration::from_secs(2)).await.unwrap();
    c.store
        .put(&c.layout.kill_key(&task.key()), Vec::new(), Some(lease))
        .await
        .unwrap();

    assert!(eventually(|| records_len(&c.sink, 1)).await);
    assert_eq!(c.sink.records()[0].error, ExecError::Cancelled.to_string());
    assert!(exists(&c.store, &c.layout.fail_key(&task.key())).await);
    c.shutdown.cancel();
}

#[tokio::test]
async fn kill_for_untracked_task_changes_nothing() {
    let c = start(&["w1"]).await;
    let key = drover_model::TaskKey::new("image", 1, "ghost");
    c.store
        .put(&c.layout.kill_key(&key), Vec::new(), None)
        .await
        .unwrap();

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(c.runs.load(Ordering::SeqCst), 0);
    assert!(c.sink.records().is_empty());
    assert!(!exists(&c.store, &c.layout.fail_key(&key)).await);
    c.shutdown.cancel();
}

#[tokio::test]
async fn only_one_worker_runs_a_task() {
    let c = start(&["w1", "w2", "w3"]).await;
    let task = Task::new("image", 5, "slow_once");
    submit(&c, &task).await;

    let finish = c.layout.finish_key(&task.key());
    assert!(eventually(|| exists(&c.store, &finish)).await);
    tokio::time::sleep(Duration::from_millis(200)).await;

    assert_eq!(c.runs.load(Ordering::SeqCst), 1);
    // lock contention leaves no trace
    assert_eq!(c.sink.records().len(), 1);
    assert!(!exists(&c.store, &c.layout.warn_key(&task.key())).await);
    c.shutdown.cancel();
}

#[tokio::test]
async fn workers_register_membership() {
    let c = start(&["w1", "w2"]).await;
    let workers = c.layout.workers.clone();
    assert!(eventually(|| members_eq(&c.store, &workers, 2)).await);

    c.shutdown.cancel();
    assert!(eventually(|| members_eq(&c.store, &workers, 0)).await);
}

#[tokio::test]
async fn failed_task_after_restarted_watch_is_still_seen() {
    let c = start(&["w1"]).await;
    c.store.set_available(false);
    tokio::time::sleep(Duration::from_millis(100)).await;
    c.store.set_available(true);

    let task = Task::new("image", 9, "fails");
    submit(&c, &task).await;
    let fail = c.layout.fail_key(&task.key());
    assert!(eventually(|| exists(&c.store, &fail)).await);
    c.shutdown.cancel();
}

#[tokio::test]
async fn worker_run_returns_after_shutdown() {
    let store = MemoryStore::new();
    let node = WorkerNode::new(
        config("solo"),
        Arc::new(store.clone()),
        Arc::new(Scripted {
            runs: Arc::new(AtomicUsize::new(0)),
        }),
        Arc::new(MemorySink::new()),
        Arc::new(MemoryTransport::new()),
    );
    let shutdown = CancellationToken::new();
    let run = tokio::spawn(node.run(shutdown.clone()));
    let member = Layout::default().worker_key("solo");
    assert!(eventually(|| exists(&store, &member)).await);

    shutdown.cancel();
    let stopped = tokio::time::timeout(Duration::from_secs(3), run).await;
    assert!(matches!(stopped, Ok(Ok(Ok(())))));
    assert!(!exists(&store, &member).await);
}
