use std::{sync::OnceLock, time::Duration};

use drover_model::Layout;

static IDENTITY: OnceLock<String> = OnceLock::new();

/// Advertised identity of this process: the host name, or a random UUID
/// when the host name is unavailable.
pub fn default_identity() -> &'static str {
    IDENTITY.get_or_init(|| {
        if let Ok(hostname) = hostname::get()
            && let Some(name) = hostname.to_str()
            && !name.is_empty()
        {
            return name.to_string();
        }
        uuid::Uuid::new_v4().to_string()
    })
}

#[derive(Debug, Clone)]
pub struct BatchConfig {
    /// Commit when the batch reaches this many records (clamped to ≥ 1).
    pub size: usize,
    /// Commit a non-empty batch this long after its first record.
    pub commit_interval: Duration,
    /// Capacity of the batcher's record queue.
    pub capacity: usize,
}

impl BatchConfig {
    pub fn size(&self) -> usize {
        self.size.max(1)
    }
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            size: 100,
            commit_interval: Duration::from_secs(1),
            capacity: 1024,
        }
    }
}

/// Worker-side settings.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub layout: Layout,
    /// Address advertised under the membership directory.
    pub identity: String,
    /// Capacity of the scheduler's task-event queue.
    pub event_capacity: usize,
    /// TTL of the per-task execution mutex.
    pub lock_ttl: Duration,
    pub heartbeat_ttl: Duration,
    /// Back-off before a lost registration is retried.
    pub heartbeat_retry: Duration,
    /// Back-off before a broken watch is re-established.
    pub watch_retry: Duration,
    pub batch: BatchConfig,
    /// Alert-transport topic for failure warnings.
    pub warn_topic: String,
    /// Lease bound to warnings re-published into the store.
    pub alert_ttl: Duration,
    /// Back-off before a failed alert subscription is retried.
    pub relay_retry: Duration,
    /// Time supervised loops get to stop after shutdown.
    pub shutdown_grace: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            layout: Layout::default(),
            identity: default_identity().to_string(),
            event_capacity: 512,
            lock_ttl: Duration::from_secs(5),
            heartbeat_ttl: Duration::from_secs(5),
            heartbeat_retry: Duration::from_secs(5),
            watch_retry: Duration::from_secs(1),
            batch: BatchConfig::default(),
            warn_topic: "drover-warn".to_string(),
            alert_ttl: Duration::from_secs(1),
            relay_retry: Duration::from_secs(1),
            shutdown_grace: Duration::from_secs(5),
        }
    }
}
