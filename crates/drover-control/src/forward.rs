use std::{sync::Arc, time::SystemTime};

use drover_core::{Classify, CoreError, StoreHandle, WatchSync};
use drover_model::WarnMessage;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Warning directory: Put → warning, Delete ignored.
///
/// Entries are short-lived and consumed once, so a snapshot is only used
/// for its revision. An unreadable value still yields a warning naming
/// its key.
#[derive(Debug, Default, Clone, Copy)]
pub struct Warnings;

impl Classify for Warnings {
    type Event = WarnMessage;

    fn name(&self) -> &'static str {
        "warnings"
    }

    fn on_put(&self, key: &str, value: &[u8]) -> Result<Option<WarnMessage>, CoreError> {
        match serde_json::from_slice(value) {
            Ok(msg) => Ok(Some(msg)),
            Err(e) => {
                debug!(target: "drover.forward", key, error = %e, "unreadable warning");
                Ok(Some(WarnMessage::malformed(key, SystemTime::now())))
            }
        }
    }

    fn on_delete(&self, _key: &str) -> Result<Option<WarnMessage>, CoreError> {
        Ok(None)
    }

    fn replay_snapshot(&self) -> bool {
        false
    }
}

/// Leader-only duty that reports every new task warning.
pub struct AlertForwarder {
    sync: WatchSync<Warnings>,
    outbox: Option<mpsc::UnboundedSender<WarnMessage>>,
}

impl AlertForwarder {
    pub fn new(store: StoreHandle, prefix: impl Into<String>) -> Self {
        Self {
            sync: WatchSync::new(store, prefix, Warnings),
            outbox: None,
        }
    }

    /// Also deliver each warning to `outbox`.
    pub fn with_outbox(mut self, outbox: mpsc::UnboundedSender<WarnMessage>) -> Self {
        self.outbox = Some(outbox);
        self
    }

    /// Forward until `term` is cancelled.
    ///
    /// A broken watch ends the duty with an error, which ends the term.
    pub async fn forward(self: Arc<Self>, term: CancellationToken) -> Result<(), CoreError> {
        debug!(target: "drover.forward", prefix = %self.sync.prefix(), "forwarder started");
        let result = self.sync.sync(|msg| self.emit(msg), term).await;
        debug!(target: "drover.forward", ok = result.is_ok(), "forwarder stopped");
        result
    }

    fn emit(&self, msg: WarnMessage) {
        warn!(
            target: "drover.forward",
            task = %msg.key(),
            generated_at = msg.generate_time,
            message = %msg.message,
            "task warning"
        );
        if let Some(outbox) = &self.outbox {
            let _ = outbox.send(msg);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use drover_model::Task;
    use drover_store::{CoordinationStore, MemoryStore};

    use super::*;

    #[test]
    fn unreadable_warning_names_its_key() {
        let msg = Warnings.on_put("image/1/a", b"not json").unwrap().unwrap();
        assert!(msg.message.contains("image/1/a"));
        assert_eq!(Warnings.on_delete("image/1/a").unwrap(), None);
    }

    #[tokio::test]
    async fn forwards_only_new_warnings() {
        let store = MemoryStore::new();
        let task = Task::new("image", 1, "a");
        let old = WarnMessage::for_task(&task, "old", SystemTime::now());
        store
            .put("/drover/warn/image/1/a", serde_json::to_vec(&old).unwrap(), None)
            .await
            .unwrap();

        let (tx, mut rx) = mpsc::unbounded_channel();
        let fwd = Arc::new(
            AlertForwarder::new(Arc::new(store.clone()), "/drover/warn/").with_outbox(tx),
        );
        let term = CancellationToken::new();
        let handle = tokio::spawn(fwd.forward(term.clone()));
        tokio::time::sleep(Duration::from_millis(50)).await;

        let new = WarnMessage::for_task(&task, "boom", SystemTime::now());
        store
            .put("/drover/warn/image/1/a", serde_json::to_vec(&new).unwrap(), None)
            .await
            .unwrap();
        store.delete("/drover/warn/image/1/a").await.unwrap();
        store
            .put("/drover/warn/video/2/b", b"{".to_vec(), None)
            .await
            .unwrap();

        let first = rx.recv().await.unwrap();
        assert_eq!(first.message, "boom");
        let second = rx.recv().await.unwrap();
        assert!(second.message.contains("video/2/b"));

        term.cancel();
        handle.await.unwrap().unwrap();
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn broken_watch_ends_the_duty() {
        let store = MemoryStore::new();
        let fwd = Arc::new(AlertForwarder::new(Arc::new(store.clone()), "/drover/warn/"));
        let handle = tokio::spawn(fwd.forward(CancellationToken::new()));
        tokio::time::sleep(Duration::from_millis(30)).await;

        store.set_available(false);
        let err = handle.await.unwrap().unwrap_err();
        assert!(matches!(err, CoreError::Transport(_)));
    }
}
