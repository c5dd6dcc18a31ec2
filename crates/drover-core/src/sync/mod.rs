//! Snapshot-then-watch synchronisation of a store directory.
//!
//! A [`WatchSync`] reads every key under its prefix at revision `R`, emits
//! one event per key, then watches from `R + 1`. Because the watch resumes
//! exactly after the snapshot revision, no change is lost or duplicated
//! across the hand-off. A broken watch ends the cycle with an error; the
//! supervisor running it starts a fresh cycle after its back-off.

mod classify;
pub use classify::{KillSignals, TaskDefinitions};

use drover_store::{KeyValue, Revision, StoreError, WatchKind};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use crate::{CoreError, coord::StoreHandle};

/// Maps raw store changes under a prefix to domain events.
///
/// Keys are handed over with the prefix stripped. Returning `Ok(None)`
/// ignores the change; returning `Err` drops it with a diagnostic.
pub trait Classify: Send + Sync + 'static {
    type Event: Send + 'static;

    fn name(&self) -> &'static str;

    fn on_put(&self, key: &str, value: &[u8]) -> Result<Option<Self::Event>, CoreError>;

    fn on_delete(&self, key: &str) -> Result<Option<Self::Event>, CoreError>;

    /// Whether keys already present at (re)start are emitted.
    fn replay_snapshot(&self) -> bool {
        true
    }
}

pub struct WatchSync<C: Classify> {
    store: StoreHandle,
    prefix: String,
    classify: C,
}

impl<C: Classify> WatchSync<C> {
    pub fn new(store: StoreHandle, prefix: impl Into<String>, classify: C) -> Self {
        Self {
            store,
            prefix: prefix.into(),
            classify,
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Classified view of the directory at the current revision.
    pub async fn snapshot(&self) -> Result<(Revision, Vec<C::Event>), CoreError> {
        let snap = self.store.get_prefix(&self.prefix).await?;
        let events = snap
            .kvs
            .iter()
            .filter_map(|kv| self.classify_put(kv))
            .collect();
        Ok((snap.revision, events))
    }

    /// One snapshot-then-watch cycle, feeding `sink` until `stop`.
    ///
    /// Returns `Ok` only once `stop` is cancelled; a broken watch (including
    /// a compacted start revision) is returned as an error.
    pub async fn sync<F>(&self, mut sink: F, stop: CancellationToken) -> Result<(), CoreError>
    where
        F: FnMut(C::Event) + Send,
    {
        let snap = self.store.get_prefix(&self.prefix).await?;
        let replay = self.classify.replay_snapshot();
        debug!(
            target: "drover.sync",
            sync = self.classify.name(),
            revision = snap.revision,
            keys = snap.kvs.len(),
            replay,
            "snapshot"
        );
        if replay {
            for kv in &snap.kvs {
                if let Some(ev) = self.classify_put(kv) {
                    sink(ev);
                }
            }
        }

        let mut watch = self
            .store
            .watch_prefix(&self.prefix, snap.revision + 1)
            .await?;
        loop {
            tokio::select! {
                _ = stop.cancelled() => {
                    debug!(target: "drover.sync", sync = self.classify.name(), "watch sync stopped");
                    return Ok(());
                }
                ev = watch.next() => {
                    let Some(ev) = ev else {
                        warn!(target: "drover.sync", sync = self.classify.name(), prefix = %self.prefix, "watch broken");
                        return Err(StoreError::Closed.into());
                    };
                    trace!(target: "drover.sync", key = %ev.kv.key, revision = ev.revision, kind = ?ev.kind, "change");
                    let event = match ev.kind {
                        WatchKind::Put => self.classify_put(&ev.kv),
                        WatchKind::Delete => self.classify_delete(&ev.kv.key),
                    };
                    if let Some(event) = event {
                        sink(event);
                    }
                }
            }
        }
    }

    fn relative<'a>(&self, key: &'a str) -> Option<&'a str> {
        let rel = key.strip_prefix(self.prefix.as_str());
        if rel.is_none() {
            warn!(target: "drover.sync", key, prefix = %self.prefix, "key outside watched prefix");
        }
        rel
    }

    fn classify_put(&self, kv: &KeyValue) -> Option<C::Event> {
        let rel = self.relative(&kv.key)?;
        self.classify
            .on_put(rel, &kv.value)
            .unwrap_or_else(|e| {
                warn!(target: "drover.sync", sync = self.classify.name(), key = %kv.key, error = %e, "dropping malformed value");
                None
            })
    }

    fn classify_delete(&self, key: &str) -> Option<C::Event> {
        let rel = self.relative(key)?;
        self.classify.on_delete(rel).unwrap_or_else(|e| {
            warn!(target: "drover.sync", sync = self.classify.name(), key, error = %e, "dropping unreadable delete");
            None
        })
    }
}
