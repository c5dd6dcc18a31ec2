use std::{sync::Arc, time::Duration};

use drover_store::StoreError;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use super::AlertTransport;
use crate::{CoreError, coord::StoreHandle};

/// Moves warnings from the alert transport into the store.
///
/// Each message is written under its own key, bound to a fresh short
/// lease, so the leader's watch sees it once and the store cleans up after
/// itself. A message whose lease cannot be granted is skipped.
pub struct AlertRelay {
    store: StoreHandle,
    transport: Arc<dyn AlertTransport>,
    topic: String,
    ttl: Duration,
}

impl AlertRelay {
    pub fn new(
        store: StoreHandle,
        transport: Arc<dyn AlertTransport>,
        topic: impl Into<String>,
        ttl: Duration,
    ) -> Self {
        Self {
            store,
            transport,
            topic: topic.into(),
            ttl,
        }
    }

    /// Subscribe once and relay until `stop`.
    ///
    /// Fails when the subscription cannot be opened or closes underneath.
    pub async fn relay(&self, stop: CancellationToken) -> Result<(), CoreError> {
        let mut sub = self.transport.subscribe(&self.topic)?;
        debug!(target: "drover.alert", topic = %self.topic, "relay subscribed");
        loop {
            tokio::select! {
                _ = stop.cancelled() => {
                    debug!(target: "drover.alert", topic = %self.topic, "relay stopped");
                    return Ok(());
                }
                msg = sub.next() => {
                    let Some((key, value)) = msg else {
                        warn!(target: "drover.alert", topic = %self.topic, "subscription closed");
                        return Err(StoreError::Closed.into());
                    };
                    if let Err(e) = self.publish(key, value).await {
                        warn!(target: "drover.alert", topic = %self.topic, error = %e, "dropping warning");
                    }
                }
            }
        }
    }

    async fn publish(&self, key: Vec<u8>, value: Vec<u8>) -> Result<(), CoreError> {
        let key = String::from_utf8(key)
            .map_err(|e| CoreError::InvalidKey(String::from_utf8_lossy(e.as_bytes()).into_owned()))?;
        let lease = self.store.grant(self.ttl).await?;
        self.store.put(&key, value, Some(lease)).await?;
        trace!(target: "drover.alert", key = %key, lease, "warning relayed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use drover_store::{CoordinationStore, MemoryStore};

    use super::*;
    use crate::{MemoryTransport, Subscription, Supervision};

    /// Refuses the first `failures` subscriptions, then delegates.
    struct Flaky {
        inner: MemoryTransport,
        failures: AtomicUsize,
    }

    impl AlertTransport for Flaky {
        fn publish(&self, topic: &str, key: Vec<u8>, value: Vec<u8>) -> Result<(), CoreError> {
            self.inner.publish(topic, key, value)
        }

        fn subscribe(&self, topic: &str) -> Result<Subscription, CoreError> {
            let left = self.failures.load(Ordering::SeqCst);
            if left > 0 {
                self.failures.store(left - 1, Ordering::SeqCst);
                return Err(CoreError::Transport(StoreError::Unavailable));
            }
            self.inner.subscribe(topic)
        }
    }

    #[tokio::test]
    async fn relays_under_short_lease() {
        let store = MemoryStore::new();
        let transport = MemoryTransport::new();
        transport
            .publish("warn", b"/drover/warn/image/1/a".to_vec(), b"{}".to_vec())
            .unwrap();

        let relay = AlertRelay::new(
            Arc::new(store.clone()),
            Arc::new(transport.clone()),
            "warn",
            Duration::from_millis(80),
        );
        let stop = CancellationToken::new();
        let task = {
            let stop = stop.clone();
            tokio::spawn(async move { relay.relay(stop).await })
        };

        tokio::time::sleep(Duration::from_millis(30)).await;
        let kv = store.get("/drover/warn/image/1/a").await.unwrap().unwrap();
        assert_eq!(kv.value, b"{}");
        assert!(kv.lease.is_some());

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(store.get("/drover/warn/image/1/a").await.unwrap().is_none());
        stop.cancel();
        task.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn store_outage_skips_message() {
        let store = MemoryStore::new();
        let transport = MemoryTransport::new();
        let relay = AlertRelay::new(
            Arc::new(store.clone()),
            Arc::new(transport.clone()),
            "warn",
            Duration::from_secs(1),
        );
        store.set_available(false);
        let err = relay.publish(b"/k".to_vec(), Vec::new()).await.unwrap_err();
        assert!(matches!(err, CoreError::Transport(_)));
    }

    #[tokio::test]
    async fn failed_subscribe_is_an_error() {
        let transport = Flaky {
            inner: MemoryTransport::new(),
            failures: AtomicUsize::new(1),
        };
        let relay = AlertRelay::new(
            Arc::new(MemoryStore::new()),
            Arc::new(transport),
            "warn",
            Duration::from_secs(1),
        );
        let err = relay.relay(CancellationToken::new()).await.unwrap_err();
        assert_eq!(err, CoreError::Transport(StoreError::Unavailable));
    }

    #[tokio::test]
    async fn supervised_relay_survives_failed_subscribes() {
        let store = MemoryStore::new();
        let inner = MemoryTransport::new();
        let relay = Arc::new(AlertRelay::new(
            Arc::new(store.clone()),
            Arc::new(Flaky {
                inner: inner.clone(),
                failures: AtomicUsize::new(2),
            }),
            "warn",
            Duration::from_secs(1),
        ));

        let shutdown = CancellationToken::new();
        let mut loops = Supervision::new(shutdown.clone());
        loops.add("relay", Duration::from_millis(20), move |stop| {
            let relay = relay.clone();
            async move { relay.relay(stop).await }
        });
        let run = tokio::spawn(loops.run(Duration::from_secs(1)));
        tokio::time::sleep(Duration::from_millis(150)).await;

        inner
            .publish("warn", b"/drover/warn/image/1/late".to_vec(), b"{}".to_vec())
            .unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(store.get("/drover/warn/image/1/late").await.unwrap().is_some());
        assert_eq!(inner.backlog("warn"), 0);

        shutdown.cancel();
        run.await.unwrap();
    }
}
