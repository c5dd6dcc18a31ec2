//! Lease-backed exclusivity.
//!
//! [`LeasedKey`] is the one primitive behind the per-task execution mutex,
//! leader election and worker registration: grant a lease, keep it alive,
//! and bind a key to it with a create-if-absent transaction. The three
//! uses differ only in TTL and retry policy.

mod elector;
pub use elector::LeaderElector;

mod heartbeat;
pub use heartbeat::Heartbeat;

use std::{sync::Arc, time::Duration};

use drover_store::{CoordinationStore, KeepAliveStream, LeaseId, TxnOutcome};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use crate::CoreError;

pub type StoreHandle = Arc<dyn CoordinationStore>;

struct Held {
    lease: LeaseId,
    renewal: CancellationToken,
    lost: CancellationToken,
}

/// A key owned through a lease.
///
/// Held iff a lease was granted *and* the create-if-absent transaction
/// succeeded. Ownership ends on [`release`](Self::release), on drop, or
/// involuntarily when the keepalive stream closes; the latter is signalled
/// through [`lost`](Self::lost) and is never retried here.
pub struct LeasedKey {
    store: StoreHandle,
    key: String,
    ttl: Duration,
    held: Option<Held>,
}

impl LeasedKey {
    pub fn new(store: StoreHandle, key: impl Into<String>, ttl: Duration) -> Self {
        Self {
            store,
            key: key.into(),
            ttl,
            held: None,
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// True while the key is owned and the lease has not been lost.
    pub fn is_held(&self) -> bool {
        self.held.as_ref().is_some_and(|h| !h.lost.is_cancelled())
    }

    pub fn lease(&self) -> Option<LeaseId> {
        self.held.as_ref().map(|h| h.lease)
    }

    /// Token cancelled when ownership is lost involuntarily.
    ///
    /// `None` when not held.
    pub fn lost(&self) -> Option<CancellationToken> {
        self.held.as_ref().map(|h| h.lost.clone())
    }

    /// Try to take ownership, writing `value` under the key.
    ///
    /// Returns [`CoreError::Conflict`] when the key already exists; the
    /// existing holder is left untouched and the fresh lease is revoked.
    pub async fn acquire(&mut self, value: impl Into<Vec<u8>>) -> Result<(), CoreError> {
        if self.is_held() {
            return Ok(());
        }
        self.release().await;

        let lease = self.store.grant(self.ttl).await?;
        let stream = match self.store.keep_alive(lease).await {
            Ok(stream) => stream,
            Err(e) => {
                self.revoke_quietly(lease).await;
                return Err(e.into());
            }
        };

        let renewal = CancellationToken::new();
        let lost = CancellationToken::new();
        tokio::spawn(renew(
            stream,
            renewal.clone(),
            lost.clone(),
            self.key.clone(),
            lease,
        ));

        match self.store.put_if_absent(&self.key, value.into(), lease).await {
            Ok(TxnOutcome::Created { revision }) => {
                debug!(target: "drover.coord", key = %self.key, lease, revision, "acquired");
                self.held = Some(Held {
                    lease,
                    renewal,
                    lost,
                });
                Ok(())
            }
            Ok(TxnOutcome::Existing(kv)) => {
                trace!(target: "drover.coord", key = %self.key, holder_lease = ?kv.lease, "held elsewhere");
                renewal.cancel();
                self.revoke_quietly(lease).await;
                Err(CoreError::Conflict(self.key.clone()))
            }
            Err(e) => {
                renewal.cancel();
                self.revoke_quietly(lease).await;
                Err(e.into())
            }
        }
    }

    /// Stop renewal and revoke the lease. Idempotent.
    pub async fn release(&mut self) {
        if let Some(held) = self.held.take() {
            held.renewal.cancel();
            self.revoke_quietly(held.lease).await;
            debug!(target: "drover.coord", key = %self.key, lease = held.lease, "released");
        }
    }

    async fn revoke_quietly(&self, lease: LeaseId) {
        // TTL bounds staleness if this fails.
        if let Err(e) = self.store.revoke(lease).await {
            trace!(target: "drover.coord", key = %self.key, lease, error = %e, "revoke failed");
        }
    }
}

impl Drop for LeasedKey {
    fn drop(&mut self) {
        let Some(held) = self.held.take() else {
            return;
        };
        held.renewal.cancel();
        if let Ok(rt) = tokio::runtime::Handle::try_current() {
            let store = Arc::clone(&self.store);
            rt.spawn(async move {
                let _ = store.revoke(held.lease).await;
            });
        }
    }
}

async fn renew(
    mut stream: KeepAliveStream,
    renewal: CancellationToken,
    lost: CancellationToken,
    key: String,
    lease: LeaseId,
) {
    loop {
        tokio::select! {
            _ = renewal.cancelled() => return,
            resp = stream.next() => match resp {
                Some(resp) => {
                    trace!(target: "drover.coord", key = %key, lease, ttl = ?resp.ttl, "renewed");
                }
                None => {
                    if !renewal.is_cancelled() {
                        warn!(target: "drover.coord", key = %key, lease, "keepalive stream closed; ownership lost");
                        lost.cancel();
                    }
                    return;
                }
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use drover_store::MemoryStore;

    use super::*;

    fn store() -> (MemoryStore, StoreHandle) {
        let mem = MemoryStore::new();
        let handle: StoreHandle = Arc::new(mem.clone());
        (mem, handle)
    }

    #[tokio::test]
    async fn second_owner_gets_conflict() {
        let (mem, store) = store();
        let mut a = LeasedKey::new(store.clone(), "/lock/x", Duration::from_secs(5));
        let mut b = LeasedKey::new(store.clone(), "/lock/x", Duration::from_secs(5));

        a.acquire("a").await.unwrap();
        let before = mem.get("/lock/x").await.unwrap().unwrap();

        let err = b.acquire("b").await.unwrap_err();
        assert!(matches!(err, CoreError::Conflict(_)));
        assert!(!b.is_held());

        let after = mem.get("/lock/x").await.unwrap().unwrap();
        assert_eq!(before, after);
        assert!(a.is_held());
    }

    #[tokio::test]
    async fn release_lets_another_owner_in() {
        let (_mem, store) = store();
        let mut a = LeasedKey::new(store.clone(), "/lock/x", Duration::from_secs(5));
        let mut b = LeasedKey::new(store.clone(), "/lock/x", Duration::from_secs(5));

        a.acquire("a").await.unwrap();
        a.release().await;
        a.release().await;
        assert!(!a.is_held());

        b.acquire("b").await.unwrap();
        assert!(b.is_held());
    }

    #[tokio::test]
    async fn conflict_revokes_fresh_lease() {
        let (mem, store) = store();
        let mut a = LeasedKey::new(store.clone(), "/k", Duration::from_secs(5));
        a.acquire("a").await.unwrap();
        let held_lease = a.lease().unwrap();

        let mut b = LeasedKey::new(store.clone(), "/k", Duration::from_secs(5));
        let _ = b.acquire("b").await;
        // leases are allocated sequentially
        assert!(!mem.lease_exists(held_lease + 1));
        assert!(mem.lease_exists(held_lease));
    }

    #[tokio::test]
    async fn store_outage_signals_loss() {
        let (mem, store) = store();
        let mut key = LeasedKey::new(store, "/k", Duration::from_millis(60));
        key.acquire("a").await.unwrap();
        let lost = key.lost().unwrap();

        mem.set_available(false);
        tokio::time::timeout(Duration::from_secs(2), lost.cancelled())
            .await
            .expect("loss not signalled");
        assert!(!key.is_held());
    }

    #[tokio::test]
    async fn renewal_outlives_ttl() {
        let (mem, store) = store();
        let mut key = LeasedKey::new(store, "/k", Duration::from_millis(60));
        key.acquire("a").await.unwrap();

        tokio::time::sleep(Duration::from_millis(250)).await;
        assert!(key.is_held());
        assert!(mem.get("/k").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn drop_revokes() {
        let (mem, store) = store();
        let mut key = LeasedKey::new(store, "/k", Duration::from_secs(5));
        key.acquire("a").await.unwrap();
        let lease = key.lease().unwrap();
        drop(key);

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!mem.lease_exists(lease));
        assert!(mem.get("/k").await.unwrap().is_none());
    }
}
