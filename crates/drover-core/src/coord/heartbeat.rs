use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::{LeasedKey, StoreHandle};
use crate::CoreError;

/// Fleet membership: keeps `<workers>/<identity>` alive through a lease.
///
/// One [`register`](Self::register) call is one registration; a supervisor
/// restarts it after a failure.
pub struct Heartbeat {
    store: StoreHandle,
    key: String,
    identity: String,
    ttl: Duration,
}

impl Heartbeat {
    pub fn new(
        store: StoreHandle,
        key: impl Into<String>,
        identity: impl Into<String>,
        ttl: Duration,
    ) -> Self {
        Self {
            store,
            key: key.into(),
            identity: identity.into(),
            ttl,
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// Register and hold the membership key until `stop`.
    ///
    /// Fails when the key cannot be taken or the lease is lost; the key is
    /// released on every exit.
    pub async fn register(&self, stop: CancellationToken) -> Result<(), CoreError> {
        let mut reg = LeasedKey::new(self.store.clone(), self.key.clone(), self.ttl);
        reg.acquire(self.identity.as_bytes().to_vec()).await?;
        debug!(target: "drover.heartbeat", key = %self.key, "registered");

        let result = match reg.lost() {
            Some(lost) => tokio::select! {
                _ = lost.cancelled() => {
                    warn!(target: "drover.heartbeat", key = %self.key, "registration lost");
                    Err(CoreError::LeaseLost(self.key.clone()))
                }
                _ = stop.cancelled() => Ok(()),
            },
            None => Err(CoreError::LeaseLost(self.key.clone())),
        };
        reg.release().await;
        debug!(target: "drover.heartbeat", key = %self.key, "registration ended");
        result
    }
}
