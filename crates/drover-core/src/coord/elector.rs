use std::{future::Future, time::Duration};

use tokio::{sync::watch, task::JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{LeasedKey, StoreHandle};
use crate::CoreError;

/// Leader election over a single [`LeasedKey`].
///
/// The key's value names the current leader. One
/// [`campaign`](Self::campaign) is one attempt at one term; a supervisor
/// retries it after conflict or involuntary loss.
pub struct LeaderElector {
    store: StoreHandle,
    key: String,
    identity: String,
    ttl: Duration,
    leader_tx: watch::Sender<bool>,
}

enum TermEnd {
    Stopped,
    Lost,
    DutyEnded(Result<Result<(), CoreError>, tokio::task::JoinError>),
}

impl LeaderElector {
    pub fn new(
        store: StoreHandle,
        key: impl Into<String>,
        identity: impl Into<String>,
        ttl: Duration,
    ) -> Self {
        let (leader_tx, _) = watch::channel(false);
        Self {
            store,
            key: key.into(),
            identity: identity.into(),
            ttl,
            leader_tx,
        }
    }

    pub fn is_leader(&self) -> bool {
        *self.leader_tx.borrow()
    }

    /// Observe leadership changes.
    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.leader_tx.subscribe()
    }

    /// Take the key if it is free and serve one term with `duty`.
    ///
    /// The token handed to `duty` is cancelled when the term ends; the
    /// elector waits for the duty to return before it releases the key.
    /// Returns `Ok` when `stop` ended the term, [`CoreError::Conflict`]
    /// when another identity leads, [`CoreError::LeaseLost`] on involuntary
    /// loss, and the duty's own error when the duty gave up first.
    pub async fn campaign<F, Fut>(&self, duty: &F, stop: CancellationToken) -> Result<(), CoreError>
    where
        F: Fn(CancellationToken) -> Fut + Send + Sync,
        Fut: Future<Output = Result<(), CoreError>> + Send + 'static,
    {
        let mut key = LeasedKey::new(self.store.clone(), self.key.clone(), self.ttl);
        if let Err(e) = key.acquire(self.identity.as_bytes().to_vec()).await {
            if matches!(e, CoreError::Conflict(_)) {
                debug!(target: "drover.elect", key = %self.key, "leadership held elsewhere");
            }
            return Err(e);
        }
        let result = self.serve_term(&key, duty, &stop).await;
        key.release().await;
        result
    }

    async fn serve_term<F, Fut>(
        &self,
        key: &LeasedKey,
        duty: &F,
        stop: &CancellationToken,
    ) -> Result<(), CoreError>
    where
        F: Fn(CancellationToken) -> Fut + Send + Sync,
        Fut: Future<Output = Result<(), CoreError>> + Send + 'static,
    {
        let Some(lost) = key.lost() else {
            return Err(CoreError::LeaseLost(self.key.clone()));
        };
        info!(target: "drover.elect", key = %self.key, identity = %self.identity, "became leader");
        self.leader_tx.send_replace(true);

        let term = stop.child_token();
        let mut task = tokio::spawn(duty(term.clone()));

        let end = tokio::select! {
            _ = lost.cancelled() => TermEnd::Lost,
            _ = stop.cancelled() => TermEnd::Stopped,
            joined = &mut task => TermEnd::DutyEnded(joined),
        };
        term.cancel();

        let result = match end {
            TermEnd::Stopped => {
                self.join_duty(task).await;
                Ok(())
            }
            TermEnd::Lost => {
                warn!(target: "drover.elect", key = %self.key, "leadership lost");
                self.join_duty(task).await;
                Err(CoreError::LeaseLost(self.key.clone()))
            }
            TermEnd::DutyEnded(joined) => {
                let error = match joined {
                    Ok(Ok(())) => CoreError::Cancelled,
                    Ok(Err(e)) => e,
                    Err(e) => CoreError::Aborted(e.to_string()),
                };
                warn!(target: "drover.elect", key = %self.key, error = %error, "leader duty ended; stepping down");
                Err(error)
            }
        };
        self.leader_tx.send_replace(false);
        result
    }

    async fn join_duty(&self, task: JoinHandle<Result<(), CoreError>>) {
        match task.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                debug!(target: "drover.elect", key = %self.key, error = %e, "leader duty ended with error");
            }
            Err(e) => {
                warn!(target: "drover.elect", key = %self.key, error = %e, "leader duty aborted");
            }
        }
    }
}
