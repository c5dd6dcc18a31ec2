//! Alert transport.
//!
//! Failure warnings leave the scheduler through an [`AlertTransport`] so
//! that alert ingestion never waits on the coordination store. The
//! consuming side ([`AlertRelay`]) re-publishes each message into the store
//! under a short lease, where the elected leader picks it up.

mod relay;
pub use relay::AlertRelay;

use std::{
    collections::{HashMap, VecDeque},
    sync::{
        Arc, Mutex, MutexGuard, PoisonError,
        atomic::{AtomicBool, Ordering},
    },
};

use drover_store::StoreError;
use tokio::sync::mpsc;
use tracing::{trace, warn};

use crate::CoreError;

/// One message on the transport.
pub type AlertMessage = (Vec<u8>, Vec<u8>);

/// Stream of `(key, value)` messages for one subscriber.
#[derive(Debug)]
pub struct Subscription {
    rx: mpsc::UnboundedReceiver<AlertMessage>,
}

impl Subscription {
    pub fn new(rx: mpsc::UnboundedReceiver<AlertMessage>) -> Self {
        Self { rx }
    }

    pub async fn next(&mut self) -> Option<AlertMessage> {
        self.rx.recv().await
    }
}

/// Fire-and-forget publish/subscribe queue.
pub trait AlertTransport: Send + Sync + 'static {
    fn publish(&self, topic: &str, key: Vec<u8>, value: Vec<u8>) -> Result<(), CoreError>;

    fn subscribe(&self, topic: &str) -> Result<Subscription, CoreError>;
}

/// Messages kept per topic while nobody subscribes.
pub const DEFAULT_BACKLOG_LIMIT: usize = 1024;

#[derive(Default)]
struct Topic {
    backlog: VecDeque<AlertMessage>,
    subscribers: Vec<mpsc::UnboundedSender<AlertMessage>>,
    next: usize,
}

impl Topic {
    fn deliver(&mut self, mut msg: AlertMessage, limit: usize) {
        while !self.subscribers.is_empty() {
            let idx = self.next % self.subscribers.len();
            match self.subscribers[idx].send(msg) {
                Ok(()) => {
                    self.next = idx + 1;
                    return;
                }
                Err(mpsc::error::SendError(back)) => {
                    self.subscribers.remove(idx);
                    msg = back;
                }
            }
        }
        if limit == 0 {
            return;
        }
        while self.backlog.len() >= limit {
            if let Some((key, _)) = self.backlog.pop_front() {
                warn!(target: "drover.alert", key = %String::from_utf8_lossy(&key), "backlog full; dropping oldest");
            }
        }
        self.backlog.push_back(msg);
    }
}

/// In-process transport with consumer-group semantics.
///
/// Every message goes to exactly one live subscriber of its topic (round
/// robin); messages published while a topic has no subscriber are kept and
/// handed to the first one that appears. The backlog of a topic holds at
/// most `backlog_limit` messages; the oldest are dropped beyond that.
#[derive(Clone)]
pub struct MemoryTransport {
    topics: Arc<Mutex<HashMap<String, Topic>>>,
    closed: Arc<AtomicBool>,
    backlog_limit: usize,
}

impl Default for MemoryTransport {
    fn default() -> Self {
        Self {
            topics: Arc::default(),
            closed: Arc::default(),
            backlog_limit: DEFAULT_BACKLOG_LIMIT,
        }
    }
}

impl MemoryTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_backlog_limit(mut self, limit: usize) -> Self {
        self.backlog_limit = limit;
        self
    }

    /// Refuse further publishes, simulating an unreachable broker.
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    /// Messages waiting for a subscriber on `topic`.
    pub fn backlog(&self, topic: &str) -> usize {
        self.lock().get(topic).map_or(0, |t| t.backlog.len())
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Topic>> {
        self.topics.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn check(&self) -> Result<(), CoreError> {
        if self.closed.load(Ordering::SeqCst) {
            Err(CoreError::Transport(StoreError::Closed))
        } else {
            Ok(())
        }
    }
}

impl AlertTransport for MemoryTransport {
    fn publish(&self, topic: &str, key: Vec<u8>, value: Vec<u8>) -> Result<(), CoreError> {
        self.check()?;
        trace!(target: "drover.alert", topic, key = %String::from_utf8_lossy(&key), "publish");
        self.lock()
            .entry(topic.to_string())
            .or_default()
            .deliver((key, value), self.backlog_limit);
        Ok(())
    }

    fn subscribe(&self, topic: &str) -> Result<Subscription, CoreError> {
        self.check()?;
        let (tx, rx) = mpsc::unbounded_channel();
        let mut topics = self.lock();
        let entry = topics.entry(topic.to_string()).or_default();
        while let Some(msg) = entry.backlog.pop_front() {
            if let Err(mpsc::error::SendError(back)) = tx.send(msg) {
                entry.backlog.push_front(back);
                break;
            }
        }
        entry.subscribers.push(tx);
        Ok(Subscription::new(rx))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn msg(n: u8) -> (Vec<u8>, Vec<u8>) {
        (vec![n], vec![n])
    }

    #[tokio::test]
    async fn backlog_goes_to_first_subscriber() {
        let transport = MemoryTransport::new();
        transport.publish("t", vec![1], vec![1]).unwrap();
        transport.publish("t", vec![2], vec![2]).unwrap();
        assert_eq!(transport.backlog("t"), 2);

        let mut sub = transport.subscribe("t").unwrap();
        assert_eq!(sub.next().await.unwrap(), msg(1));
        assert_eq!(sub.next().await.unwrap(), msg(2));
        assert_eq!(transport.backlog("t"), 0);
    }

    #[tokio::test]
    async fn each_message_reaches_one_subscriber() {
        let transport = MemoryTransport::new();
        let mut a = transport.subscribe("t").unwrap();
        let mut b = transport.subscribe("t").unwrap();
        for n in 0..4 {
            transport.publish("t", vec![n], vec![n]).unwrap();
        }

        assert_eq!(a.next().await.unwrap(), msg(0));
        assert_eq!(b.next().await.unwrap(), msg(1));
        assert_eq!(a.next().await.unwrap(), msg(2));
        assert_eq!(b.next().await.unwrap(), msg(3));
    }

    #[tokio::test]
    async fn dropped_subscriber_is_skipped() {
        let transport = MemoryTransport::new();
        let a = transport.subscribe("t").unwrap();
        let mut b = transport.subscribe("t").unwrap();
        drop(a);

        transport.publish("t", vec![9], vec![9]).unwrap();
        assert_eq!(b.next().await.unwrap(), msg(9));
    }

    #[tokio::test]
    async fn backlog_keeps_newest_within_limit() {
        let transport = MemoryTransport::new().with_backlog_limit(3);
        for n in 0..5 {
            transport.publish("t", vec![n], vec![n]).unwrap();
        }
        assert_eq!(transport.backlog("t"), 3);

        let mut sub = transport.subscribe("t").unwrap();
        assert_eq!(sub.next().await.unwrap(), msg(2));
        assert_eq!(sub.next().await.unwrap(), msg(3));
        assert_eq!(sub.next().await.unwrap(), msg(4));
    }

    #[test]
    fn closed_transport_rejects_publish() {
        let transport = MemoryTransport::new();
        transport.close();
        assert!(matches!(
            transport.publish("t", Vec::new(), Vec::new()),
            Err(CoreError::Transport(StoreError::Closed))
        ));
    }
}
