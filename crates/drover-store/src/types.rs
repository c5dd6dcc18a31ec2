use std::time::Duration;

use tokio::sync::mpsc;

/// Monotonic store revision; advanced by every mutation.
pub type Revision = u64;

/// Lease identifier handed out by [`grant`](crate::CoordinationStore::grant).
pub type LeaseId = u64;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyValue {
    pub key: String,
    pub value: Vec<u8>,
    /// Revision at which the key was created (`0` is never observed for a live key).
    pub create_revision: Revision,
    pub mod_revision: Revision,
    pub lease: Option<LeaseId>,
}

/// Result of a prefix read, stamped with the store revision it was served at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RangeResponse {
    pub revision: Revision,
    pub kvs: Vec<KeyValue>,
}

/// Outcome of the create-if-absent transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TxnOutcome {
    /// The key did not exist and is now bound to the caller's lease.
    Created { revision: Revision },
    /// The key already existed; carries its current value.
    Existing(KeyValue),
}

impl TxnOutcome {
    pub fn succeeded(&self) -> bool {
        matches!(self, TxnOutcome::Created { .. })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchKind {
    Put,
    Delete,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchEvent {
    pub kind: WatchKind,
    /// For deletes only `key` and `mod_revision` are meaningful.
    pub kv: KeyValue,
    pub revision: Revision,
}

/// Ordered change stream for a key prefix.
///
/// Ends (`next()` returns `None`) when the store drops the watcher, e.g.
/// because it became unreachable; callers are expected to resynchronise.
#[derive(Debug)]
pub struct WatchStream {
    rx: mpsc::UnboundedReceiver<WatchEvent>,
}

impl WatchStream {
    pub fn new(rx: mpsc::UnboundedReceiver<WatchEvent>) -> Self {
        Self { rx }
    }

    pub async fn next(&mut self) -> Option<WatchEvent> {
        self.rx.recv().await
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeepAliveResponse {
    pub lease: LeaseId,
    pub ttl: Duration,
}

/// Renewal acknowledgements for one lease.
///
/// Closes when the store stops honouring keepalives (lease expired or
/// revoked, store unreachable). Dropping the stream stops renewal.
#[derive(Debug)]
pub struct KeepAliveStream {
    rx: mpsc::Receiver<KeepAliveResponse>,
}

impl KeepAliveStream {
    pub fn new(rx: mpsc::Receiver<KeepAliveResponse>) -> Self {
        Self { rx }
    }

    pub async fn next(&mut self) -> Option<KeepAliveResponse> {
        self.rx.recv().await
    }
}
