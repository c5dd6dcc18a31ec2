//! In-process [`CoordinationStore`].
//!
//! Keeps a bounded change history so watches can start from a recent past
//! revision; older revisions are compacted away. Leases expire on a tokio timer; keepalive streams refresh the
//! deadline at a third of the TTL. Intended for tests and single-process
//! deployments.

use std::{
    collections::{BTreeMap, BTreeSet, HashMap, VecDeque},
    sync::{Arc, Mutex, MutexGuard, PoisonError, Weak},
    time::Duration,
};

use async_trait::async_trait;
use tokio::{sync::mpsc, time::Instant};
use tracing::{debug, trace};

use crate::{
    CoordinationStore, KeepAliveResponse, KeepAliveStream, KeyValue, LeaseId, RangeResponse,
    Revision, StoreError, TxnOutcome, WatchEvent, WatchKind, WatchStream,
};

const MIN_TTL: Duration = Duration::from_millis(1);
const KEEPALIVE_BUFFER: usize = 16;

/// Change events kept for watches that start in the past.
const DEFAULT_HISTORY_LIMIT: usize = 10_000;

struct Lease {
    ttl: Duration,
    deadline: Instant,
    keys: BTreeSet<String>,
}

struct Watcher {
    prefix: String,
    tx: mpsc::UnboundedSender<WatchEvent>,
}

struct State {
    revision: Revision,
    available: bool,
    next_lease: LeaseId,
    kvs: BTreeMap<String, KeyValue>,
    leases: HashMap<LeaseId, Lease>,
    history: VecDeque<WatchEvent>,
    history_limit: usize,
    /// Highest revision discarded from `history`; 0 when nothing was.
    compacted: Revision,
    watchers: Vec<Watcher>,
}

impl State {
    fn new() -> Self {
        Self {
            revision: 1,
            available: true,
            next_lease: 0x1000,
            kvs: BTreeMap::new(),
            leases: HashMap::new(),
            history: VecDeque::new(),
            history_limit: DEFAULT_HISTORY_LIMIT,
            compacted: 0,
            watchers: Vec::new(),
        }
    }

    fn check(&self) -> Result<(), StoreError> {
        if self.available {
            Ok(())
        } else {
            Err(StoreError::Unavailable)
        }
    }

    fn emit(&mut self, event: WatchEvent) {
        let key = &event.kv.key;
        self.watchers
            .retain(|w| !key.starts_with(&w.prefix) || w.tx.send(event.clone()).is_ok());
        self.history.push_back(event);
        if self.history.len() > self.history_limit {
            let excess = self.history.len() - self.history_limit;
            if let Some(last) = self.history.get(excess - 1) {
                let revision = last.revision;
                self.compact(revision);
            }
        }
    }

    /// Discard history up to and including `revision`.
    fn compact(&mut self, revision: Revision) {
        let revision = revision.min(self.revision);
        if revision <= self.compacted {
            return;
        }
        while self.history.front().is_some_and(|e| e.revision <= revision) {
            self.history.pop_front();
        }
        self.compacted = revision;
        trace!(target: "drover.store", revision, kept = self.history.len(), "history compacted");
    }

    fn apply_put(&mut self, key: &str, value: Vec<u8>, lease: Option<LeaseId>) -> Revision {
        self.revision += 1;
        let revision = self.revision;

        let create_revision = match self.kvs.get(key) {
            Some(prev) => {
                if let Some(old) = prev.lease
                    && Some(old) != lease
                    && let Some(l) = self.leases.get_mut(&old)
                {
                    l.keys.remove(key);
                }
                prev.create_revision
            }
            None => revision,
        };
        if let Some(id) = lease
            && let Some(l) = self.leases.get_mut(&id)
        {
            l.keys.insert(key.to_string());
        }

        let kv = KeyValue {
            key: key.to_string(),
            value,
            create_revision,
            mod_revision: revision,
            lease,
        };
        self.kvs.insert(key.to_string(), kv.clone());
        self.emit(WatchEvent {
            kind: WatchKind::Put,
            kv,
            revision,
        });
        revision
    }

    /// Delete every present key in `keys` under one revision.
    fn apply_delete<I>(&mut self, keys: I) -> Vec<KeyValue>
    where
        I: IntoIterator<Item = String>,
    {
        let removed: Vec<KeyValue> = keys
            .into_iter()
            .filter_map(|k| self.kvs.remove(&k))
            .collect();
        if removed.is_empty() {
            return removed;
        }

        self.revision += 1;
        let revision = self.revision;
        for prev in &removed {
            if let Some(id) = prev.lease
                && let Some(l) = self.leases.get_mut(&id)
            {
                l.keys.remove(&prev.key);
            }
            self.emit(WatchEvent {
                kind: WatchKind::Delete,
                kv: KeyValue {
                    key: prev.key.clone(),
                    value: Vec::new(),
                    create_revision: 0,
                    mod_revision: revision,
                    lease: None,
                },
                revision,
            });
        }
        removed
    }

    fn drop_lease(&mut self, id: LeaseId) -> bool {
        match self.leases.remove(&id) {
            Some(lease) => {
                let removed = self.apply_delete(lease.keys);
                debug!(target: "drover.store", lease = id, keys = removed.len(), "lease dropped");
                true
            }
            None => false,
        }
    }
}

struct Inner {
    state: Mutex<State>,
}

impl Inner {
    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Shared handle to an in-process coordination store.
///
/// Clones share the same state.
#[derive(Clone)]
pub struct MemoryStore {
    inner: Arc<Inner>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(State::new()),
            }),
        }
    }

    /// Keep at most `limit` change events for watches that start in the past.
    pub fn with_history_limit(self, limit: usize) -> Self {
        {
            let mut st = self.inner.lock();
            st.history_limit = limit.max(1);
        }
        self
    }

    /// Current store revision.
    pub fn revision(&self) -> Revision {
        self.inner.lock().revision
    }

    /// Highest revision no longer available to new watches.
    pub fn compacted(&self) -> Revision {
        self.inner.lock().compacted
    }

    /// Discard change history up to and including `revision`.
    pub fn compact(&self, revision: Revision) {
        self.inner.lock().compact(revision);
    }

    pub fn lease_exists(&self, lease: LeaseId) -> bool {
        self.inner.lock().leases.contains_key(&lease)
    }

    /// Simulate a partition.
    ///
    /// While unavailable every call fails with [`StoreError::Unavailable`],
    /// open watches end and keepalives stop refreshing, so leases run out.
    pub fn set_available(&self, available: bool) {
        let mut st = self.inner.lock();
        st.available = available;
        if !available {
            st.watchers.clear();
        }
        debug!(target: "drover.store", available, "availability changed");
    }

    fn spawn_expiry(&self, id: LeaseId, deadline: Instant) {
        let weak: Weak<Inner> = Arc::downgrade(&self.inner);
        tokio::spawn(async move {
            let mut deadline = deadline;
            loop {
                tokio::time::sleep_until(deadline).await;
                let Some(inner) = weak.upgrade() else {
                    return;
                };
                let mut st = inner.lock();
                let expired = match st.leases.get(&id) {
                    None => return,
                    Some(lease) if lease.deadline > Instant::now() => {
                        deadline = lease.deadline;
                        false
                    }
                    Some(_) => true,
                };
                if expired {
                    trace!(target: "drover.store", lease = id, "lease expired");
                    st.drop_lease(id);
                    return;
                }
            }
        });
    }

    fn spawn_keepalive(&self, id: LeaseId, ttl: Duration, tx: mpsc::Sender<KeepAliveResponse>) {
        let weak: Weak<Inner> = Arc::downgrade(&self.inner);
        let period = (ttl / 3).max(MIN_TTL);
        tokio::spawn(async move {
            let mut tick = tokio::time::interval(period);
            tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = tick.tick() => {}
                    _ = tx.closed() => return,
                }
                let Some(inner) = weak.upgrade() else {
                    return;
                };
                let response = {
                    let mut st = inner.lock();
                    let available = st.available;
                    let Some(lease) = st.leases.get_mut(&id) else {
                        return;
                    };
                    if !available {
                        None
                    } else {
                        lease.deadline = Instant::now() + lease.ttl;
                        Some(KeepAliveResponse {
                            lease: id,
                            ttl: lease.ttl,
                        })
                    }
                };
                if let Some(resp) = response
                    && let Err(mpsc::error::TrySendError::Closed(_)) = tx.try_send(resp)
                {
                    return;
                }
            }
        });
    }
}

#[async_trait]
impl CoordinationStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<KeyValue>, StoreError> {
        let st = self.inner.lock();
        st.check()?;
        Ok(st.kvs.get(key).cloned())
    }

    async fn get_prefix(&self, prefix: &str) -> Result<RangeResponse, StoreError> {
        let st = self.inner.lock();
        st.check()?;
        let kvs = st
            .kvs
            .range(prefix.to_string()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(_, kv)| kv.clone())
            .collect();
        Ok(RangeResponse {
            revision: st.revision,
            kvs,
        })
    }

    async fn put(
        &self,
        key: &str,
        value: Vec<u8>,
        lease: Option<LeaseId>,
    ) -> Result<Revision, StoreError> {
        let mut st = self.inner.lock();
        st.check()?;
        if let Some(id) = lease
            && !st.leases.contains_key(&id)
        {
            return Err(StoreError::LeaseNotFound(id));
        }
        Ok(st.apply_put(key, value, lease))
    }

    async fn delete(&self, key: &str) -> Result<Option<KeyValue>, StoreError> {
        let mut st = self.inner.lock();
        st.check()?;
        Ok(st.apply_delete([key.to_string()]).pop())
    }

    async fn put_if_absent(
        &self,
        key: &str,
        value: Vec<u8>,
        lease: LeaseId,
    ) -> Result<TxnOutcome, StoreError> {
        let mut st = self.inner.lock();
        st.check()?;
        if !st.leases.contains_key(&lease) {
            return Err(StoreError::LeaseNotFound(lease));
        }
        if let Some(existing) = st.kvs.get(key) {
            return Ok(TxnOutcome::Existing(existing.clone()));
        }
        let revision = st.apply_put(key, value, Some(lease));
        Ok(TxnOutcome::Created { revision })
    }

    async fn watch_prefix(
        &self,
        prefix: &str,
        start_revision: Revision,
    ) -> Result<WatchStream, StoreError> {
        let mut st = self.inner.lock();
        st.check()?;
        if st.compacted > 0 && start_revision <= st.compacted {
            return Err(StoreError::Compacted {
                requested: start_revision,
                compacted: st.compacted,
            });
        }
        let (tx, rx) = mpsc::unbounded_channel();
        for event in st
            .history
            .iter()
            .filter(|e| e.revision >= start_revision && e.kv.key.starts_with(prefix))
        {
            if tx.send(event.clone()).is_err() {
                break;
            }
        }
        st.watchers.push(Watcher {
            prefix: prefix.to_string(),
            tx,
        });
        Ok(WatchStream::new(rx))
    }

    async fn grant(&self, ttl: Duration) -> Result<LeaseId, StoreError> {
        let ttl = ttl.max(MIN_TTL);
        let (id, deadline) = {
            let mut st = self.inner.lock();
            st.check()?;
            let id = st.next_lease;
            st.next_lease += 1;
            let deadline = Instant::now() + ttl;
            st.leases.insert(
                id,
                Lease {
                    ttl,
                    deadline,
                    keys: BTreeSet::new(),
                },
            );
            (id, deadline)
        };
        self.spawn_expiry(id, deadline);
        Ok(id)
    }

    async fn keep_alive(&self, lease: LeaseId) -> Result<KeepAliveStream, StoreError> {
        let ttl = {
            let st = self.inner.lock();
            st.check()?;
            st.leases
                .get(&lease)
                .map(|l| l.ttl)
                .ok_or(StoreError::LeaseNotFound(lease))?
        };
        let (tx, rx) = mpsc::channel(KEEPALIVE_BUFFER);
        self.spawn_keepalive(lease, ttl, tx);
        Ok(KeepAliveStream::new(rx))
    }

    async fn revoke(&self, lease: LeaseId) -> Result<(), StoreError> {
        let mut st = self.inner.lock();
        st.check()?;
        if st.drop_lease(lease) {
            Ok(())
        } else {
            Err(StoreError::LeaseNotFound(lease))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SHORT: Duration = Duration::from_millis(60);

    #[tokio::test]
    async fn put_advances_revision_and_keeps_create_revision() {
        let store = MemoryStore::new();
        assert_eq!(store.revision(), 1);

        let r1 = store.put("/a", b"1".to_vec(), None).await.unwrap();
        let r2 = store.put("/a", b"2".to_vec(), None).await.unwrap();
        assert_eq!((r1, r2), (2, 3));

        let kv = store.get("/a").await.unwrap().unwrap();
        assert_eq!(kv.value, b"2");
        assert_eq!(kv.create_revision, 2);
        assert_eq!(kv.mod_revision, 3);
    }

    #[tokio::test]
    async fn delete_missing_key_does_not_advance() {
        let store = MemoryStore::new();
        assert!(store.delete("/nope").await.unwrap().is_none());
        assert_eq!(store.revision(), 1);

        store.put("/a", b"x".to_vec(), None).await.unwrap();
        let prev = store.delete("/a").await.unwrap().unwrap();
        assert_eq!(prev.value, b"x");
        assert_eq!(store.revision(), 3);
    }

    #[tokio::test]
    async fn prefix_read_is_ordered_and_bounded() {
        let store = MemoryStore::new();
        for k in ["/t/b", "/t/a", "/u/a", "/t"] {
            store.put(k, Vec::new(), None).await.unwrap();
        }
        let resp = store.get_prefix("/t/").await.unwrap();
        let keys: Vec<_> = resp.kvs.iter().map(|kv| kv.key.as_str()).collect();
        assert_eq!(keys, ["/t/a", "/t/b"]);
        assert_eq!(resp.revision, 5);
    }

    #[tokio::test]
    async fn put_if_absent_creates_once() {
        let store = MemoryStore::new();
        let a = store.grant(Duration::from_secs(5)).await.unwrap();
        let b = store.grant(Duration::from_secs(5)).await.unwrap();

        let first = store.put_if_absent("/lock/x", b"a".to_vec(), a).await.unwrap();
        assert!(first.succeeded());

        match store.put_if_absent("/lock/x", b"b".to_vec(), b).await.unwrap() {
            TxnOutcome::Existing(kv) => {
                assert_eq!(kv.value, b"a");
                assert_eq!(kv.lease, Some(a));
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[tokio::test]
    async fn put_if_absent_requires_live_lease() {
        let store = MemoryStore::new();
        let err = store.put_if_absent("/k", Vec::new(), 42).await.unwrap_err();
        assert_eq!(err, StoreError::LeaseNotFound(42));
    }

    #[tokio::test]
    async fn lease_expiry_removes_attached_keys() {
        let store = MemoryStore::new();
        let lease = store.grant(SHORT).await.unwrap();
        store.put("/w/a", Vec::new(), Some(lease)).await.unwrap();
        store.put("/w/b", Vec::new(), Some(lease)).await.unwrap();
        let before = store.revision();

        tokio::time::sleep(SHORT * 3).await;
        assert!(!store.lease_exists(lease));
        assert!(store.get_prefix("/w/").await.unwrap().kvs.is_empty());
        assert_eq!(store.revision(), before + 1);
    }

    #[tokio::test]
    async fn keepalive_extends_until_dropped() {
        let store = MemoryStore::new();
        let lease = store.grant(SHORT).await.unwrap();
        store.put("/k", Vec::new(), Some(lease)).await.unwrap();

        let mut ka = store.keep_alive(lease).await.unwrap();
        assert_eq!(ka.next().await.unwrap().lease, lease);
        tokio::time::sleep(SHORT * 3).await;
        assert!(store.get("/k").await.unwrap().is_some());

        drop(ka);
        tokio::time::sleep(SHORT * 3).await;
        assert!(store.get("/k").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn keepalive_stream_closes_when_store_unreachable() {
        let store = MemoryStore::new();
        let lease = store.grant(SHORT).await.unwrap();
        let mut ka = store.keep_alive(lease).await.unwrap();
        assert!(ka.next().await.is_some());

        store.set_available(false);
        let closed = tokio::time::timeout(SHORT * 10, async {
            while ka.next().await.is_some() {}
        })
        .await;
        assert!(closed.is_ok());
        assert!(!store.lease_exists(lease));
    }

    #[tokio::test]
    async fn revoke_deletes_under_one_revision() {
        let store = MemoryStore::new();
        let lease = store.grant(Duration::from_secs(5)).await.unwrap();
        store.put("/a", Vec::new(), Some(lease)).await.unwrap();
        store.put("/b", Vec::new(), Some(lease)).await.unwrap();

        let mut watch = store.watch_prefix("/", store.revision() + 1).await.unwrap();
        store.revoke(lease).await.unwrap();

        let first = watch.next().await.unwrap();
        let second = watch.next().await.unwrap();
        assert_eq!(first.kind, WatchKind::Delete);
        assert_eq!(first.revision, second.revision);
        assert_eq!(
            store.revoke(lease).await.unwrap_err(),
            StoreError::LeaseNotFound(lease)
        );
    }

    #[tokio::test]
    async fn watch_replays_from_revision_then_follows() {
        let store = MemoryStore::new();
        store.put("/t/a", b"1".to_vec(), None).await.unwrap();
        let snapshot = store.get_prefix("/t/").await.unwrap();
        store.put("/t/b", b"2".to_vec(), None).await.unwrap();
        store.put("/x/ignored", Vec::new(), None).await.unwrap();

        let mut watch = store
            .watch_prefix("/t/", snapshot.revision + 1)
            .await
            .unwrap();
        store.delete("/t/a").await.unwrap();

        let ev = watch.next().await.unwrap();
        assert_eq!((ev.kind, ev.kv.key.as_str()), (WatchKind::Put, "/t/b"));
        let ev = watch.next().await.unwrap();
        assert_eq!((ev.kind, ev.kv.key.as_str()), (WatchKind::Delete, "/t/a"));
    }

    #[tokio::test]
    async fn history_is_bounded_and_old_starts_are_compacted() {
        let store = MemoryStore::new().with_history_limit(3);
        for n in 0..5u8 {
            store.put("/t/a", vec![n], None).await.unwrap();
        }
        // revisions 2..=6 written, 4..=6 kept
        assert_eq!(store.compacted(), 3);

        let err = store.watch_prefix("/t/", 2).await.unwrap_err();
        assert_eq!(
            err,
            StoreError::Compacted {
                requested: 2,
                compacted: 3
            }
        );

        let mut watch = store.watch_prefix("/t/", 4).await.unwrap();
        let values: Vec<u8> = [
            watch.next().await.unwrap(),
            watch.next().await.unwrap(),
            watch.next().await.unwrap(),
        ]
        .iter()
        .map(|ev| ev.kv.value[0])
        .collect();
        assert_eq!(values, [2, 3, 4]);
    }

    #[tokio::test]
    async fn explicit_compaction_keeps_live_watchers() {
        let store = MemoryStore::new();
        let mut live = store.watch_prefix("/t/", 1).await.unwrap();
        store.put("/t/a", b"1".to_vec(), None).await.unwrap();
        store.put("/t/b", b"2".to_vec(), None).await.unwrap();

        store.compact(store.revision());
        assert_eq!(store.compacted(), 3);
        assert!(store.watch_prefix("/t/", 3).await.is_err());
        let mut fresh = store.watch_prefix("/t/", 4).await.unwrap();

        store.put("/t/c", b"3".to_vec(), None).await.unwrap();
        assert_eq!(live.next().await.unwrap().kv.key, "/t/a");
        assert_eq!(live.next().await.unwrap().kv.key, "/t/b");
        assert_eq!(live.next().await.unwrap().kv.key, "/t/c");
        assert_eq!(fresh.next().await.unwrap().kv.key, "/t/c");
    }

    #[tokio::test]
    async fn unavailable_store_ends_watches_and_rejects_calls() {
        let store = MemoryStore::new();
        let mut watch = store.watch_prefix("/", 1).await.unwrap();
        store.set_available(false);

        assert!(watch.next().await.is_none());
        assert_eq!(
            store.get("/a").await.unwrap_err(),
            StoreError::Unavailable
        );

        store.set_available(true);
        assert!(store.get("/a").await.unwrap().is_none());
    }
}
