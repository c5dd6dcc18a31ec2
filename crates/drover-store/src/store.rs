use std::time::Duration;

use async_trait::async_trait;

use crate::{
    KeepAliveStream, KeyValue, LeaseId, RangeResponse, Revision, StoreError, TxnOutcome,
    WatchStream,
};

/// Linearizable key-value store with revisions, watches and leases.
///
/// Implementations must guarantee:
/// - every mutation advances the revision by exactly one;
/// - watch streams deliver changes in revision order;
/// - keys bound to a lease disappear when the lease expires or is revoked.
#[async_trait]
pub trait CoordinationStore: Send + Sync + 'static {
    async fn get(&self, key: &str) -> Result<Option<KeyValue>, StoreError>;

    /// Read every key starting with `prefix`, ordered by key.
    async fn get_prefix(&self, prefix: &str) -> Result<RangeResponse, StoreError>;

    /// Unconditional write, optionally bound to a lease.
    async fn put(
        &self,
        key: &str,
        value: Vec<u8>,
        lease: Option<LeaseId>,
    ) -> Result<Revision, StoreError>;

    /// Delete a key, returning its previous value if it existed.
    async fn delete(&self, key: &str) -> Result<Option<KeyValue>, StoreError>;

    /// `If create_revision(key) == 0 Then put(key, value, lease) Else get(key)`.
    async fn put_if_absent(
        &self,
        key: &str,
        value: Vec<u8>,
        lease: LeaseId,
    ) -> Result<TxnOutcome, StoreError>;

    /// Watch every key under `prefix`, starting at `start_revision` (inclusive).
    ///
    /// Fails with [`StoreError::Compacted`](crate::StoreError::Compacted)
    /// when history at `start_revision` has already been discarded.
    async fn watch_prefix(
        &self,
        prefix: &str,
        start_revision: Revision,
    ) -> Result<WatchStream, StoreError>;

    async fn grant(&self, ttl: Duration) -> Result<LeaseId, StoreError>;

    /// Start renewing `lease`; renewal stops when the stream is dropped.
    async fn keep_alive(&self, lease: LeaseId) -> Result<KeepAliveStream, StoreError>;

    async fn revoke(&self, lease: LeaseId) -> Result<(), StoreError>;
}
