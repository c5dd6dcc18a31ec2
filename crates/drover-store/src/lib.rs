//! Coordination store contract used by every drover component.
//!
//! [`CoordinationStore`] is the narrow surface the engine needs from a
//! linearizable key-value store: point and prefix reads, plain writes, a
//! create-if-absent transaction, revision-ordered prefix watches and TTL
//! leases with keepalive streams. [`MemoryStore`] implements it in-process.

mod error;
pub use error::StoreError;

mod types;
pub use types::{
    KeepAliveResponse, KeepAliveStream, KeyValue, LeaseId, RangeResponse, Revision, TxnOutcome,
    WatchEvent, WatchKind, WatchStream,
};

mod store;
pub use store::CoordinationStore;

mod memory;
pub use memory::MemoryStore;
