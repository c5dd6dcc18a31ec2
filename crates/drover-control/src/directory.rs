use drover_core::StoreHandle;

use crate::ControlError;

/// Read-only view of the worker membership directory.
#[derive(Clone)]
pub struct WorkerDirectory {
    store: StoreHandle,
    prefix: String,
}

impl WorkerDirectory {
    pub fn new(store: StoreHandle, prefix: impl Into<String>) -> Self {
        Self {
            store,
            prefix: prefix.into(),
        }
    }

    /// Identities of every worker whose registration lease is alive.
    pub async fn list(&self) -> Result<Vec<String>, ControlError> {
        let snap = self.store.get_prefix(&self.prefix).await?;
        Ok(snap
            .kvs
            .into_iter()
            .filter_map(|kv| kv.key.strip_prefix(self.prefix.as_str()).map(str::to_string))
            .collect())
    }
}
