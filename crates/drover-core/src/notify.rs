use drover_model::{Layout, Task};
use tracing::trace;

use crate::{CoreError, coord::StoreHandle};

/// Publishes terminal task outcomes into the finish/fail directories.
///
/// The stored value is the task definition; a control-plane caller waiting
/// on a task watches exactly those two keys.
#[derive(Clone)]
pub struct Notifier {
    store: StoreHandle,
    layout: Layout,
}

impl Notifier {
    pub fn new(store: StoreHandle, layout: Layout) -> Self {
        Self { store, layout }
    }

    pub async fn finished(&self, task: &Task) -> Result<(), CoreError> {
        self.put(self.layout.finish_key(&task.key()), task).await
    }

    pub async fn failed(&self, task: &Task) -> Result<(), CoreError> {
        self.put(self.layout.fail_key(&task.key()), task).await
    }

    async fn put(&self, key: String, task: &Task) -> Result<(), CoreError> {
        let value = serde_json::to_vec(task)?;
        let revision = self.store.put(&key, value, None).await?;
        trace!(target: "drover.notify", key = %key, revision, "outcome published");
        Ok(())
    }
}
