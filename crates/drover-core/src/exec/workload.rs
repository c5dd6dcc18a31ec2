use async_trait::async_trait;
use drover_model::Task;
use tokio_util::sync::CancellationToken;

use crate::ExecError;

/// What a workload hands back: whatever output it produced and how it ended.
#[derive(Debug, Clone)]
pub struct WorkloadOutcome {
    pub output: Vec<u8>,
    pub result: Result<(), ExecError>,
}

impl WorkloadOutcome {
    pub fn ok(output: impl Into<Vec<u8>>) -> Self {
        Self {
            output: output.into(),
            result: Ok(()),
        }
    }

    pub fn failed(output: impl Into<Vec<u8>>, error: ExecError) -> Self {
        Self {
            output: output.into(),
            result: Err(error),
        }
    }
}

/// Runs the external program behind a task.
///
/// Implementations must stop promptly once `cancel` fires and report
/// [`ExecError::Cancelled`] in that case.
#[async_trait]
pub trait Workload: Send + Sync + 'static {
    fn name(&self) -> &'static str;

    async fn run(&self, task: &Task, cancel: CancellationToken) -> WorkloadOutcome;
}
