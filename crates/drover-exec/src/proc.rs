use std::{
    path::PathBuf,
    process::{ExitStatus, Stdio},
    sync::{Arc, Mutex, PoisonError},
    time::Duration,
};

use async_trait::async_trait;
use drover_core::{ExecError, Workload, WorkloadOutcome};
use drover_model::Task;
use tokio::{
    io::{AsyncRead, AsyncReadExt},
    process::Command,
    task::JoinHandle,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use crate::util::kill_graceful;

/// How long output readers may keep draining after the child is gone.
const DRAIN_TIMEOUT: Duration = Duration::from_millis(500);

#[derive(Clone, Debug)]
pub struct ProcConfig {
    pub program: String,
    /// Leading arguments; the task name follows them.
    pub args: Vec<String>,
    pub env: Vec<(String, String)>,
    pub cwd: Option<PathBuf>,
    /// Time between SIGTERM and a hard kill on cancellation.
    pub kill_grace: Duration,
}

impl Default for ProcConfig {
    fn default() -> Self {
        Self {
            program: "python".to_string(),
            args: vec!["-c".to_string()],
            env: Vec::new(),
            cwd: None,
            kill_grace: Duration::from_secs(1),
        }
    }
}

impl ProcConfig {
    /// `sh -c <task name>`.
    pub fn shell() -> Self {
        Self {
            program: "sh".to_string(),
            ..Self::default()
        }
    }
}

/// Runs `program args... <task name>` and captures stdout and stderr together.
pub struct ProcWorkload {
    name: &'static str,
    cfg: ProcConfig,
}

impl ProcWorkload {
    pub fn new(cfg: ProcConfig) -> Self {
        Self { name: "proc", cfg }
    }

    pub fn with_name(mut self, name: &'static str) -> Self {
        self.name = name;
        self
    }

    fn command(&self, task: &Task) -> Command {
        let mut cmd = Command::new(&self.cfg.program);
        cmd.args(&self.cfg.args).arg(&task.name);
        if let Some(cwd) = &self.cfg.cwd {
            cmd.current_dir(cwd);
        }
        for (k, v) in &self.cfg.env {
            cmd.env(k, v);
        }
        cmd.stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        cmd
    }
}

type Captured = Arc<Mutex<Vec<u8>>>;

fn capture<R>(reader: Option<R>, buf: Captured) -> Option<JoinHandle<()>>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    let mut reader = reader?;
    Some(tokio::spawn(async move {
        let mut chunk = [0u8; 4096];
        loop {
            match reader.read(&mut chunk).await {
                Ok(0) | Err(_) => break,
                Ok(n) => buf
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .extend_from_slice(&chunk[..n]),
            }
        }
    }))
}

async fn drain(readers: Vec<JoinHandle<()>>) {
    for mut reader in readers {
        if tokio::time::timeout(DRAIN_TIMEOUT, &mut reader).await.is_err() {
            // a grandchild still holds the pipe open
            reader.abort();
        }
    }
}

fn classify(status: ExitStatus) -> Result<(), ExecError> {
    if status.success() {
        return Ok(());
    }
    match status.code() {
        Some(code) => Err(ExecError::NonZeroExit { code }),
        None => Err(ExecError::KilledBySignal),
    }
}

#[async_trait]
impl Workload for ProcWorkload {
    fn name(&self) -> &'static str {
        self.name
    }

    async fn run(&self, task: &Task, cancel: CancellationToken) -> WorkloadOutcome {
        trace!(target: "drover.exec.proc", program = %self.cfg.program, task = %task.key(), "spawn");

        let mut child = match self.command(task).spawn() {
            Ok(child) => child,
            Err(e) => {
                warn!(target: "drover.exec.proc", program = %self.cfg.program, error = %e, "spawn failed");
                return WorkloadOutcome::failed(Vec::new(), ExecError::Spawn(e.to_string()));
            }
        };

        let output: Captured = Arc::default();
        let readers: Vec<_> = [
            capture(child.stdout.take(), output.clone()),
            capture(child.stderr.take(), output.clone()),
        ]
        .into_iter()
        .flatten()
        .collect();

        let result = tokio::select! {
            status = child.wait() => match status {
                Ok(status) => {
                    debug!(target: "drover.exec.proc", task = %task.key(), %status, "exited");
                    classify(status)
                }
                Err(e) => Err(ExecError::Io(e.to_string())),
            },
            _ = cancel.cancelled() => {
                debug!(target: "drover.exec.proc", task = %task.key(), "cancelled; killing child");
                if let Err(e) = kill_graceful(&mut child, self.cfg.kill_grace).await {
                    warn!(target: "drover.exec.proc", task = %task.key(), error = %e, "kill failed");
                }
                Err(ExecError::Cancelled)
            }
        };

        drain(readers).await;
        let output = std::mem::take(&mut *output.lock().unwrap_or_else(PoisonError::into_inner));
        WorkloadOutcome { output, result }
    }
}
