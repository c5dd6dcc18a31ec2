use std::time::Duration;

use tokio::process::Child;

/// Ask the child to stop, then kill it if it is still alive after `grace`.
pub async fn kill_graceful(child: &mut Child, grace: Duration) -> std::io::Result<()> {
    cfg_if::cfg_if! {
        if #[cfg(unix)] {
            use nix::sys::signal::{Signal, kill};
            use nix::unistd::Pid;

            if let Some(id) = child.id() {
                if let Err(e) = kill(Pid::from_raw(id as i32), Signal::SIGTERM) {
                    tracing::debug!(target: "drover.exec.proc", pid = id, error = %e, "SIGTERM not delivered");
                } else if let Ok(status) = tokio::time::timeout(grace, child.wait()).await {
                    return status.map(|_| ());
                }
            }
        } else {
            let _ = grace;
        }
    }
    child.kill().await
}
