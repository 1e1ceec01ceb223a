use std::time::Duration;

use anyhow::{Result, anyhow};
use tokio::task::JoinHandle;

const STARTUP_STABILIZATION_WINDOW: Duration = Duration::from_millis(300);

/// Health stays BAD unless `task` is still running after the stabilization
/// window.
pub async fn verify_background_task_running(name: &str, task: &mut JoinHandle<()>) -> Result<()> {
    match tokio::time::timeout(STARTUP_STABILIZATION_WINDOW, task).await {
        Err(_) => Ok(()),
        Ok(join_res) => match join_res {
            Ok(()) => Err(anyhow!("{name} exited during startup stabilization window")),
            Err(err) => Err(anyhow!("{name} panicked during startup: {err}")),
        },
    }
}
