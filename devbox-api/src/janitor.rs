use devbox_orchestrator::WorkspaceOrchestrator;
use tokio::time::{interval, Duration};
use tracing::{error, info};

/// Periodically stop running workspaces nobody has touched for `idle_for`.
pub async fn start_janitor_task(
    orchestrator: WorkspaceOrchestrator,
    interval_secs: u64,
    idle_for: Duration,
) {
    let mut interval = interval(Duration::from_secs(interval_secs.max(1)));

    info!(
        "Janitor task running (checks every {} seconds, idle limit {}s)",
        interval_secs,
        idle_for.as_secs()
    );

    loop {
        interval.tick().await;

        if let Err(e) = stop_idle_workspaces(&orchestrator, idle_for).await {
            error!("Janitor pass failed: {}", e);
        }
    }
}

/// One janitor pass. Returns how many workspaces were stopped.
pub async fn stop_idle_workspaces(
    orchestrator: &WorkspaceOrchestrator,
    idle_for: Duration,
) -> anyhow::Result<usize> {
    let stopped = orchestrator.stop_idle(idle_for).await?;
    if stopped > 0 {
        info!("Stopped {} idle workspace(s)", stopped);
    }
    Ok(stopped)
}
