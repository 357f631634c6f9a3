//! Integration tests for the idle-stop janitor
//!
//! Tests that a janitor pass stops running workspaces idle past the limit and leaves
//! recently used or already stopped ones alone.

use std::time::Duration;

use devbox_api::janitor::stop_idle_workspaces;
use devbox_orchestrator::test_utils::TestHarness;
use devbox_orchestrator::WorkspaceStatus;

async fn age_workspace(harness: &TestHarness, id: &str, seconds: i64) {
    sqlx::query("UPDATE workspaces SET last_accessed_at = last_accessed_at - ? WHERE id = ?")
        .bind(seconds)
        .bind(id)
        .execute(harness.orchestrator.pool())
        .await
        .expect("Failed to age workspace");
}

#[tokio::test]
async fn test_janitor_stops_idle_workspace() {
    let harness = TestHarness::new().await;
    let workspace = harness
        .orchestrator
        .create_workspace("testuser", "node-hello")
        .await
        .unwrap();
    age_workspace(&harness, &workspace.id, 7200).await;

    let stopped = stop_idle_workspaces(&harness.orchestrator, Duration::from_secs(3600))
        .await
        .unwrap();
    assert_eq!(stopped, 1);

    let workspace = harness
        .orchestrator
        .get_workspace(&workspace.id, "testuser")
        .await
        .unwrap();
    assert_eq!(workspace.status, WorkspaceStatus::Stopped);
    assert!(!harness
        .runtime
        .is_running(workspace.container_ref.as_deref().unwrap()));
}

#[tokio::test]
async fn test_janitor_ignores_recent_workspaces() {
    let harness = TestHarness::new().await;
    let workspace = harness
        .orchestrator
        .create_workspace("testuser", "python-core")
        .await
        .unwrap();

    let stopped = stop_idle_workspaces(&harness.orchestrator, Duration::from_secs(3600))
        .await
        .unwrap();
    assert_eq!(stopped, 0);

    let workspace = harness
        .orchestrator
        .get_workspace(&workspace.id, "testuser")
        .await
        .unwrap();
    assert_eq!(workspace.status, WorkspaceStatus::Running);
}

#[tokio::test]
async fn test_janitor_skips_stopped_workspaces() {
    let harness = TestHarness::new().await;
    let workspace = harness
        .orchestrator
        .create_workspace("testuser", "python-core")
        .await
        .unwrap();
    harness
        .orchestrator
        .stop_workspace(&workspace.id, "testuser")
        .await
        .unwrap();
    age_workspace(&harness, &workspace.id, 7200).await;

    let stopped = stop_idle_workspaces(&harness.orchestrator, Duration::from_secs(3600))
        .await
        .unwrap();
    assert_eq!(stopped, 0);
}

#[tokio::test]
async fn test_file_access_counts_as_activity() {
    let harness = TestHarness::new().await;
    let workspace = harness
        .orchestrator
        .create_workspace("testuser", "python-core")
        .await
        .unwrap();
    age_workspace(&harness, &workspace.id, 7200).await;

    harness
        .orchestrator
        .read_file(&workspace.id, "testuser", "main.py")
        .await
        .unwrap();

    let stopped = stop_idle_workspaces(&harness.orchestrator, Duration::from_secs(3600))
        .await
        .unwrap();
    assert_eq!(stopped, 0);
}
