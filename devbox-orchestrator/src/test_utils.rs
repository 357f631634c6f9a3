use std::sync::Arc;
use std::time::Duration;

use devbox_runtime::mock::MockRuntime;
use sqlx::SqlitePool;
use tempfile::TempDir;

use crate::config::OrchestratorConfig;
use crate::orchestrator::WorkspaceOrchestrator;
use crate::template::TemplateRegistry;

/// Helper to create an in-memory test database with migrations applied
pub async fn create_test_db() -> SqlitePool {
    // A single connection, otherwise every pooled connection gets its own empty database
    let pool = sqlx::sqlite::SqlitePoolOptions::new()
        .max_connections(1)
        .idle_timeout(None)
        .max_lifetime(None)
        .connect("sqlite::memory:")
        .await
        .expect("Failed to create in-memory database");

    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .expect("Failed to run migrations");

    pool
}

/// Orchestrator wired to a [`MockRuntime`] and a temporary workspaces root.
pub struct TestHarness {
    pub orchestrator: WorkspaceOrchestrator,
    pub runtime: Arc<MockRuntime>,
    pub root: TempDir,
}

impl TestHarness {
    pub async fn new() -> Self {
        let root = tempfile::tempdir().expect("Failed to create temp dir");
        let config = OrchestratorConfig {
            setup_timeout: Duration::from_secs(5),
            daemon_timeout: Duration::from_secs(5),
            stop_grace: Duration::from_secs(1),
            ..OrchestratorConfig::with_root(root.path())
        };
        Self::with_config(root, config).await
    }

    pub async fn with_config(root: TempDir, config: OrchestratorConfig) -> Self {
        let pool = create_test_db().await;
        let runtime = Arc::new(MockRuntime::new());
        let templates =
            Arc::new(TemplateRegistry::embedded().expect("Embedded templates must parse"));
        let orchestrator = WorkspaceOrchestrator::new(pool, runtime.clone(), templates, config);

        Self {
            orchestrator,
            runtime,
            root,
        }
    }
}
