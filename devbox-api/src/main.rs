use std::sync::Arc;

use anyhow::{Context, Result};
use devbox_api::{create_app, start_janitor_task, Config};
use devbox_orchestrator::db::{backup_database, create_pool, run_migrations};
use devbox_orchestrator::{TemplateRegistry, WorkspaceOrchestrator};
use devbox_runtime::DockerRuntime;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new(
                "devbox_api=debug,devbox_orchestrator=debug,devbox_runtime=info,tower_http=debug",
            )
        }))
        .init();

    info!("Starting devbox-api service...");

    // Load configuration
    let config = Config::from_env();
    info!(
        "Configuration loaded: bind_addr={}, db_path={}, workspaces_root={}",
        config.bind_addr,
        config.db_path.display(),
        config.workspaces_root.display()
    );

    // Backup before migrations
    let db_path = &config.db_path;
    if db_path.exists() {
        let backup_path = backup_database(db_path)?;
        info!("Database backed up to: {}", backup_path.display());
    }

    // Create pool and run migrations
    let pool = create_pool(db_path).await?;
    info!("Running database migrations...");
    run_migrations(&pool).await?;
    info!("Migrations complete");

    let templates = TemplateRegistry::load(config.templates_dir.as_deref())?;
    info!("Loaded {} templates", templates.len());

    // Refuse to start without a daemon rather than failing every request later
    let runtime = DockerRuntime::connect_with_timeout(config.daemon_timeout())
        .await
        .context("Container daemon is not reachable")?;

    std::fs::create_dir_all(&config.workspaces_root).with_context(|| {
        format!(
            "Failed to create workspaces root {}",
            config.workspaces_root.display()
        )
    })?;

    let orchestrator = WorkspaceOrchestrator::new(
        pool,
        Arc::new(runtime),
        Arc::new(templates),
        config.orchestrator_config(),
    );

    // Start janitor task
    match config.idle_stop() {
        Some(idle_for) => {
            tokio::spawn(start_janitor_task(
                orchestrator.clone(),
                config.janitor_interval_secs,
                idle_for,
            ));
            info!(
                "Janitor task started (interval: {}s)",
                config.janitor_interval_secs
            );
        }
        None => warn!("DEVBOX_IDLE_STOP_SECS not set, idle workspaces keep running"),
    }

    let app = create_app(orchestrator);

    // Start server
    let listener = tokio::net::TcpListener::bind(&config.bind_addr).await?;
    info!("Listening on http://{}", config.bind_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutting down");
}
