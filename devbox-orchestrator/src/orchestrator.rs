//! The operation surface consumed by the HTTP service, janitor and tests.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use devbox_runtime::{ContainerRuntime, Transition};
use sqlx::SqlitePool;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::config::{validate_owner_id, OrchestratorConfig};
use crate::error::{OrchestratorError, Result};
use crate::fs_gateway::{FileNode, WorkspaceFs};
use crate::lifecycle::ContainerLifecycle;
use crate::locks::WorkspaceLocks;
use crate::operation::{Operation, OperationType};
use crate::preview::{self, PreviewPolicy, PreviewStatus};
use crate::reconcile::Reconciler;
use crate::store::{NewWorkspace, WorkspaceStore};
use crate::template::TemplateRegistry;
use crate::workspace::{StateCommit, Workspace, WorkspaceFilters};

#[derive(Clone)]
pub struct WorkspaceOrchestrator {
    store: WorkspaceStore,
    templates: Arc<TemplateRegistry>,
    config: Arc<OrchestratorConfig>,
    lifecycle: ContainerLifecycle,
    reconciler: Reconciler,
    locks: WorkspaceLocks,
}

impl WorkspaceOrchestrator {
    pub fn new(
        pool: SqlitePool,
        runtime: Arc<dyn ContainerRuntime>,
        templates: Arc<TemplateRegistry>,
        config: OrchestratorConfig,
    ) -> Self {
        let store = WorkspaceStore::new(pool);
        let config = Arc::new(config);
        let lifecycle = ContainerLifecycle::new(runtime, config.clone());
        let reconciler = Reconciler::new(store.clone(), lifecycle.clone(), templates.clone());

        Self {
            store,
            templates,
            config,
            lifecycle,
            reconciler,
            locks: WorkspaceLocks::new(),
        }
    }

    /// Get a reference to the database pool
    pub fn pool(&self) -> &SqlitePool {
        self.store.pool()
    }

    pub fn templates(&self) -> &TemplateRegistry {
        &self.templates
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    /// Run `work` as a logged operation of `workspace_id`.
    async fn tracked<T, F>(&self, workspace_id: &str, kind: OperationType, work: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        let operation_id = self.store.record_operation(workspace_id, kind).await?;
        let result = work.await;

        let error = result.as_ref().err().map(|e| e.to_string());
        if let Err(e) = self
            .store
            .complete_operation(&operation_id, error.as_deref())
            .await
        {
            warn!(operation_id = %operation_id, error = %e, "Failed to close operation record");
        }

        result
    }

    /// Create a workspace from a template and bring its container up.
    ///
    /// On failure the record stays behind with `status = error`; `ensure_running` retries.
    #[instrument(skip(self))]
    pub async fn create_workspace(&self, owner_id: &str, template_id: &str) -> Result<Workspace> {
        validate_owner_id(owner_id)?;
        let template = self.templates.require(template_id)?;

        let id = Uuid::new_v4().to_string();
        let root = self.config.workspace_dir(owner_id, &id);
        // Held from before the insert so no reconcile can see the bare record
        let _guard = self.locks.acquire(&id).await;
        let workspace = self
            .store
            .insert(&NewWorkspace {
                id: id.clone(),
                owner_id: owner_id.to_string(),
                template_id: template.id.clone(),
                root_path: root.to_string_lossy().into_owned(),
            })
            .await?;

        self.tracked(&id, OperationType::Create, async {
            let fs = WorkspaceFs::new(&root);
            let files = template.seed_files.clone();
            let seeded = blocking(move || fs.write_files(&files)).await;
            if let Err(e) = seeded {
                self.store
                    .commit_observation(&id, &StateCommit::failed(e.to_string()))
                    .await?;
                return Err(OrchestratorError::Provision {
                    workspace_id: id.clone(),
                    reason: e.to_string(),
                });
            }

            self.reconciler.provision(&workspace, &template).await
        })
        .await
    }

    pub async fn get_workspace(&self, id: &str, owner_id: &str) -> Result<Workspace> {
        self.store.get_owned(id, owner_id).await
    }

    pub async fn list_workspaces(&self, owner_id: &str) -> Result<Vec<Workspace>> {
        self.store
            .list(&WorkspaceFilters {
                owner_id: Some(owner_id.to_string()),
                status: None,
            })
            .await
    }

    #[instrument(skip(self))]
    pub async fn start_workspace(&self, id: &str, owner_id: &str) -> Result<Workspace> {
        self.reconcile(id, owner_id, OperationType::Start).await
    }

    /// Converge on running: provision, recreate, unpause or start as observed.
    #[instrument(skip(self))]
    pub async fn ensure_running(&self, id: &str, owner_id: &str) -> Result<Workspace> {
        self.reconcile(id, owner_id, OperationType::Ensure).await
    }

    async fn reconcile(&self, id: &str, owner_id: &str, kind: OperationType) -> Result<Workspace> {
        let _guard = self.locks.acquire(id).await;
        // Re-read under the lock; a concurrent caller may have healed it already
        let workspace = self.store.get_owned(id, owner_id).await?;
        self.store.touch(id).await?;

        self.tracked(id, kind, self.reconciler.ensure_running(&workspace))
            .await
    }

    #[instrument(skip(self))]
    pub async fn stop_workspace(&self, id: &str, owner_id: &str) -> Result<Workspace> {
        let _guard = self.locks.acquire(id).await;
        let workspace = self.store.get_owned(id, owner_id).await?;

        self.tracked(id, OperationType::Stop, self.reconciler.stop(&workspace))
            .await
    }

    /// Stop and remove the container, delete the record and the host directory.
    #[instrument(skip(self))]
    pub async fn delete_workspace(&self, id: &str, owner_id: &str) -> Result<()> {
        let _guard = self.locks.acquire(id).await;
        let workspace = self.store.get_owned(id, owner_id).await?;

        self.tracked(id, OperationType::Delete, async {
            if let Some(container) = workspace.container_ref.as_deref() {
                if self.lifecycle.stop(container).await? == Transition::Missing {
                    info!(container = %container, "Container already gone");
                } else {
                    self.lifecycle.remove(container).await?;
                }
                self.store
                    .commit_observation(id, &StateCommit::stopped(None))
                    .await?;
            }

            let root = std::path::PathBuf::from(&workspace.root_path);
            let removed = blocking(move || match std::fs::remove_dir_all(&root) {
                Ok(()) => Ok(()),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
                Err(e) => Err(OrchestratorError::Storage { path: root, source: e }),
            })
            .await;
            removed?;

            self.store.delete(id).await?;
            info!("Workspace deleted");
            Ok(())
        })
        .await
    }

    pub async fn operations(&self, id: &str, owner_id: &str) -> Result<Vec<Operation>> {
        self.store.get_owned(id, owner_id).await?;
        self.store.operations(id).await
    }

    /// Stop running workspaces idle for longer than `idle_for`. Returns how many were stopped.
    pub async fn stop_idle(&self, idle_for: Duration) -> Result<usize> {
        let idle_for = chrono::Duration::from_std(idle_for)
            .map_err(|e| OrchestratorError::InvalidInput(e.to_string()))?;
        let cutoff = Utc::now() - idle_for;
        let idle = self.store.idle_running(cutoff).await?;

        let mut stopped = 0;
        for workspace in idle {
            match self.stop_workspace(&workspace.id, &workspace.owner_id).await {
                Ok(_) => {
                    info!(workspace_id = %workspace.id, "Stopped idle workspace");
                    stopped += 1;
                }
                Err(e) => warn!(workspace_id = %workspace.id, error = %e, "Failed to stop idle workspace"),
            }
        }
        Ok(stopped)
    }

    /// One probe of the workspace's published port.
    pub async fn preview(&self, id: &str, owner_id: &str) -> Result<PreviewStatus> {
        let workspace = self.store.get_owned(id, owner_id).await?;
        Ok(self.probe(&workspace, None).await)
    }

    /// Poll the published port per `policy`.
    pub async fn wait_for_preview(
        &self,
        id: &str,
        owner_id: &str,
        policy: PreviewPolicy,
    ) -> Result<PreviewStatus> {
        let workspace = self.store.get_owned(id, owner_id).await?;
        Ok(self.probe(&workspace, Some(policy)).await)
    }

    async fn probe(&self, workspace: &Workspace, policy: Option<PreviewPolicy>) -> PreviewStatus {
        let has_port = self
            .templates
            .get(&workspace.template_id)
            .is_some_and(|t| t.port.is_some());
        if !has_port {
            return PreviewStatus::NotApplicable;
        }
        let Some(port) = workspace.public_port else {
            return PreviewStatus::Pending;
        };
        let host = &self.config.preview_host;
        match policy {
            Some(policy) => preview::wait_for_port(host, port, policy).await,
            None => preview::probe_port(host, port).await,
        }
    }

    // File operations

    async fn with_fs<T, F>(&self, id: &str, owner_id: &str, op: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(WorkspaceFs) -> Result<T> + Send + 'static,
    {
        // Serialized with delete_workspace so no edit outlives the removed tree
        let _guard = self.locks.acquire(id).await;
        let workspace = self.store.get_owned(id, owner_id).await?;
        self.store.touch(id).await?;
        let fs = WorkspaceFs::new(&workspace.root_path);
        blocking(move || op(fs)).await
    }

    pub async fn list_files(&self, id: &str, owner_id: &str, path: &str) -> Result<Vec<FileNode>> {
        let path = path.to_string();
        self.with_fs(id, owner_id, move |fs| fs.list(&path)).await
    }

    pub async fn file_tree(&self, id: &str, owner_id: &str, path: &str) -> Result<FileNode> {
        let path = path.to_string();
        self.with_fs(id, owner_id, move |fs| fs.tree(&path)).await
    }

    pub async fn read_file(&self, id: &str, owner_id: &str, path: &str) -> Result<String> {
        let path = path.to_string();
        self.with_fs(id, owner_id, move |fs| fs.read_file(&path)).await
    }

    pub async fn write_file(&self, id: &str, owner_id: &str, path: &str, content: String) -> Result<()> {
        let path = path.to_string();
        self.with_fs(id, owner_id, move |fs| fs.write_file(&path, &content))
            .await
    }

    pub async fn make_directory(&self, id: &str, owner_id: &str, path: &str) -> Result<()> {
        let path = path.to_string();
        self.with_fs(id, owner_id, move |fs| fs.make_directory(&path))
            .await
    }

    pub async fn delete_path(&self, id: &str, owner_id: &str, path: &str) -> Result<()> {
        let path = path.to_string();
        self.with_fs(id, owner_id, move |fs| fs.delete(&path)).await
    }

    pub async fn move_path(&self, id: &str, owner_id: &str, from: &str, to: &str) -> Result<()> {
        let (from, to) = (from.to_string(), to.to_string());
        self.with_fs(id, owner_id, move |fs| fs.move_entry(&from, &to))
            .await
    }

    pub async fn copy_path(&self, id: &str, owner_id: &str, from: &str, to: &str) -> Result<()> {
        let (from, to) = (from.to_string(), to.to_string());
        self.with_fs(id, owner_id, move |fs| fs.copy_entry(&from, &to))
            .await
    }
}

async fn blocking<T, F>(work: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T> + Send + 'static,
{
    tokio::task::spawn_blocking(work)
        .await
        .map_err(|e| OrchestratorError::Io(std::io::Error::other(e)))?
}
