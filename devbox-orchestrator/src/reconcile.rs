//! Reconciliation engine.
//!
//! Every `start` / `ensure_running` / `stop` observes the daemon first, plans with a pure
//! function over that observation, runs one named transition, and only then commits the
//! resulting status, container reference and port in a single store update.
//!
//! | stored / observed          | ensure_running     | stop              |
//! |----------------------------|--------------------|-------------------|
//! | no container_ref           | provision          | nothing to do     |
//! | container_ref, missing     | recreate           | detach            |
//! | container_ref, paused      | resume_paused      | stop              |
//! | container_ref, stopped     | start_stopped      | already stopped   |
//! | container_ref, running     | refresh_running    | stop              |

use std::sync::Arc;

use devbox_runtime::{ContainerState, Observation, Transition};
use tracing::{info, instrument, warn};

use crate::error::{OrchestratorError, Result};
use crate::lifecycle::ContainerLifecycle;
use crate::store::WorkspaceStore;
use crate::template::{Template, TemplateRegistry};
use crate::workspace::{StateCommit, Workspace};

/// What the daemon says about a workspace's container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Observed {
    NoContainer,
    Missing,
    Paused,
    Stopped,
    Running(ContainerState),
}

impl Observed {
    pub fn from_observation(observation: Observation) -> Self {
        match observation {
            Observation::Missing => Self::Missing,
            // A paused container still reports running
            Observation::Present(state) if state.paused => Self::Paused,
            Observation::Present(state) if state.running => Self::Running(state),
            Observation::Present(_) => Self::Stopped,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EnsurePlan {
    Provision,
    Recreate,
    ResumePaused,
    StartStopped,
    RefreshRunning(ContainerState),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopPlan {
    /// Nothing to stop; record the workspace as stopped.
    AlreadyStopped,
    Stop,
    /// The container vanished; forget it.
    Detach,
}

pub fn plan_ensure_running(observed: &Observed) -> EnsurePlan {
    match observed {
        Observed::NoContainer => EnsurePlan::Provision,
        Observed::Missing => EnsurePlan::Recreate,
        Observed::Paused => EnsurePlan::ResumePaused,
        Observed::Stopped => EnsurePlan::StartStopped,
        Observed::Running(state) => EnsurePlan::RefreshRunning(state.clone()),
    }
}

pub fn plan_stop(observed: &Observed) -> StopPlan {
    match observed {
        Observed::NoContainer | Observed::Stopped => StopPlan::AlreadyStopped,
        Observed::Missing => StopPlan::Detach,
        Observed::Paused | Observed::Running(_) => StopPlan::Stop,
    }
}

#[derive(Clone)]
pub struct Reconciler {
    store: WorkspaceStore,
    lifecycle: ContainerLifecycle,
    templates: Arc<TemplateRegistry>,
}

impl Reconciler {
    pub fn new(
        store: WorkspaceStore,
        lifecycle: ContainerLifecycle,
        templates: Arc<TemplateRegistry>,
    ) -> Self {
        Self {
            store,
            lifecycle,
            templates,
        }
    }

    pub async fn observe(&self, workspace: &Workspace) -> Result<Observed> {
        match &workspace.container_ref {
            None => Ok(Observed::NoContainer),
            Some(container) => Ok(Observed::from_observation(
                self.lifecycle.inspect(container).await?,
            )),
        }
    }

    fn template_for(&self, workspace: &Workspace) -> Result<Arc<Template>> {
        self.templates.get(&workspace.template_id).ok_or_else(|| {
            OrchestratorError::Template(format!(
                "workspace {} uses unknown template '{}'",
                workspace.id, workspace.template_id
            ))
        })
    }

    /// Bring the workspace to running, healing whatever drift is observed.
    #[instrument(skip(self, workspace), fields(workspace_id = %workspace.id))]
    pub async fn ensure_running(&self, workspace: &Workspace) -> Result<Workspace> {
        let template = self.template_for(workspace)?;
        let observed = self.observe(workspace).await?;
        let plan = plan_ensure_running(&observed);
        info!(plan = ?plan, "Reconciling workspace");

        let container = workspace.container_ref.as_deref().unwrap_or_default();
        match plan {
            EnsurePlan::Provision => self.provision(workspace, &template).await,
            EnsurePlan::Recreate => self.recreate(workspace, &template).await,
            EnsurePlan::ResumePaused => self.resume_paused(workspace, &template, container).await,
            EnsurePlan::StartStopped => self.start_stopped(workspace, &template, container).await,
            EnsurePlan::RefreshRunning(state) => {
                self.refresh_running(workspace, &template, container, &state)
                    .await
            }
        }
    }

    /// Stop the workspace's container if there is one.
    #[instrument(skip(self, workspace), fields(workspace_id = %workspace.id))]
    pub async fn stop(&self, workspace: &Workspace) -> Result<Workspace> {
        let observed = self.observe(workspace).await?;
        let container = workspace.container_ref.as_deref();

        let commit = match (plan_stop(&observed), container) {
            (StopPlan::Stop, Some(container)) => match self.lifecycle.stop(container).await? {
                Transition::Applied | Transition::AlreadyInState => {
                    StateCommit::stopped(Some(container))
                }
                Transition::Missing => StateCommit::stopped(None),
            },
            (StopPlan::Detach, _) => {
                info!("Container vanished, clearing reference");
                StateCommit::stopped(None)
            }
            (_, container) => StateCommit::stopped(container),
        };

        self.store.commit_observation(&workspace.id, &commit).await
    }

    /// First container for a workspace (or a retry after a failed creation).
    pub async fn provision(&self, workspace: &Workspace, template: &Template) -> Result<Workspace> {
        match self.lifecycle.create(workspace, template).await {
            Ok(provisioned) => {
                self.store
                    .commit_observation(
                        &workspace.id,
                        &StateCommit::running(&provisioned.container_ref, provisioned.public_port),
                    )
                    .await
            }
            Err(e) => {
                let reason = e.to_string();
                warn!(error = %reason, "Provisioning failed");
                self.store
                    .commit_observation(&workspace.id, &StateCommit::failed(&reason))
                    .await?;
                Err(match e {
                    OrchestratorError::DaemonUnavailable(message) => {
                        OrchestratorError::DaemonUnavailable(message)
                    }
                    _ => OrchestratorError::Provision {
                        workspace_id: workspace.id.clone(),
                        reason,
                    },
                })
            }
        }
    }

    /// The stored container is gone; build a new one under the same workspace id.
    pub async fn recreate(&self, workspace: &Workspace, template: &Template) -> Result<Workspace> {
        warn!(
            stale_container = ?workspace.container_ref,
            "Container missing, recreating"
        );
        self.provision(workspace, template).await
    }

    pub async fn resume_paused(
        &self,
        workspace: &Workspace,
        template: &Template,
        container: &str,
    ) -> Result<Workspace> {
        if self.lifecycle.unpause(container).await? == Transition::Missing {
            return self.recreate(workspace, template).await;
        }
        self.settle_running(workspace, template, container).await
    }

    pub async fn start_stopped(
        &self,
        workspace: &Workspace,
        template: &Template,
        container: &str,
    ) -> Result<Workspace> {
        match self.lifecycle.start(container).await? {
            Transition::Missing => return self.recreate(workspace, template).await,
            // Processes died with the stop but their old log did not
            Transition::Applied => self.lifecycle.supervisor().reset_app_log(container).await,
            Transition::AlreadyInState => {}
        }
        // Ephemeral ports are reassigned on every start
        self.settle_running(workspace, template, container).await
    }

    /// Already running: make sure the app is up and the stored port matches.
    pub async fn refresh_running(
        &self,
        workspace: &Workspace,
        template: &Template,
        container: &str,
        state: &ContainerState,
    ) -> Result<Workspace> {
        self.lifecycle
            .supervisor()
            .ensure_process_running(container, template, false)
            .await;

        let public_port = template
            .port
            .and_then(|port| state.host_port(port))
            .unwrap_or(0);

        if workspace.port_or_zero() != public_port {
            info!(
                stored = workspace.port_or_zero(),
                observed = public_port,
                "Published port drifted, writing back"
            );
        }

        self.store
            .commit_observation(&workspace.id, &StateCommit::running(container, public_port))
            .await
    }

    async fn settle_running(
        &self,
        workspace: &Workspace,
        template: &Template,
        container: &str,
    ) -> Result<Workspace> {
        self.lifecycle
            .supervisor()
            .ensure_process_running(container, template, false)
            .await;

        let public_port = match self.lifecycle.published_port(container, template).await {
            Ok(port) => port,
            Err(OrchestratorError::Runtime(devbox_runtime::RuntimeError::ContainerMissing(_))) => {
                return self.recreate(workspace, template).await;
            }
            Err(e) => return Err(e),
        };

        self.store
            .commit_observation(&workspace.id, &StateCommit::running(container, public_port))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn running(port: Option<(u16, u16)>) -> ContainerState {
        let mut state = ContainerState {
            running: true,
            ..Default::default()
        };
        if let Some((container, host)) = port {
            state.port_bindings.insert(container, host);
        }
        state
    }

    #[test]
    fn test_paused_wins_over_running() {
        let state = ContainerState {
            running: true,
            paused: true,
            ..Default::default()
        };
        assert_eq!(
            Observed::from_observation(Observation::Present(state)),
            Observed::Paused
        );
    }

    #[test]
    fn test_plan_ensure_running_table() {
        assert_eq!(plan_ensure_running(&Observed::NoContainer), EnsurePlan::Provision);
        assert_eq!(plan_ensure_running(&Observed::Missing), EnsurePlan::Recreate);
        assert_eq!(plan_ensure_running(&Observed::Paused), EnsurePlan::ResumePaused);
        assert_eq!(plan_ensure_running(&Observed::Stopped), EnsurePlan::StartStopped);

        let state = running(Some((3000, 49153)));
        assert_eq!(
            plan_ensure_running(&Observed::Running(state.clone())),
            EnsurePlan::RefreshRunning(state)
        );
    }

    #[test]
    fn test_plan_stop_table() {
        assert_eq!(plan_stop(&Observed::NoContainer), StopPlan::AlreadyStopped);
        assert_eq!(plan_stop(&Observed::Stopped), StopPlan::AlreadyStopped);
        assert_eq!(plan_stop(&Observed::Missing), StopPlan::Detach);
        assert_eq!(plan_stop(&Observed::Paused), StopPlan::Stop);
        assert_eq!(plan_stop(&Observed::Running(running(None))), StopPlan::Stop);
    }

    #[test]
    fn test_stopped_observation() {
        assert_eq!(
            Observed::from_observation(Observation::Present(ContainerState::default())),
            Observed::Stopped
        );
        assert_eq!(
            Observed::from_observation(Observation::Missing),
            Observed::Missing
        );
    }
}
