//! Container lifecycle manager.
//!
//! Turns a workspace and its template into a running container and reports what the
//! daemon did. It never writes workspace records; the reconciler commits its results.

use std::collections::BTreeMap;
use std::future::Future;
use std::path::Path;
use std::sync::Arc;

use devbox_runtime::{
    shell, with_timeout, ContainerRuntime, ContainerSpec, ExecOutput, Observation, Transition,
};
use tracing::{info, instrument, warn};

use crate::config::OrchestratorConfig;
use crate::error::{OrchestratorError, Result};
use crate::fs_gateway::WorkspaceFs;
use crate::supervisor::ProcessSupervisor;
use crate::template::Template;
use crate::workspace::Workspace;

/// Result of creating a container for a workspace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Provisioned {
    pub container_ref: String,
    /// Concrete host port, 0 when the template publishes none.
    pub public_port: u16,
}

#[derive(Clone)]
pub struct ContainerLifecycle {
    runtime: Arc<dyn ContainerRuntime>,
    config: Arc<OrchestratorConfig>,
    supervisor: ProcessSupervisor,
}

impl ContainerLifecycle {
    pub fn new(runtime: Arc<dyn ContainerRuntime>, config: Arc<OrchestratorConfig>) -> Self {
        let supervisor = ProcessSupervisor::new(
            runtime.clone(),
            config.daemon_timeout,
            config.app_log_path.clone(),
        );
        Self {
            runtime,
            config,
            supervisor,
        }
    }

    pub fn supervisor(&self) -> &ProcessSupervisor {
        &self.supervisor
    }

    async fn bounded<T, F>(&self, operation: &'static str, fut: F) -> Result<T>
    where
        F: Future<Output = devbox_runtime::Result<T>>,
    {
        Ok(with_timeout(operation, self.config.daemon_timeout, fut).await?)
    }

    pub fn container_spec(&self, workspace: &Workspace, template: &Template) -> ContainerSpec {
        let mut labels = BTreeMap::new();
        labels.insert("devbox.workspace".to_string(), workspace.id.clone());
        labels.insert("devbox.owner".to_string(), workspace.owner_id.clone());
        labels.insert("devbox.template".to_string(), template.id.clone());

        ContainerSpec {
            name: container_name(&workspace.id, chrono::Utc::now().timestamp_millis()),
            image: template.image.clone(),
            entrypoint: template.entrypoint.clone(),
            cmd: template.cmd.clone(),
            working_dir: self.config.container_workdir.clone(),
            bind_source: self.config.bind_source(Path::new(&workspace.root_path)),
            published_port: template.port,
            cpu_quota: self.config.cpu_quota,
            memory_bytes: self.config.memory_limit_bytes,
            labels,
        }
    }

    /// Pull, create, start, run setup, write overlays, launch the app, read the port.
    ///
    /// A container created before a later step failed is removed again.
    #[instrument(skip(self, workspace, template), fields(workspace_id = %workspace.id, template = %template.id))]
    pub async fn create(&self, workspace: &Workspace, template: &Template) -> Result<Provisioned> {
        // Pulls can take minutes and are not bounded
        self.runtime.ensure_image(&template.image).await?;

        let spec = self.container_spec(workspace, template);
        let container_ref = self
            .bounded("create", self.runtime.create_container(&spec))
            .await?;

        match self.bring_up(workspace, template, &container_ref).await {
            Ok(public_port) => {
                info!(container = %container_ref, public_port, "Container created");
                Ok(Provisioned {
                    container_ref,
                    public_port,
                })
            }
            Err(e) => {
                warn!(container = %container_ref, error = %e, "Container bring-up failed, removing");
                if let Err(cleanup) = self.remove(&container_ref).await {
                    warn!(container = %container_ref, error = %cleanup, "Cleanup of failed container failed");
                }
                Err(e)
            }
        }
    }

    async fn bring_up(
        &self,
        workspace: &Workspace,
        template: &Template,
        container_ref: &str,
    ) -> Result<u16> {
        if !self.start(container_ref).await?.reached() {
            return Err(devbox_runtime::RuntimeError::ContainerMissing(container_ref.to_string()).into());
        }

        if let Some(script) = &template.setup_script {
            self.run_setup(container_ref, script).await;
        }

        if !template.overlay_files.is_empty() {
            let fs = WorkspaceFs::new(&workspace.root_path);
            let files = template.overlay_files.clone();
            let written = tokio::task::spawn_blocking(move || fs.write_files(&files))
                .await
                .map_err(|e| OrchestratorError::Io(std::io::Error::other(e)))?;
            if let Err(e) = written {
                warn!(error = %e, "Failed to write overlay files");
            }
        }

        self.supervisor
            .ensure_process_running(container_ref, template, true)
            .await;

        self.published_port(container_ref, template).await
    }

    /// Run the setup script to completion. Failures and timeouts are logged only.
    async fn run_setup(&self, container_ref: &str, script: &str) {
        info!(script = %script, "Running setup script");
        let outcome = with_timeout(
            "setup",
            self.config.setup_timeout,
            self.runtime.exec(container_ref, &shell(script)),
        )
        .await;

        match outcome {
            Ok(ExecOutput {
                exit_code: 0, ..
            }) => info!("Setup finished"),
            Ok(output) => warn!(
                exit_code = output.exit_code,
                stderr = %output.stderr.trim(),
                "Setup script failed"
            ),
            Err(e) => warn!(error = %e, "Setup script did not complete"),
        }
    }

    /// Host port bound to the template's port, 0 when there is none.
    pub async fn published_port(&self, container_ref: &str, template: &Template) -> Result<u16> {
        let Some(port) = template.port else {
            return Ok(0);
        };
        match self.inspect(container_ref).await? {
            Observation::Present(state) => Ok(state.host_port(port).unwrap_or(0)),
            Observation::Missing => Err(devbox_runtime::RuntimeError::ContainerMissing(
                container_ref.to_string(),
            )
            .into()),
        }
    }

    pub async fn start(&self, container_ref: &str) -> Result<Transition> {
        self.bounded("start", self.runtime.start(container_ref)).await
    }

    pub async fn stop(&self, container_ref: &str) -> Result<Transition> {
        // The daemon waits out the grace period before answering
        let limit = self.config.daemon_timeout + self.config.stop_grace;
        Ok(with_timeout("stop", limit, self.runtime.stop(container_ref, self.config.stop_grace)).await?)
    }

    pub async fn unpause(&self, container_ref: &str) -> Result<Transition> {
        self.bounded("unpause", self.runtime.unpause(container_ref)).await
    }

    pub async fn remove(&self, container_ref: &str) -> Result<Transition> {
        self.bounded("remove", self.runtime.remove(container_ref)).await
    }

    pub async fn inspect(&self, container_ref: &str) -> Result<Observation> {
        self.bounded("inspect", self.runtime.inspect(container_ref)).await
    }

    pub async fn exec(&self, container_ref: &str, cmd: &[String]) -> Result<ExecOutput> {
        self.bounded("exec", self.runtime.exec(container_ref, cmd)).await
    }
}

/// `devbox-<first 8 of id>-<base36 millis>`
pub fn container_name(workspace_id: &str, millis: i64) -> String {
    let prefix: String = workspace_id.chars().take(8).collect();
    format!("devbox-{}-{}", prefix, base36(millis.unsigned_abs()))
}

fn base36(mut value: u64) -> String {
    const DIGITS: &[u8; 36] = b"0123456789abcdefghijklmnopqrstuvwxyz";
    if value == 0 {
        return "0".to_string();
    }
    let mut out = Vec::new();
    while value > 0 {
        out.push(DIGITS[(value % 36) as usize]);
        value /= 36;
    }
    out.reverse();
    String::from_utf8_lossy(&out).into_owned()
}
