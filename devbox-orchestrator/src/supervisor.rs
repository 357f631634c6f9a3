//! Readiness & process supervision inside a workspace container.
//!
//! The container's main command only keeps it alive; the template's start command is
//! launched separately as a detached exec. Readiness is evaluated from the template's
//! declarative checks. Exec failures are logged and never propagate.

use std::sync::Arc;
use std::time::Duration;

use devbox_runtime::{shell, with_timeout, ContainerRuntime, ExecOutput};
use tracing::{debug, info, instrument, warn};

use crate::template::{ReadinessCheck, Template};

/// What [`ProcessSupervisor::ensure_process_running`] ended up doing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupervisorOutcome {
    NoStartCommand,
    AlreadyRunning,
    Launched,
    LaunchFailed,
}

#[derive(Clone)]
pub struct ProcessSupervisor {
    runtime: Arc<dyn ContainerRuntime>,
    daemon_timeout: Duration,
    app_log_path: String,
}

impl ProcessSupervisor {
    pub fn new(
        runtime: Arc<dyn ContainerRuntime>,
        daemon_timeout: Duration,
        app_log_path: impl Into<String>,
    ) -> Self {
        Self {
            runtime,
            daemon_timeout,
            app_log_path: app_log_path.into(),
        }
    }

    /// Launch the template's start command unless it is already running.
    ///
    /// With `force` the readiness checks are skipped; used right after creation.
    #[instrument(skip(self, template), fields(template = %template.id))]
    pub async fn ensure_process_running(
        &self,
        container: &str,
        template: &Template,
        force: bool,
    ) -> SupervisorOutcome {
        let Some(start_command) = template.start_command.as_deref() else {
            return SupervisorOutcome::NoStartCommand;
        };

        if !force && self.is_ready(container, template).await {
            debug!("Application already running");
            return SupervisorOutcome::AlreadyRunning;
        }

        let command = self.launch_command(start_command);
        let launched = with_timeout(
            "exec_detached",
            self.daemon_timeout,
            self.runtime.exec_detached(container, &command),
        )
        .await;

        match launched {
            Ok(()) => {
                info!(command = %start_command, "Launched start command");
                SupervisorOutcome::Launched
            }
            Err(e) => {
                warn!(error = %e, "Failed to launch start command");
                SupervisorOutcome::LaunchFailed
            }
        }
    }

    /// True when any readiness check of `template` is satisfied.
    pub async fn is_ready(&self, container: &str, template: &Template) -> bool {
        for check in template.readiness_checks() {
            if self.check(container, &check).await {
                debug!(check = ?check, "Readiness check satisfied");
                return true;
            }
        }
        false
    }

    async fn check(&self, container: &str, check: &ReadinessCheck) -> bool {
        match check {
            ReadinessCheck::ProcessPattern { pattern } => {
                let listing = ["ps".to_string(), "aux".to_string()];
                self.run(container, &listing)
                    .await
                    .is_some_and(|out| out.stdout.lines().any(|line| line.contains(pattern.as_str())))
            }
            ReadinessCheck::PortProbe { port } => {
                let needle = quote(&format!(":{} ", port));
                let script = format!(
                    "netstat -tln 2>/dev/null | grep -q {needle} || ss -tln 2>/dev/null | grep -q {needle}"
                );
                self.run(container, &shell(&script))
                    .await
                    .is_some_and(|out| out.success())
            }
            ReadinessCheck::LogMarker { text } => {
                let script = format!("grep -qF -- {} {}", quote(text), quote(&self.app_log_path));
                self.run(container, &shell(&script))
                    .await
                    .is_some_and(|out| out.success())
            }
        }
    }

    async fn run(&self, container: &str, cmd: &[String]) -> Option<ExecOutput> {
        match with_timeout("exec", self.daemon_timeout, self.runtime.exec(container, cmd)).await {
            Ok(output) => Some(output),
            Err(e) => {
                warn!(container = %container, error = %e, "Readiness exec failed");
                None
            }
        }
    }

    /// Empty the app log so log markers only see output of the current run.
    ///
    /// The log sits in the container's writable layer and outlives a stop.
    pub async fn reset_app_log(&self, container: &str) {
        let script = format!(": > {}", quote(&self.app_log_path));
        match self.run(container, &shell(&script)).await {
            Some(out) if !out.success() => {
                warn!(exit_code = out.exit_code, "Failed to truncate app log");
            }
            _ => {}
        }
    }

    /// The detached argv for a start command, output redirected to the app log.
    pub fn launch_command(&self, start_command: &str) -> Vec<String> {
        shell(&format!(
            "{} > {} 2>&1",
            start_command,
            quote(&self.app_log_path)
        ))
    }
}

/// Single-quote `value` for `sh`.
fn quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', r"'\''"))
}
