use bollard::container::LogOutput;
use bollard::exec::{CreateExecOptions, StartExecOptions, StartExecResults};
use futures_util::StreamExt;
use tracing::{debug, instrument, warn};

use super::DockerRuntime;
use crate::error::Result;
use crate::ExecOutput;

impl DockerRuntime {
    async fn create_exec(&self, container: &str, cmd: &[String], attach: bool) -> Result<String> {
        let options = CreateExecOptions {
            cmd: Some(cmd.to_vec()),
            attach_stdout: Some(attach),
            attach_stderr: Some(attach),
            ..Default::default()
        };

        let created = self
            .docker
            .create_exec(container, options)
            .await
            .map_err(|e| self.failure(e, "exec", container))?;

        Ok(created.id)
    }

    /// Run `cmd` and collect stdout/stderr plus the exit code.
    #[instrument(skip(self, cmd), fields(cmd = ?cmd))]
    pub(super) async fn exec_attached(&self, container: &str, cmd: &[String]) -> Result<ExecOutput> {
        let exec_id = self.create_exec(container, cmd, true).await?;

        let started = self
            .docker
            .start_exec(&exec_id, None)
            .await
            .map_err(|e| self.failure(e, "exec", container))?;

        let mut output = ExecOutput::default();

        match started {
            StartExecResults::Attached { output: mut stream, .. } => {
                while let Some(chunk) = stream.next().await {
                    match chunk {
                        Ok(LogOutput::StdOut { message }) => {
                            output.stdout.push_str(&String::from_utf8_lossy(&message));
                        }
                        Ok(LogOutput::StdErr { message }) => {
                            output.stderr.push_str(&String::from_utf8_lossy(&message));
                        }
                        Ok(_) => {}
                        Err(e) => {
                            warn!(error = %e, "Error reading exec output");
                        }
                    }
                }
            }
            StartExecResults::Detached => {
                warn!("Exec started detached unexpectedly");
            }
        }

        let inspected = self
            .docker
            .inspect_exec(&exec_id)
            .await
            .map_err(|e| self.failure(e, "exec", container))?;
        output.exit_code = inspected.exit_code.unwrap_or(0);

        debug!(
            exit_code = output.exit_code,
            stdout_len = output.stdout.len(),
            stderr_len = output.stderr.len(),
            "Exec completed"
        );

        Ok(output)
    }

    /// Start `cmd` and return as soon as the daemon accepted it.
    #[instrument(skip(self, cmd), fields(cmd = ?cmd))]
    pub(super) async fn exec_background(&self, container: &str, cmd: &[String]) -> Result<()> {
        let exec_id = self.create_exec(container, cmd, false).await?;

        let options = StartExecOptions {
            detach: true,
            ..Default::default()
        };

        self.docker
            .start_exec(&exec_id, Some(options))
            .await
            .map_err(|e| self.failure(e, "exec", container))?;

        debug!(exec_id = %exec_id, "Detached exec launched");
        Ok(())
    }
}
