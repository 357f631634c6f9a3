//! Container runtime abstraction library.
//!
//! Defines the [`ContainerRuntime`] trait the orchestrator drives, the typed outcomes that
//! daemon responses are translated into, and the bollard-backed Docker implementation.
//! A scripted in-memory runtime is available behind the `test-helpers` feature.

// Standard library
use std::collections::BTreeMap;
use std::future::Future;
use std::time::Duration;

// External crates
use async_trait::async_trait;
use serde::Serialize;

pub mod error;

#[cfg(feature = "docker")]
pub mod docker;

// When the `test-helpers` feature is enabled, include the mock runtime.
#[cfg(feature = "test-helpers")]
pub mod mock;

pub use error::{Result, RuntimeError};

#[cfg(feature = "docker")]
pub use docker::DockerRuntime;

/// Everything the daemon needs to create one workspace container.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContainerSpec {
    pub name: String,
    pub image: String,
    pub entrypoint: Vec<String>,
    pub cmd: Vec<String>,
    pub working_dir: String,
    /// Host path mounted read-write at `working_dir`.
    pub bind_source: String,
    /// Container port published on a daemon-chosen host port.
    pub published_port: Option<u16>,
    /// CPU quota in microseconds per 100ms scheduling period.
    pub cpu_quota: Option<i64>,
    pub memory_bytes: Option<i64>,
    pub labels: BTreeMap<String, String>,
}

/// Observed state of an existing container.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ContainerState {
    pub running: bool,
    pub paused: bool,
    /// Container port -> host port, for every published TCP port with a binding.
    pub port_bindings: BTreeMap<u16, u16>,
}

impl ContainerState {
    pub fn host_port(&self, container_port: u16) -> Option<u16> {
        self.port_bindings.get(&container_port).copied()
    }
}

/// Result of inspecting a container reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Observation {
    Present(ContainerState),
    /// The daemon no longer knows the container (removed out of band).
    Missing,
}

/// Result of a state-changing daemon call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Applied,
    /// The container was already in the requested state.
    AlreadyInState,
    /// The container no longer exists.
    Missing,
}

impl Transition {
    /// Applied and AlreadyInState both leave the container where the caller wanted it.
    pub fn reached(self) -> bool {
        !matches!(self, Self::Missing)
    }
}

/// Captured output of a command run inside a container.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecOutput {
    pub exit_code: i64,
    pub stdout: String,
    pub stderr: String,
}

impl ExecOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// The contract for a container daemon client.
///
/// Implementations translate daemon status codes into [`Transition`] / [`Observation`]
/// values so callers never branch on raw HTTP codes.
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// Get the name of the runtime (e.g., "docker", "mock").
    fn name(&self) -> &'static str;

    /// Make sure `image` is available locally, pulling it when the daemon reports it absent.
    async fn ensure_image(&self, image: &str) -> Result<()>;

    /// Create (but do not start) a container, returning the daemon's container id.
    async fn create_container(&self, spec: &ContainerSpec) -> Result<String>;

    async fn start(&self, container: &str) -> Result<Transition>;

    async fn stop(&self, container: &str, grace: Duration) -> Result<Transition>;

    async fn unpause(&self, container: &str) -> Result<Transition>;

    /// Force-remove a container.
    async fn remove(&self, container: &str) -> Result<Transition>;

    async fn inspect(&self, container: &str) -> Result<Observation>;

    /// Run a command to completion and capture its output.
    async fn exec(&self, container: &str, cmd: &[String]) -> Result<ExecOutput>;

    /// Launch a command in the background without waiting for it.
    async fn exec_detached(&self, container: &str, cmd: &[String]) -> Result<()>;
}

/// Bound a daemon call by `limit`, reporting expiry as [`RuntimeError::Timeout`].
pub async fn with_timeout<T, F>(operation: &'static str, limit: Duration, fut: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => result,
        Err(_) => Err(RuntimeError::Timeout {
            operation,
            seconds: limit.as_secs(),
        }),
    }
}

/// Wrap a shell snippet as an argv for `sh -c`.
pub fn shell(script: &str) -> Vec<String> {
    vec!["sh".to_string(), "-c".to_string(), script.to_string()]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transition_reached() {
        assert!(Transition::Applied.reached());
        assert!(Transition::AlreadyInState.reached());
        assert!(!Transition::Missing.reached());
    }

    #[test]
    fn test_host_port_lookup() {
        let mut state = ContainerState::default();
        state.port_bindings.insert(3000, 49153);
        assert_eq!(state.host_port(3000), Some(49153));
        assert_eq!(state.host_port(8080), None);
    }

    #[tokio::test]
    async fn test_with_timeout_expires() {
        let result: Result<()> = with_timeout("sleep", Duration::from_millis(10), async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(())
        })
        .await;

        assert!(matches!(
            result,
            Err(RuntimeError::Timeout {
                operation: "sleep",
                ..
            })
        ));
    }

    #[test]
    fn test_shell_wraps_script() {
        assert_eq!(shell("npm install"), vec!["sh", "-c", "npm install"]);
    }
}
