//! Docker runtime backed by the bollard daemon client.
//!
//! The client is constructed once at service startup and injected into the orchestrator;
//! construction pings the daemon and fails fast with [`RuntimeError::DaemonUnavailable`].
//! Status codes are translated here and nowhere else:
//!
//! | daemon answer | translated to |
//! |---|---|
//! | 304 Not Modified | [`Transition::AlreadyInState`] |
//! | 409 "not paused" / "already in progress" | [`Transition::AlreadyInState`] |
//! | 404 Not Found | [`Transition::Missing`] / [`crate::Observation::Missing`] |
//! | transport failure | [`RuntimeError::DaemonUnavailable`] |

mod exec;
mod image;
mod lifecycle;

use std::time::Duration;

use bollard::errors::Error as BollardError;
use bollard::Docker;
use tracing::info;

use crate::error::{Result, RuntimeError};
use crate::Transition;

/// Default timeout bollard applies to each HTTP request against the daemon.
const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

/// Docker-based container runtime.
#[derive(Clone)]
pub struct DockerRuntime {
    docker: Docker,
    request_timeout: Duration,
}

impl std::fmt::Debug for DockerRuntime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DockerRuntime").finish_non_exhaustive()
    }
}

impl DockerRuntime {
    /// Connect to the local daemon (`DOCKER_HOST` or the platform socket) and verify it answers.
    pub async fn connect() -> Result<Self> {
        Self::connect_with_timeout(DEFAULT_REQUEST_TIMEOUT).await
    }

    pub async fn connect_with_timeout(request_timeout: Duration) -> Result<Self> {
        let docker = Docker::connect_with_local_defaults()
            .map_err(|e| RuntimeError::DaemonUnavailable(e.to_string()))?
            .with_timeout(request_timeout);

        docker
            .ping()
            .await
            .map_err(|e| RuntimeError::DaemonUnavailable(format!("ping failed: {}", e)))?;

        info!("Connected to Docker daemon");
        Ok(Self {
            docker,
            request_timeout,
        })
    }

    /// Wrap a pre-configured bollard client without pinging it.
    pub fn with_client(docker: Docker, request_timeout: Duration) -> Self {
        Self {
            docker: docker.with_timeout(request_timeout),
            request_timeout,
        }
    }

    fn classify(&self, err: BollardError, operation: &'static str, target: &str) -> Classified {
        classify(err, operation, target, self.request_timeout)
    }

    fn transition(
        &self,
        result: std::result::Result<(), BollardError>,
        operation: &'static str,
        target: &str,
    ) -> Result<Transition> {
        transition(result, operation, target, self.request_timeout)
    }

    fn failure(&self, err: BollardError, operation: &'static str, target: &str) -> RuntimeError {
        failure(err, operation, target, self.request_timeout)
    }
}

/// How a daemon error should be treated by the caller.
#[derive(Debug)]
enum Classified {
    AlreadyInState,
    Missing,
    Failed(RuntimeError),
}

fn classify(
    err: BollardError,
    operation: &'static str,
    target: &str,
    request_timeout: Duration,
) -> Classified {
    match err {
        BollardError::DockerResponseServerError {
            status_code: 304, ..
        } => Classified::AlreadyInState,
        BollardError::DockerResponseServerError {
            status_code: 404, ..
        } => Classified::Missing,
        BollardError::DockerResponseServerError {
            status_code: 409,
            message,
        } if is_redundant_conflict(&message) => Classified::AlreadyInState,
        BollardError::DockerResponseServerError {
            status_code,
            message,
        } => Classified::Failed(RuntimeError::Daemon {
            operation,
            target: target.to_string(),
            status: status_code,
            message,
        }),
        BollardError::RequestTimeoutError => Classified::Failed(RuntimeError::Timeout {
            operation,
            seconds: request_timeout.as_secs(),
        }),
        BollardError::IOError { err } => {
            Classified::Failed(RuntimeError::DaemonUnavailable(err.to_string()))
        }
        other => Classified::Failed(RuntimeError::Client {
            operation,
            message: other.to_string(),
        }),
    }
}

/// 409 conflicts the daemon raises for transitions that are already done.
fn is_redundant_conflict(message: &str) -> bool {
    let message = message.to_ascii_lowercase();
    message.contains("is not paused")
        || message.contains("already in progress")
        || message.contains("is already paused")
}

/// Fold the result of a state-changing call into a [`Transition`].
fn transition(
    result: std::result::Result<(), BollardError>,
    operation: &'static str,
    target: &str,
    request_timeout: Duration,
) -> Result<Transition> {
    match result {
        Ok(()) => Ok(Transition::Applied),
        Err(e) => match classify(e, operation, target, request_timeout) {
            Classified::AlreadyInState => Ok(Transition::AlreadyInState),
            Classified::Missing => Ok(Transition::Missing),
            Classified::Failed(err) => Err(err),
        },
    }
}

/// Map an error from a call where "missing" has no recovery meaning.
fn failure(
    err: BollardError,
    operation: &'static str,
    target: &str,
    request_timeout: Duration,
) -> RuntimeError {
    match classify(err, operation, target, request_timeout) {
        Classified::Missing => RuntimeError::ContainerMissing(target.to_string()),
        Classified::AlreadyInState => RuntimeError::Daemon {
            operation,
            target: target.to_string(),
            status: 304,
            message: "not modified".to_string(),
        },
        Classified::Failed(err) => err,
    }
}
