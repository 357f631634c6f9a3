//! Error types for container runtime operations.
//!
//! Daemon responses that only mean "nothing to do" or "the container is gone" are not
//! errors here; they surface as [`crate::Transition`] or [`crate::Observation`] variants.
//! What remains are genuine failures the caller has to decide about.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, RuntimeError>;

/// Errors that can occur while talking to the container daemon.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RuntimeError {
    #[error("Container daemon unavailable: {0}")]
    DaemonUnavailable(String),

    #[error("Container not found: {0}")]
    ContainerMissing(String),

    #[error("Daemon rejected {operation} on {target} (status {status}): {message}")]
    Daemon {
        operation: &'static str,
        target: String,
        status: u16,
        message: String,
    },

    #[error("Failed to pull image {image}: {reason}")]
    ImagePull { image: String, reason: String },

    #[error("{operation} timed out after {seconds}s")]
    Timeout {
        operation: &'static str,
        seconds: u64,
    },

    #[error("Container client error during {operation}: {message}")]
    Client {
        operation: &'static str,
        message: String,
    },
}

impl RuntimeError {
    /// True when the daemon itself could not be reached, as opposed to rejecting a request.
    pub fn is_unavailable(&self) -> bool {
        matches!(self, Self::DaemonUnavailable(_))
    }
}
