use std::path::PathBuf;

use devbox_runtime::RuntimeError;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, OrchestratorError>;

#[derive(Error, Debug)]
pub enum OrchestratorError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Container daemon unavailable: {0}")]
    DaemonUnavailable(String),

    #[error("Failed to provision workspace {workspace_id}: {reason}")]
    Provision { workspace_id: String, reason: String },

    #[error("Container runtime error: {0}")]
    Runtime(RuntimeError),

    #[error("Storage error at {}: {source}", path.display())]
    Storage {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Template error: {0}")]
    Template(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl OrchestratorError {
    pub(crate) fn storage(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        let path = path.into();
        if source.kind() == std::io::ErrorKind::NotFound {
            return Self::NotFound(format!("path {}", path.display()));
        }
        Self::Storage { path, source }
    }
}

impl From<RuntimeError> for OrchestratorError {
    fn from(err: RuntimeError) -> Self {
        match err {
            RuntimeError::DaemonUnavailable(message) => Self::DaemonUnavailable(message),
            other => Self::Runtime(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unavailable_daemon_maps_to_dedicated_variant() {
        let err: OrchestratorError = RuntimeError::DaemonUnavailable("socket closed".into()).into();
        assert!(matches!(err, OrchestratorError::DaemonUnavailable(_)));
    }

    #[test]
    fn test_missing_file_maps_to_not_found() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        let err = OrchestratorError::storage("/tmp/x", io);
        assert!(matches!(err, OrchestratorError::NotFound(_)));
    }
}
