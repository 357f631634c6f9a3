use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{OrchestratorError, Result};

/// Knobs the orchestrator needs from its host process.
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Directory holding `<owner>/<workspace id>` trees as seen by this process.
    pub workspaces_root: PathBuf,
    /// Same directory as the daemon sees it, when the service itself runs in a container.
    pub host_workspaces_root: Option<PathBuf>,
    pub daemon_timeout: Duration,
    pub setup_timeout: Duration,
    pub stop_grace: Duration,
    pub cpu_quota: Option<i64>,
    pub memory_limit_bytes: Option<i64>,
    /// Mount point of the workspace inside the container.
    pub container_workdir: String,
    /// Where detached start commands write their output.
    pub app_log_path: String,
    /// Host the preview probe connects to.
    pub preview_host: String,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            workspaces_root: PathBuf::from("workspaces"),
            host_workspaces_root: None,
            daemon_timeout: Duration::from_secs(30),
            setup_timeout: Duration::from_secs(300),
            stop_grace: Duration::from_secs(10),
            cpu_quota: Some(200_000),
            memory_limit_bytes: None,
            container_workdir: "/workspace".to_string(),
            app_log_path: "/tmp/devbox-app.log".to_string(),
            preview_host: "127.0.0.1".to_string(),
        }
    }
}

impl OrchestratorConfig {
    pub fn with_root(workspaces_root: impl Into<PathBuf>) -> Self {
        Self {
            workspaces_root: workspaces_root.into(),
            ..Default::default()
        }
    }

    /// Local directory of one workspace.
    pub fn workspace_dir(&self, owner_id: &str, workspace_id: &str) -> PathBuf {
        self.workspaces_root.join(owner_id).join(workspace_id)
    }

    /// Bind-mount source for the daemon, translated to the daemon's view when configured.
    pub fn bind_source(&self, root_path: &Path) -> String {
        let translated = self.host_workspaces_root.as_ref().and_then(|host_root| {
            root_path
                .strip_prefix(&self.workspaces_root)
                .ok()
                .map(|relative| host_root.join(relative))
        });

        let source = translated.unwrap_or_else(|| {
            std::path::absolute(root_path).unwrap_or_else(|_| root_path.to_path_buf())
        });
        // The daemon expects forward slashes even for Windows host paths
        source.to_string_lossy().replace('\\', "/")
    }
}

/// Owner ids become directory names, so they are held to a conservative alphabet.
pub fn validate_owner_id(owner_id: &str) -> Result<()> {
    if owner_id.is_empty() {
        return Err(OrchestratorError::InvalidInput("owner id is empty".to_string()));
    }
    if owner_id.len() > 128 {
        return Err(OrchestratorError::InvalidInput(
            "owner id too long (max 128 characters)".to_string(),
        ));
    }
    if owner_id.starts_with('.') {
        return Err(OrchestratorError::InvalidInput(
            "owner id cannot start with '.'".to_string(),
        ));
    }
    if !owner_id
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | '@'))
    {
        return Err(OrchestratorError::InvalidInput(format!(
            "owner id '{}' contains invalid characters",
            owner_id
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bind_source_translates_host_root() {
        let config = OrchestratorConfig {
            workspaces_root: PathBuf::from("/app/workspaces"),
            host_workspaces_root: Some(PathBuf::from("/srv/devbox")),
            ..Default::default()
        };
        let dir = config.workspace_dir("alice", "ws-1");
        assert_eq!(config.bind_source(&dir), "/srv/devbox/alice/ws-1");
    }

    #[test]
    fn test_bind_source_is_absolute_without_translation() {
        let config = OrchestratorConfig::with_root("relative/root");
        let source = config.bind_source(&config.workspace_dir("alice", "ws-1"));
        assert!(source.starts_with('/'));
        assert!(source.ends_with("relative/root/alice/ws-1"));
    }

    #[test]
    fn test_owner_id_validation() {
        assert!(validate_owner_id("alice").is_ok());
        assert!(validate_owner_id("user_42@example.com").is_ok());
        assert!(validate_owner_id("").is_err());
        assert!(validate_owner_id("../root").is_err());
        assert!(validate_owner_id("a/b").is_err());
        assert!(validate_owner_id(".hidden").is_err());
    }
}
