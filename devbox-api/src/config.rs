use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

use devbox_orchestrator::OrchestratorConfig;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,

    #[serde(default = "default_db_path")]
    pub db_path: PathBuf,

    #[serde(default = "default_workspaces_root")]
    pub workspaces_root: PathBuf,

    /// The workspaces root as the daemon sees it, when this service runs in a container.
    #[serde(default = "default_host_workspaces_root")]
    pub host_workspaces_root: Option<PathBuf>,

    /// Directory of YAML templates overriding the embedded ones.
    #[serde(default = "default_templates_dir")]
    pub templates_dir: Option<PathBuf>,

    #[serde(default = "default_daemon_timeout")]
    pub daemon_timeout_secs: u64,

    #[serde(default = "default_setup_timeout")]
    pub setup_timeout_secs: u64,

    #[serde(default = "default_cpu_quota")]
    pub cpu_quota: Option<i64>,

    #[serde(default = "default_memory_limit")]
    pub memory_limit_mb: Option<i64>,

    #[serde(default = "default_janitor_interval")]
    pub janitor_interval_secs: u64,

    /// Running workspaces untouched for this long get stopped. `None` disables the janitor.
    #[serde(default = "default_idle_stop")]
    pub idle_stop_secs: Option<u64>,
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|s| s.trim().parse().ok())
}

fn env_path(key: &str) -> Option<PathBuf> {
    std::env::var(key)
        .ok()
        .filter(|s| !s.trim().is_empty())
        .map(PathBuf::from)
}

fn data_dir() -> PathBuf {
    if cfg!(windows) {
        let appdata = std::env::var("APPDATA").unwrap_or_else(|_| ".".to_string());
        PathBuf::from(appdata).join("devbox")
    } else {
        let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
        PathBuf::from(home).join(".devbox")
    }
}

fn default_bind_addr() -> String {
    std::env::var("DEVBOX_BIND").unwrap_or_else(|_| "0.0.0.0:3121".to_string())
}

fn default_db_path() -> PathBuf {
    env_path("DEVBOX_DB_PATH").unwrap_or_else(|| data_dir().join("devbox.db"))
}

fn default_workspaces_root() -> PathBuf {
    env_path("DEVBOX_WORKSPACES_ROOT").unwrap_or_else(|| data_dir().join("workspaces"))
}

fn default_host_workspaces_root() -> Option<PathBuf> {
    env_path("DEVBOX_HOST_WORKSPACES_ROOT")
}

fn default_templates_dir() -> Option<PathBuf> {
    env_path("DEVBOX_TEMPLATES_DIR")
}

fn default_daemon_timeout() -> u64 {
    env_parse("DEVBOX_DAEMON_TIMEOUT_SECS").unwrap_or(30)
}

fn default_setup_timeout() -> u64 {
    env_parse("DEVBOX_SETUP_TIMEOUT_SECS").unwrap_or(300)
}

fn default_cpu_quota() -> Option<i64> {
    // 0 lifts the limit
    match env_parse::<i64>("DEVBOX_CPU_QUOTA") {
        Some(0) => None,
        Some(quota) => Some(quota),
        None => Some(200_000),
    }
}

fn default_memory_limit() -> Option<i64> {
    env_parse::<i64>("DEVBOX_MEMORY_LIMIT_MB").filter(|mb| *mb > 0)
}

fn default_janitor_interval() -> u64 {
    env_parse("DEVBOX_JANITOR_INTERVAL").unwrap_or(300) // 5 minutes
}

fn default_idle_stop() -> Option<u64> {
    env_parse::<u64>("DEVBOX_IDLE_STOP_SECS").filter(|secs| *secs > 0)
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
            db_path: default_db_path(),
            workspaces_root: default_workspaces_root(),
            host_workspaces_root: default_host_workspaces_root(),
            templates_dir: default_templates_dir(),
            daemon_timeout_secs: default_daemon_timeout(),
            setup_timeout_secs: default_setup_timeout(),
            cpu_quota: default_cpu_quota(),
            memory_limit_mb: default_memory_limit(),
            janitor_interval_secs: default_janitor_interval(),
            idle_stop_secs: default_idle_stop(),
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        Self::default()
    }

    pub fn daemon_timeout(&self) -> Duration {
        Duration::from_secs(self.daemon_timeout_secs)
    }

    pub fn idle_stop(&self) -> Option<Duration> {
        self.idle_stop_secs.map(Duration::from_secs)
    }

    pub fn orchestrator_config(&self) -> OrchestratorConfig {
        OrchestratorConfig {
            host_workspaces_root: self.host_workspaces_root.clone(),
            daemon_timeout: self.daemon_timeout(),
            setup_timeout: Duration::from_secs(self.setup_timeout_secs),
            cpu_quota: self.cpu_quota,
            memory_limit_bytes: self.memory_limit_mb.map(|mb| mb * 1024 * 1024),
            ..OrchestratorConfig::with_root(&self.workspaces_root)
        }
    }
}
