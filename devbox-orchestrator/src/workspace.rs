use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// One user environment and the container currently backing it.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct Workspace {
    pub id: String,
    pub owner_id: String,
    pub template_id: String,
    pub container_ref: Option<String>,
    /// Host port the template's port is published on. Absent when stopped or portless.
    pub public_port: Option<u16>,
    pub root_path: String,
    pub status: WorkspaceStatus,

    #[serde(serialize_with = "serialize_datetime")]
    pub created_at: DateTime<Utc>,

    #[serde(serialize_with = "serialize_datetime")]
    pub updated_at: DateTime<Utc>,

    #[serde(serialize_with = "serialize_datetime")]
    pub last_accessed_at: DateTime<Utc>,

    pub error_message: Option<String>,
}

impl Workspace {
    /// Published port as reported to callers, 0 meaning none.
    pub fn port_or_zero(&self) -> u16 {
        self.public_port.unwrap_or(0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type, ToSchema)]
#[sqlx(rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum WorkspaceStatus {
    Creating,
    Running,
    Stopped,
    Error,
}

impl std::fmt::Display for WorkspaceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Creating => "creating",
            Self::Running => "running",
            Self::Stopped => "stopped",
            Self::Error => "error",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Default)]
pub struct WorkspaceFilters {
    pub owner_id: Option<String>,
    pub status: Option<WorkspaceStatus>,
}

/// The status/container/port triple written back after a daemon action.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateCommit {
    pub status: WorkspaceStatus,
    pub container_ref: Option<String>,
    pub public_port: Option<u16>,
    pub error_message: Option<String>,
}

impl StateCommit {
    pub fn running(container_ref: &str, public_port: u16) -> Self {
        Self {
            status: WorkspaceStatus::Running,
            container_ref: Some(container_ref.to_string()),
            public_port: (public_port != 0).then_some(public_port),
            error_message: None,
        }
    }

    pub fn stopped(container_ref: Option<&str>) -> Self {
        Self {
            status: WorkspaceStatus::Stopped,
            container_ref: container_ref.map(str::to_string),
            public_port: None,
            error_message: None,
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            status: WorkspaceStatus::Error,
            container_ref: None,
            public_port: None,
            error_message: Some(message.into()),
        }
    }
}

// Serialize DateTime as RFC 3339 / ISO 8601 string
fn serialize_datetime<S>(dt: &DateTime<Utc>, serializer: S) -> std::result::Result<S::Ok, S::Error>
where
    S: serde::Serializer,
{
    serializer.serialize_str(&dt.to_rfc3339())
}
