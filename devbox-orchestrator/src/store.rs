//! Persistent workspace records and the operation log.
//!
//! The store is the only writer of the `status` / `container_ref` / `public_port` triple.
//! Callers commit it through [`WorkspaceStore::commit_observation`] once the daemon
//! action that produced the observation has succeeded.

use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use tracing::{debug, instrument};
use uuid::Uuid;

use crate::error::{OrchestratorError, Result};
use crate::operation::{Operation, OperationStatus, OperationType};
use crate::workspace::{StateCommit, Workspace, WorkspaceFilters, WorkspaceStatus};

/// Fields needed to insert a new workspace row.
#[derive(Debug, Clone)]
pub struct NewWorkspace {
    pub id: String,
    pub owner_id: String,
    pub template_id: String,
    pub root_path: String,
}

#[derive(Clone)]
pub struct WorkspaceStore {
    pool: SqlitePool,
}

impl WorkspaceStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Get a reference to the database pool
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    #[instrument(skip(self, new), fields(workspace_id = %new.id))]
    pub async fn insert(&self, new: &NewWorkspace) -> Result<Workspace> {
        let now = Utc::now().timestamp();

        sqlx::query(
            r#"
            INSERT INTO workspaces (id, owner_id, template_id, root_path, status, created_at, updated_at, last_accessed_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&new.id)
        .bind(&new.owner_id)
        .bind(&new.template_id)
        .bind(&new.root_path)
        .bind(WorkspaceStatus::Creating)
        .bind(now)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await?;

        self.get(&new.id).await
    }

    /// Get a single workspace by ID
    pub async fn get(&self, id: &str) -> Result<Workspace> {
        let row = sqlx::query_as::<_, WorkspaceRow>("SELECT * FROM workspaces WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| OrchestratorError::NotFound(format!("workspace {}", id)))?;

        Ok(row.into())
    }

    /// Get a workspace only if it belongs to `owner_id`; other owners see NotFound.
    pub async fn get_owned(&self, id: &str, owner_id: &str) -> Result<Workspace> {
        let workspace = self.get(id).await?;
        if workspace.owner_id != owner_id {
            return Err(OrchestratorError::NotFound(format!("workspace {}", id)));
        }
        Ok(workspace)
    }

    /// List workspaces with optional filters
    pub async fn list(&self, filters: &WorkspaceFilters) -> Result<Vec<Workspace>> {
        let mut query = "SELECT * FROM workspaces WHERE 1=1".to_string();

        if filters.owner_id.is_some() {
            query.push_str(" AND owner_id = ?");
        }
        if filters.status.is_some() {
            query.push_str(" AND status = ?");
        }

        query.push_str(" ORDER BY created_at DESC, rowid DESC");

        let mut q = sqlx::query_as::<_, WorkspaceRow>(&query);

        if let Some(owner_id) = &filters.owner_id {
            q = q.bind(owner_id);
        }
        if let Some(status) = &filters.status {
            q = q.bind(status);
        }

        let rows = q.fetch_all(&self.pool).await?;

        Ok(rows.into_iter().map(|row| row.into()).collect())
    }

    /// Write status, container reference and port in one statement.
    #[instrument(skip(self, commit), fields(status = %commit.status))]
    pub async fn commit_observation(&self, id: &str, commit: &StateCommit) -> Result<Workspace> {
        let now = Utc::now().timestamp();

        let result = sqlx::query(
            "UPDATE workspaces
             SET status = ?, container_ref = ?, public_port = ?, error_message = ?, updated_at = ?
             WHERE id = ?",
        )
        .bind(commit.status)
        .bind(&commit.container_ref)
        .bind(commit.public_port.map(i64::from))
        .bind(&commit.error_message)
        .bind(now)
        .bind(id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(OrchestratorError::NotFound(format!("workspace {}", id)));
        }

        debug!(
            container = ?commit.container_ref,
            public_port = ?commit.public_port,
            "Committed workspace state"
        );

        self.get(id).await
    }

    /// Record that the workspace was used just now.
    pub async fn touch(&self, id: &str) -> Result<()> {
        sqlx::query("UPDATE workspaces SET last_accessed_at = ? WHERE id = ?")
            .bind(Utc::now().timestamp())
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn delete(&self, id: &str) -> Result<()> {
        let result = sqlx::query("DELETE FROM workspaces WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(OrchestratorError::NotFound(format!("workspace {}", id)));
        }

        Ok(())
    }

    /// Running workspaces not accessed since `cutoff` (for the idle janitor).
    pub async fn idle_running(&self, cutoff: DateTime<Utc>) -> Result<Vec<Workspace>> {
        let rows = sqlx::query_as::<_, WorkspaceRow>(
            "SELECT * FROM workspaces WHERE status = ? AND last_accessed_at < ?",
        )
        .bind(WorkspaceStatus::Running)
        .bind(cutoff.timestamp())
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(|row| row.into()).collect())
    }

    /// Record an operation for tracking
    pub async fn record_operation(
        &self,
        workspace_id: &str,
        operation_type: OperationType,
    ) -> Result<String> {
        let id = Uuid::new_v4().to_string();
        let now = Utc::now().timestamp();

        sqlx::query(
            "INSERT INTO operations (id, workspace_id, operation_type, status, started_at)
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(&id)
        .bind(workspace_id)
        .bind(operation_type)
        .bind(OperationStatus::Running)
        .bind(now)
        .execute(&self.pool)
        .await?;

        Ok(id)
    }

    /// Close an operation as succeeded or failed.
    pub async fn complete_operation(&self, id: &str, error: Option<&str>) -> Result<()> {
        let status = if error.is_some() {
            OperationStatus::Failed
        } else {
            OperationStatus::Success
        };

        sqlx::query("UPDATE operations SET status = ?, completed_at = ?, error = ? WHERE id = ?")
            .bind(status)
            .bind(Utc::now().timestamp())
            .bind(error)
            .bind(id)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    /// Operations of one workspace, newest first.
    pub async fn operations(&self, workspace_id: &str) -> Result<Vec<Operation>> {
        let rows = sqlx::query_as::<_, OperationRow>(
            "SELECT * FROM operations WHERE workspace_id = ? ORDER BY started_at DESC, rowid DESC",
        )
        .bind(workspace_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(|row| row.into()).collect())
    }
}

// Internal row types for sqlx
#[derive(sqlx::FromRow)]
struct WorkspaceRow {
    id: String,
    owner_id: String,
    template_id: String,
    container_ref: Option<String>,
    public_port: Option<i64>,
    root_path: String,
    status: WorkspaceStatus,
    error_message: Option<String>,
    created_at: i64,
    updated_at: i64,
    last_accessed_at: i64,
}

#[derive(sqlx::FromRow)]
struct OperationRow {
    id: String,
    workspace_id: String,
    operation_type: OperationType,
    status: OperationStatus,
    started_at: i64,
    completed_at: Option<i64>,
    error: Option<String>,
}

fn timestamp(ts: i64) -> DateTime<Utc> {
    DateTime::from_timestamp(ts, 0).unwrap_or_default()
}

impl From<WorkspaceRow> for Workspace {
    fn from(row: WorkspaceRow) -> Self {
        Self {
            id: row.id,
            owner_id: row.owner_id,
            template_id: row.template_id,
            container_ref: row.container_ref,
            // 0 is stored by nobody but treated as absent all the same
            public_port: row
                .public_port
                .and_then(|p| u16::try_from(p).ok())
                .filter(|p| *p != 0),
            root_path: row.root_path,
            status: row.status,
            created_at: timestamp(row.created_at),
            updated_at: timestamp(row.updated_at),
            last_accessed_at: timestamp(row.last_accessed_at),
            error_message: row.error_message,
        }
    }
}

impl From<OperationRow> for Operation {
    fn from(row: OperationRow) -> Self {
        Self {
            id: row.id,
            workspace_id: row.workspace_id,
            operation_type: row.operation_type,
            status: row.status,
            started_at: timestamp(row.started_at),
            completed_at: row.completed_at.and_then(|ts| DateTime::from_timestamp(ts, 0)),
            error: row.error,
        }
    }
}
