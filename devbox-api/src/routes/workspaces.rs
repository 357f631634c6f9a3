use crate::{auth::AuthenticatedUser, error::ApiResult, state::AppState};
use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
    Extension, Json, Router,
};
use devbox_orchestrator::{Workspace, WorkspaceStatus, DEFAULT_TEMPLATE_ID};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route(
            "/api/v1/workspaces",
            get(list_workspaces).post(create_workspace),
        )
        .route(
            "/api/v1/workspaces/{id}",
            get(get_workspace).delete(delete_workspace),
        )
        .route("/api/v1/workspaces/{id}/start", post(start_workspace))
        .route("/api/v1/workspaces/{id}/stop", post(stop_workspace))
        .route(
            "/api/v1/workspaces/{id}/ensure-running",
            post(ensure_running),
        )
}

#[derive(Debug, Default, Serialize, Deserialize, ToSchema)]
pub struct CreateWorkspaceRequest {
    /// Defaults to `node-hello`.
    #[serde(default)]
    pub template_id: Option<String>,
}

/// Outcome of a lifecycle call.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct LifecycleResponse {
    pub id: String,
    pub status: WorkspaceStatus,
    pub container_ref: Option<String>,
    /// Host port of the preview, 0 when there is none.
    pub public_port: u16,
}

impl From<Workspace> for LifecycleResponse {
    fn from(workspace: Workspace) -> Self {
        Self {
            public_port: workspace.port_or_zero(),
            id: workspace.id,
            status: workspace.status,
            container_ref: workspace.container_ref,
        }
    }
}

#[utoipa::path(
    post,
    path = "/api/v1/workspaces",
    request_body = CreateWorkspaceRequest,
    responses(
        (status = 201, description = "Workspace created and running", body = Workspace),
        (status = 400, description = "Unknown template"),
        (status = 503, description = "Container daemon unavailable")
    ),
    tag = "workspaces"
)]
pub async fn create_workspace(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
    body: Option<Json<CreateWorkspaceRequest>>,
) -> ApiResult<(StatusCode, Json<Workspace>)> {
    let Json(req) = body.unwrap_or_default();
    let template_id = req.template_id.as_deref().unwrap_or(DEFAULT_TEMPLATE_ID);

    let workspace = state
        .orchestrator
        .create_workspace(&user.username, template_id)
        .await?;

    Ok((StatusCode::CREATED, Json(workspace)))
}

#[utoipa::path(
    get,
    path = "/api/v1/workspaces",
    responses((status = 200, description = "Workspaces of the caller", body = [Workspace])),
    tag = "workspaces"
)]
pub async fn list_workspaces(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
) -> ApiResult<Json<Vec<Workspace>>> {
    let workspaces = state.orchestrator.list_workspaces(&user.username).await?;

    Ok(Json(workspaces))
}

#[utoipa::path(
    get,
    path = "/api/v1/workspaces/{id}",
    params(("id" = String, Path, description = "Workspace id")),
    responses(
        (status = 200, body = Workspace),
        (status = 404, description = "No such workspace for this owner")
    ),
    tag = "workspaces"
)]
pub async fn get_workspace(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
    Path(id): Path<String>,
) -> ApiResult<Json<Workspace>> {
    let workspace = state.orchestrator.get_workspace(&id, &user.username).await?;

    Ok(Json(workspace))
}

#[utoipa::path(
    delete,
    path = "/api/v1/workspaces/{id}",
    params(("id" = String, Path, description = "Workspace id")),
    responses(
        (status = 200, description = "Container, record and files removed"),
        (status = 404, description = "No such workspace for this owner")
    ),
    tag = "workspaces"
)]
pub async fn delete_workspace(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
    Path(id): Path<String>,
) -> ApiResult<Json<serde_json::Value>> {
    state
        .orchestrator
        .delete_workspace(&id, &user.username)
        .await?;

    Ok(Json(serde_json::json!({ "message": "Workspace deleted" })))
}

#[utoipa::path(
    post,
    path = "/api/v1/workspaces/{id}/start",
    params(("id" = String, Path, description = "Workspace id")),
    responses((status = 200, body = LifecycleResponse)),
    tag = "workspaces"
)]
pub async fn start_workspace(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
    Path(id): Path<String>,
) -> ApiResult<Json<LifecycleResponse>> {
    let workspace = state
        .orchestrator
        .start_workspace(&id, &user.username)
        .await?;
    Ok(Json(workspace.into()))
}

#[utoipa::path(
    post,
    path = "/api/v1/workspaces/{id}/stop",
    params(("id" = String, Path, description = "Workspace id")),
    responses((status = 200, body = LifecycleResponse)),
    tag = "workspaces"
)]
pub async fn stop_workspace(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
    Path(id): Path<String>,
) -> ApiResult<Json<LifecycleResponse>> {
    let workspace = state
        .orchestrator
        .stop_workspace(&id, &user.username)
        .await?;
    Ok(Json(workspace.into()))
}

#[utoipa::path(
    post,
    path = "/api/v1/workspaces/{id}/ensure-running",
    params(("id" = String, Path, description = "Workspace id")),
    responses(
        (status = 200, body = LifecycleResponse),
        (status = 503, description = "Container daemon unavailable")
    ),
    tag = "workspaces"
)]
pub async fn ensure_running(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
    Path(id): Path<String>,
) -> ApiResult<Json<LifecycleResponse>> {
    let workspace = state
        .orchestrator
        .ensure_running(&id, &user.username)
        .await?;
    Ok(Json(workspace.into()))
}
