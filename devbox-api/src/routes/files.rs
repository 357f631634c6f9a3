//! Workspace file access. Paths are workspace-relative and `/`-separated.

use crate::{auth::AuthenticatedUser, error::ApiResult, state::AppState};
use axum::{
    extract::{Path, Query, State},
    routing::{get, post, put},
    Extension, Json, Router,
};
use devbox_orchestrator::FileNode;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use utoipa::{IntoParams, ToSchema};

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/api/v1/workspaces/{id}/files", get(list_files))
        .route("/api/v1/workspaces/{id}/tree", get(file_tree))
        .route(
            "/api/v1/workspaces/{id}/file",
            get(read_file).put(write_file).delete(delete_path),
        )
        .route("/api/v1/workspaces/{id}/directory", put(make_directory))
        .route("/api/v1/workspaces/{id}/file/move", post(move_path))
        .route("/api/v1/workspaces/{id}/file/copy", post(copy_path))
}

#[derive(Debug, Default, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct PathQuery {
    /// Workspace-relative path, the root when omitted.
    #[serde(default)]
    pub path: String,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct FileContent {
    pub path: String,
    pub content: String,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct PathRequest {
    pub path: String,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct TransferRequest {
    pub from: String,
    pub to: String,
}

#[utoipa::path(
    get,
    path = "/api/v1/workspaces/{id}/files",
    params(("id" = String, Path, description = "Workspace id"), PathQuery),
    responses((status = 200, description = "Immediate children", body = [FileNode])),
    tag = "files"
)]
pub async fn list_files(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
    Path(id): Path<String>,
    Query(query): Query<PathQuery>,
) -> ApiResult<Json<Vec<FileNode>>> {
    let entries = state
        .orchestrator
        .list_files(&id, &user.username, &query.path)
        .await?;
    Ok(Json(entries))
}

#[utoipa::path(
    get,
    path = "/api/v1/workspaces/{id}/tree",
    params(("id" = String, Path, description = "Workspace id"), PathQuery),
    responses((status = 200, description = "Recursive tree", body = FileNode)),
    tag = "files"
)]
pub async fn file_tree(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
    Path(id): Path<String>,
    Query(query): Query<PathQuery>,
) -> ApiResult<Json<FileNode>> {
    let tree = state
        .orchestrator
        .file_tree(&id, &user.username, &query.path)
        .await?;
    Ok(Json(tree))
}

#[utoipa::path(
    get,
    path = "/api/v1/workspaces/{id}/file",
    params(("id" = String, Path, description = "Workspace id"), PathQuery),
    responses(
        (status = 200, body = FileContent),
        (status = 400, description = "Path escapes the workspace or is not text"),
        (status = 404, description = "No such file")
    ),
    tag = "files"
)]
pub async fn read_file(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
    Path(id): Path<String>,
    Query(query): Query<PathQuery>,
) -> ApiResult<Json<FileContent>> {
    let content = state
        .orchestrator
        .read_file(&id, &user.username, &query.path)
        .await?;
    Ok(Json(FileContent {
        path: query.path,
        content,
    }))
}

#[utoipa::path(
    put,
    path = "/api/v1/workspaces/{id}/file",
    params(("id" = String, Path, description = "Workspace id")),
    request_body = FileContent,
    responses((status = 200, description = "File written, parents created")),
    tag = "files"
)]
pub async fn write_file(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
    Path(id): Path<String>,
    Json(req): Json<FileContent>,
) -> ApiResult<Json<Value>> {
    state
        .orchestrator
        .write_file(&id, &user.username, &req.path, req.content)
        .await?;
    Ok(Json(json!({ "path": req.path })))
}

#[utoipa::path(
    put,
    path = "/api/v1/workspaces/{id}/directory",
    params(("id" = String, Path, description = "Workspace id")),
    request_body = PathRequest,
    responses((status = 200, description = "Directory created")),
    tag = "files"
)]
pub async fn make_directory(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
    Path(id): Path<String>,
    Json(req): Json<PathRequest>,
) -> ApiResult<Json<Value>> {
    state
        .orchestrator
        .make_directory(&id, &user.username, &req.path)
        .await?;
    Ok(Json(json!({ "path": req.path })))
}

#[utoipa::path(
    delete,
    path = "/api/v1/workspaces/{id}/file",
    params(("id" = String, Path, description = "Workspace id"), PathQuery),
    responses((status = 200, description = "File or directory tree removed")),
    tag = "files"
)]
pub async fn delete_path(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
    Path(id): Path<String>,
    Query(query): Query<PathQuery>,
) -> ApiResult<Json<Value>> {
    state
        .orchestrator
        .delete_path(&id, &user.username, &query.path)
        .await?;
    Ok(Json(json!({ "message": "Deleted", "path": query.path })))
}

#[utoipa::path(
    post,
    path = "/api/v1/workspaces/{id}/file/move",
    params(("id" = String, Path, description = "Workspace id")),
    request_body = TransferRequest,
    responses(
        (status = 200, description = "Moved"),
        (status = 400, description = "Destination exists or lies inside the source")
    ),
    tag = "files"
)]
pub async fn move_path(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
    Path(id): Path<String>,
    Json(req): Json<TransferRequest>,
) -> ApiResult<Json<Value>> {
    state
        .orchestrator
        .move_path(&id, &user.username, &req.from, &req.to)
        .await?;
    Ok(Json(json!({ "from": req.from, "to": req.to })))
}

#[utoipa::path(
    post,
    path = "/api/v1/workspaces/{id}/file/copy",
    params(("id" = String, Path, description = "Workspace id")),
    request_body = TransferRequest,
    responses(
        (status = 200, description = "Copied, directories recursively"),
        (status = 400, description = "Destination exists or lies inside the source")
    ),
    tag = "files"
)]
pub async fn copy_path(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
    Path(id): Path<String>,
    Json(req): Json<TransferRequest>,
) -> ApiResult<Json<Value>> {
    state
        .orchestrator
        .copy_path(&id, &user.username, &req.from, &req.to)
        .await?;
    Ok(Json(json!({ "from": req.from, "to": req.to })))
}
