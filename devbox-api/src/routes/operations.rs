use crate::{auth::AuthenticatedUser, error::ApiResult, state::AppState};
use axum::{
    extract::{Path, Query, State},
    routing::get,
    Extension, Json, Router,
};
use devbox_orchestrator::{Operation, OperationStatus, OperationType};
use serde::Deserialize;
use utoipa::IntoParams;

pub fn routes() -> Router<AppState> {
    Router::new().route("/api/v1/workspaces/{id}/operations", get(list_operations))
}

#[derive(Debug, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct OperationsQuery {
    #[serde(rename = "type")]
    pub operation_type: Option<String>,
    pub status: Option<String>,
}

/// Operation log of one workspace, newest first.
#[utoipa::path(
    get,
    path = "/api/v1/workspaces/{id}/operations",
    params(("id" = String, Path, description = "Workspace id"), OperationsQuery),
    responses((status = 200, body = [Operation])),
    tag = "operations"
)]
pub async fn list_operations(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
    Path(id): Path<String>,
    Query(query): Query<OperationsQuery>,
) -> ApiResult<Json<Vec<Operation>>> {
    // Parse operation_type from string
    let operation_type = query
        .operation_type
        .and_then(|s| serde_json::from_str::<OperationType>(&format!("\"{}\"", s)).ok());

    // Parse status from string
    let status = query
        .status
        .and_then(|s| serde_json::from_str::<OperationStatus>(&format!("\"{}\"", s)).ok());

    let operations = state
        .orchestrator
        .operations(&id, &user.username)
        .await?
        .into_iter()
        .filter(|op| operation_type.is_none_or(|t| op.operation_type == t))
        .filter(|op| status.is_none_or(|s| op.status == s))
        .collect();

    Ok(Json(operations))
}
