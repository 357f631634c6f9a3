use crate::{auth::AuthenticatedUser, error::ApiResult, state::AppState};
use axum::{
    extract::{Path, State},
    routing::get,
    Extension, Json, Router,
};
use devbox_orchestrator::PreviewStatus;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

pub fn routes() -> Router<AppState> {
    Router::new().route("/api/v1/workspaces/{id}/preview", get(preview))
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct PreviewResponse {
    pub status: PreviewStatus,
    /// 0 when nothing is published.
    pub public_port: u16,
}

/// One TCP probe of the published port. Pollers call this repeatedly.
#[utoipa::path(
    get,
    path = "/api/v1/workspaces/{id}/preview",
    params(("id" = String, Path, description = "Workspace id")),
    responses((status = 200, body = PreviewResponse)),
    tag = "workspaces"
)]
pub async fn preview(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
    Path(id): Path<String>,
) -> ApiResult<Json<PreviewResponse>> {
    let workspace = state.orchestrator.get_workspace(&id, &user.username).await?;
    let status = state.orchestrator.preview(&id, &user.username).await?;

    Ok(Json(PreviewResponse {
        status,
        public_port: workspace.port_or_zero(),
    }))
}
