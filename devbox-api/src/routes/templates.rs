use crate::state::AppState;
use axum::{extract::State, routing::get, Json, Router};
use devbox_orchestrator::Template;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

pub fn routes() -> Router<AppState> {
    Router::new().route("/api/v1/templates", get(list_templates))
}

/// Catalog entry; scripts and file contents stay server-side.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct TemplateSummary {
    pub id: String,
    pub name: String,
    pub language: String,
    pub image: String,
    pub port: Option<u16>,
    pub compiler: Option<String>,
    pub build_tool: Option<String>,
}

impl From<&Template> for TemplateSummary {
    fn from(template: &Template) -> Self {
        Self {
            id: template.id.clone(),
            name: template.name.clone(),
            language: template.language.clone(),
            image: template.image.clone(),
            port: template.port,
            compiler: template.compiler.clone(),
            build_tool: template.build_tool.clone(),
        }
    }
}

#[utoipa::path(
    get,
    path = "/api/v1/templates",
    responses((status = 200, body = [TemplateSummary])),
    tag = "templates"
)]
pub async fn list_templates(State(state): State<AppState>) -> Json<Vec<TemplateSummary>> {
    Json(
        state
            .orchestrator
            .templates()
            .iter()
            .map(TemplateSummary::from)
            .collect(),
    )
}
