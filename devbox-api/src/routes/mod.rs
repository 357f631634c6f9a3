pub mod files;
pub mod health;
pub mod operations;
pub mod preview;
pub mod templates;
pub mod workspaces;

use crate::{api_docs::ApiDoc, auth::auth_middleware, state::AppState};
use axum::{middleware, routing::get, Json, Router};
use devbox_orchestrator::WorkspaceOrchestrator;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use utoipa::OpenApi;

pub fn create_app(orchestrator: WorkspaceOrchestrator) -> Router {
    let state = AppState::new(orchestrator);

    // Allow CORS for local development (frontend on different port)
    let cors = CorsLayer::permissive();

    Router::new()
        .merge(health::routes()) // Health routes don't need auth
        .merge(templates::routes())
        .route("/api-docs/openapi.json", get(openapi_spec))
        .merge(
            workspaces::routes()
                .merge(files::routes())
                .merge(operations::routes())
                .merge(preview::routes())
                .layer(middleware::from_fn(auth_middleware)), // Everything scoped to an owner
        )
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn openapi_spec() -> Json<utoipa::openapi::OpenApi> {
    Json(ApiDoc::openapi())
}
