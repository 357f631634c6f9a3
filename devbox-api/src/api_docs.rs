use crate::routes::{
    files::{FileContent, PathRequest, TransferRequest},
    preview::PreviewResponse,
    templates::TemplateSummary,
    workspaces::{CreateWorkspaceRequest, LifecycleResponse},
};
use devbox_orchestrator::{
    FileKind, FileNode, Operation, OperationStatus, OperationType, PreviewStatus, Workspace,
    WorkspaceStatus,
};
use utoipa::OpenApi;

#[derive(OpenApi)]
#[openapi(
    paths(
        crate::routes::health::health_check,
        crate::routes::health::readiness_check,
        crate::routes::templates::list_templates,
        crate::routes::workspaces::list_workspaces,
        crate::routes::workspaces::create_workspace,
        crate::routes::workspaces::get_workspace,
        crate::routes::workspaces::delete_workspace,
        crate::routes::workspaces::start_workspace,
        crate::routes::workspaces::stop_workspace,
        crate::routes::workspaces::ensure_running,
        crate::routes::preview::preview,
        crate::routes::files::list_files,
        crate::routes::files::file_tree,
        crate::routes::files::read_file,
        crate::routes::files::write_file,
        crate::routes::files::make_directory,
        crate::routes::files::delete_path,
        crate::routes::files::move_path,
        crate::routes::files::copy_path,
        crate::routes::operations::list_operations,
    ),
    components(
        schemas(
            Workspace,
            WorkspaceStatus,
            CreateWorkspaceRequest,
            LifecycleResponse,
            TemplateSummary,
            PreviewResponse,
            PreviewStatus,
            FileNode,
            FileKind,
            FileContent,
            PathRequest,
            TransferRequest,
            Operation,
            OperationStatus,
            OperationType
        )
    ),
    tags(
        (name = "devbox-api", description = "Workspace container orchestration API")
    )
)]
pub struct ApiDoc;
