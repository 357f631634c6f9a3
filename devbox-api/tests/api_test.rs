//! Integration tests for REST API endpoints
//!
//! Drives the router with `oneshot` against a mock container runtime: workspace
//! lifecycle, file access, catalog, operations, preview and error status mapping.

mod common;

use axum::http::StatusCode;
use common::{extract_json_body, TestClient};
use devbox_api::routes::files::FileContent;
use devbox_api::routes::preview::PreviewResponse;
use devbox_api::routes::templates::TemplateSummary;
use devbox_api::routes::workspaces::LifecycleResponse;
use devbox_orchestrator::{FileNode, Operation, PreviewStatus, Workspace, WorkspaceStatus};
use serde_json::{json, Value};

#[tokio::test]
async fn test_create_workspace_endpoint() {
    let client = TestClient::new().await;

    let response = client
        .post(
            "/api/v1/workspaces",
            Some("testuser"),
            Some(json!({ "template_id": "node-hello" })),
        )
        .await;

    assert_eq!(response.status(), StatusCode::CREATED);

    let workspace: Workspace = extract_json_body(response).await;
    assert_eq!(workspace.owner_id, "testuser"); // From the auth header
    assert_eq!(workspace.template_id, "node-hello");
    assert_eq!(workspace.status, WorkspaceStatus::Running);
    assert!(workspace.public_port.is_some());
}

#[tokio::test]
async fn test_create_without_body_uses_default_template() {
    let client = TestClient::new().await;

    let response = client.post("/api/v1/workspaces", Some("testuser"), None).await;

    assert_eq!(response.status(), StatusCode::CREATED);
    let workspace: Workspace = extract_json_body(response).await;
    assert_eq!(workspace.template_id, "node-hello");
}

#[tokio::test]
async fn test_create_workspace_without_auth_fails() {
    let client = TestClient::new().await;

    let response = client
        .post("/api/v1/workspaces", None, Some(json!({ "template_id": "node-hello" })))
        .await;

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(client.runtime().created_count(), 0);
}

#[tokio::test]
async fn test_unknown_template_returns_400() {
    let client = TestClient::new().await;

    let response = client
        .post(
            "/api/v1/workspaces",
            Some("testuser"),
            Some(json!({ "template_id": "does-not-exist" })),
        )
        .await;

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body: Value = extract_json_body(response).await;
    assert!(body["error"].as_str().unwrap().contains("does-not-exist"));
}

#[tokio::test]
async fn test_failed_provision_returns_500() {
    let client = TestClient::new().await;
    client.runtime().fail_next_create("image not found");

    let response = client
        .post(
            "/api/v1/workspaces",
            Some("testuser"),
            Some(json!({ "template_id": "go-api" })),
        )
        .await;

    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);

    // The record survives with status error
    let listed: Vec<Workspace> =
        extract_json_body(client.get("/api/v1/workspaces", Some("testuser")).await).await;
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].status, WorkspaceStatus::Error);
}

#[tokio::test]
async fn test_list_workspaces_only_returns_own() {
    let client = TestClient::new().await;
    client.fixture_workspace("alice", "python-core").await;
    client.fixture_workspace("alice", "python-core").await;
    client.fixture_workspace("bob", "python-core").await;

    let response = client.get("/api/v1/workspaces", Some("alice")).await;
    assert_eq!(response.status(), StatusCode::OK);

    let workspaces: Vec<Workspace> = extract_json_body(response).await;
    assert_eq!(workspaces.len(), 2);
    assert!(workspaces.iter().all(|w| w.owner_id == "alice"));
}

#[tokio::test]
async fn test_get_workspace_of_other_owner_is_404() {
    let client = TestClient::new().await;
    let workspace = client.fixture_workspace("alice", "python-core").await;
    let uri = format!("/api/v1/workspaces/{}", workspace.id);

    let own = client.get(&uri, Some("alice")).await;
    assert_eq!(own.status(), StatusCode::OK);

    let other = client.get(&uri, Some("bob")).await;
    assert_eq!(other.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_get_nonexistent_workspace() {
    let client = TestClient::new().await;

    let response = client
        .get("/api/v1/workspaces/nonexistent-id", Some("testuser"))
        .await;

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let body: Value = extract_json_body(response).await;
    assert!(body["error"].is_string());
}

#[tokio::test]
async fn test_stop_start_and_ensure_running() {
    let client = TestClient::new().await;
    let workspace = client.fixture_workspace("alice", "node-hello").await;
    let base = format!("/api/v1/workspaces/{}", workspace.id);

    let stopped: LifecycleResponse =
        extract_json_body(client.post(&format!("{}/stop", base), Some("alice"), None).await).await;
    assert_eq!(stopped.status, WorkspaceStatus::Stopped);
    assert_eq!(stopped.public_port, 0);

    let started: LifecycleResponse =
        extract_json_body(client.post(&format!("{}/start", base), Some("alice"), None).await).await;
    assert_eq!(started.status, WorkspaceStatus::Running);
    assert!(started.public_port > 0);

    let container = started.container_ref.clone().unwrap();
    client.runtime().remove_out_of_band(&container);

    let response = client
        .post(&format!("{}/ensure-running", base), Some("alice"), None)
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    let healed: LifecycleResponse = extract_json_body(response).await;
    assert_eq!(healed.id, workspace.id);
    assert_eq!(healed.status, WorkspaceStatus::Running);
    assert_ne!(healed.container_ref.as_deref(), Some(container.as_str()));
}

#[tokio::test]
async fn test_portless_workspace_reports_zero_port() {
    let client = TestClient::new().await;
    let workspace = client.fixture_workspace("alice", "python-core").await;

    let response = client
        .post(
            &format!("/api/v1/workspaces/{}/ensure-running", workspace.id),
            Some("alice"),
            None,
        )
        .await;
    let body: LifecycleResponse = extract_json_body(response).await;
    assert_eq!(body.public_port, 0);

    let preview: PreviewResponse = extract_json_body(
        client
            .get(&format!("/api/v1/workspaces/{}/preview", workspace.id), Some("alice"))
            .await,
    )
    .await;
    assert_eq!(preview.status, PreviewStatus::NotApplicable);
    assert_eq!(preview.public_port, 0);
}

#[tokio::test]
async fn test_delete_workspace_endpoint() {
    let client = TestClient::new().await;
    let workspace = client.fixture_workspace("alice", "node-hello").await;
    let uri = format!("/api/v1/workspaces/{}", workspace.id);

    let response = client.delete(&uri, Some("alice")).await;
    assert_eq!(response.status(), StatusCode::OK);

    assert!(!client
        .runtime()
        .container_exists(workspace.container_ref.as_deref().unwrap()));
    assert!(!std::path::Path::new(&workspace.root_path).exists());

    let response = client.get(&uri, Some("alice")).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_file_round_trip() {
    let client = TestClient::new().await;
    let workspace = client.fixture_workspace("alice", "node-hello").await;
    let base = format!("/api/v1/workspaces/{}", workspace.id);

    let response = client
        .put(
            &format!("{}/file", base),
            Some("alice"),
            json!({ "path": "src/hello.txt", "content": "hello from the editor" }),
        )
        .await;
    assert_eq!(response.status(), StatusCode::OK);

    let file: FileContent = extract_json_body(
        client
            .get(&format!("{}/file?path=src/hello.txt", base), Some("alice"))
            .await,
    )
    .await;
    assert_eq!(file.content, "hello from the editor");

    let listing: Vec<FileNode> =
        extract_json_body(client.get(&format!("{}/files?path=src", base), Some("alice")).await)
            .await;
    assert_eq!(listing.len(), 1);
    assert_eq!(listing[0].path, "src/hello.txt");

    let tree: FileNode =
        extract_json_body(client.get(&format!("{}/tree", base), Some("alice")).await).await;
    let children = tree.children.unwrap();
    assert!(children.iter().any(|c| c.name == "src"));
    assert!(children.iter().any(|c| c.name == "package.json"));
}

#[tokio::test]
async fn test_directory_move_copy_delete() {
    let client = TestClient::new().await;
    let workspace = client.fixture_workspace("alice", "python-core").await;
    let base = format!("/api/v1/workspaces/{}", workspace.id);

    let response = client
        .put(&format!("{}/directory", base), Some("alice"), json!({ "path": "pkg" }))
        .await;
    assert_eq!(response.status(), StatusCode::OK);

    let response = client
        .post(
            &format!("{}/file/copy", base),
            Some("alice"),
            Some(json!({ "from": "main.py", "to": "pkg/main.py" })),
        )
        .await;
    assert_eq!(response.status(), StatusCode::OK);

    let response = client
        .post(
            &format!("{}/file/move", base),
            Some("alice"),
            Some(json!({ "from": "pkg/main.py", "to": "main.py" })),
        )
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = client
        .post(
            &format!("{}/file/move", base),
            Some("alice"),
            Some(json!({ "from": "pkg/main.py", "to": "pkg/app.py" })),
        )
        .await;
    assert_eq!(response.status(), StatusCode::OK);

    let response = client
        .delete(&format!("{}/file?path=pkg", base), Some("alice"))
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    assert!(!std::path::Path::new(&workspace.root_path).join("pkg").exists());
}

#[tokio::test]
async fn test_path_traversal_returns_400() {
    let client = TestClient::new().await;
    let workspace = client.fixture_workspace("alice", "node-hello").await;
    let base = format!("/api/v1/workspaces/{}", workspace.id);

    let response = client
        .get(&format!("{}/file?path=../../etc/passwd", base), Some("alice"))
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = client
        .put(
            &format!("{}/file", base),
            Some("alice"),
            json!({ "path": "/tmp/escape", "content": "x" }),
        )
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_missing_file_returns_404() {
    let client = TestClient::new().await;
    let workspace = client.fixture_workspace("alice", "node-hello").await;

    let response = client
        .get(
            &format!("/api/v1/workspaces/{}/file?path=docs/nope.txt", workspace.id),
            Some("alice"),
        )
        .await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    // Host layout stays private
    let body: serde_json::Value = extract_json_body(response).await;
    let message = body["error"].as_str().unwrap();
    assert_eq!(message, "Not found: path docs/nope.txt");
    assert!(!message.contains(&workspace.root_path));
}

#[tokio::test]
async fn test_list_templates() {
    let client = TestClient::new().await;

    // The catalog needs no owner
    let response = client.get("/api/v1/templates", None).await;
    assert_eq!(response.status(), StatusCode::OK);

    let templates: Vec<TemplateSummary> = extract_json_body(response).await;
    let node = templates.iter().find(|t| t.id == "node-hello").unwrap();
    assert_eq!(node.port, Some(3000));
    assert!(templates
        .iter()
        .any(|t| t.id == "python-core" && t.port.is_none()));
}

#[tokio::test]
async fn test_operations_endpoint() {
    let client = TestClient::new().await;
    let workspace = client.fixture_workspace("alice", "python-core").await;
    let base = format!("/api/v1/workspaces/{}", workspace.id);
    client.post(&format!("{}/stop", base), Some("alice"), None).await;

    let operations: Vec<Operation> =
        extract_json_body(client.get(&format!("{}/operations", base), Some("alice")).await).await;
    assert_eq!(operations.len(), 2);

    let creates: Vec<Operation> = extract_json_body(
        client
            .get(&format!("{}/operations?type=create", base), Some("alice"))
            .await,
    )
    .await;
    assert_eq!(creates.len(), 1);

    let response = client
        .get(&format!("{}/operations", base), Some("bob"))
        .await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_health_endpoints() {
    let client = TestClient::new().await;

    let health: Value = extract_json_body(client.get("/health", None).await).await;
    assert_eq!(health["status"], "ok");
    assert_eq!(health["service"], "devbox-api");

    let ready: Value = extract_json_body(client.get("/health/ready", None).await).await;
    assert_eq!(ready["status"], "ready");
    assert_eq!(ready["database"], "connected");
}

#[tokio::test]
async fn test_openapi_document_is_served() {
    let client = TestClient::new().await;

    let response = client.get("/api-docs/openapi.json", None).await;
    assert_eq!(response.status(), StatusCode::OK);

    let doc: Value = extract_json_body(response).await;
    assert!(doc["paths"]["/api/v1/workspaces/{id}/ensure-running"].is_object());
}
