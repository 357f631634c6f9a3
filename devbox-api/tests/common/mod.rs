//! Common test utilities and helpers for devbox-api tests
//!
//! Wraps the orchestrator's [`TestHarness`] (mock container runtime, in-memory database,
//! temporary workspaces root) in a router and offers request helpers.

#![allow(dead_code)]

use std::sync::Arc;

use axum::{
    body::Body,
    http::{Request, Response},
    Router,
};
use devbox_orchestrator::test_utils::TestHarness;
use devbox_orchestrator::Workspace;
use devbox_runtime::mock::MockRuntime;
use tower::ServiceExt;

/// Helper to extract JSON body from axum response
pub async fn extract_json_body<T>(response: Response<Body>) -> T
where
    T: serde::de::DeserializeOwned,
{
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("Failed to read response body");

    serde_json::from_slice(&body).expect("Failed to deserialize JSON")
}

/// TestClient to encapsulate API interaction logic
pub struct TestClient {
    pub app: Router,
    pub harness: TestHarness,
}

impl TestClient {
    pub async fn new() -> Self {
        let harness = TestHarness::new().await;
        let app = devbox_api::create_app(harness.orchestrator.clone());
        Self { app, harness }
    }

    pub fn runtime(&self) -> &Arc<MockRuntime> {
        &self.harness.runtime
    }

    /// Fixture: create a workspace directly through the orchestrator
    pub async fn fixture_workspace(&self, owner: &str, template_id: &str) -> Workspace {
        self.harness
            .orchestrator
            .create_workspace(owner, template_id)
            .await
            .expect("Failed to create fixture workspace")
    }

    /// Send a request to the API
    pub async fn send_request(&self, request: Request<Body>) -> Response<Body> {
        // Router is cheap to clone
        self.app.clone().oneshot(request).await.unwrap()
    }

    async fn send(
        &self,
        method: &str,
        uri: &str,
        user: Option<&str>,
        body: Option<serde_json::Value>,
    ) -> Response<Body> {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(user) = user {
            builder = builder.header("x-user", user);
        }

        let body = match body {
            Some(json) => {
                builder = builder.header("content-type", "application/json");
                Body::from(json.to_string())
            }
            None => Body::empty(),
        };

        self.send_request(builder.body(body).unwrap()).await
    }

    pub async fn get(&self, uri: &str, user: Option<&str>) -> Response<Body> {
        self.send("GET", uri, user, None).await
    }

    pub async fn post(
        &self,
        uri: &str,
        user: Option<&str>,
        body: Option<serde_json::Value>,
    ) -> Response<Body> {
        self.send("POST", uri, user, body).await
    }

    pub async fn put(&self, uri: &str, user: Option<&str>, body: serde_json::Value) -> Response<Body> {
        self.send("PUT", uri, user, Some(body)).await
    }

    pub async fn delete(&self, uri: &str, user: Option<&str>) -> Response<Body> {
        self.send("DELETE", uri, user, None).await
    }
}
