//! Workspace orchestration business logic
//!
//! This crate owns the workspace lifecycle: template lookup, persisted workspace state,
//! container creation and reconciliation against the daemon, in-container process
//! supervision, and filesystem access to each workspace's bind-mounted directory.
//! It is consumed by the devbox-api HTTP service but can also be driven directly by
//! background workers or tests.

pub mod config;
pub mod db;
pub mod error;
pub mod fs_gateway;
pub mod lifecycle;
pub mod locks;
pub mod operation;
pub mod orchestrator;
pub mod preview;
pub mod reconcile;
pub mod store;
pub mod supervisor;
pub mod template;
pub mod workspace;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

pub use config::OrchestratorConfig;
pub use error::{OrchestratorError, Result};
pub use fs_gateway::{FileKind, FileNode};
pub use operation::{Operation, OperationStatus, OperationType};
pub use orchestrator::WorkspaceOrchestrator;
pub use preview::{PreviewPolicy, PreviewStatus};
pub use template::{ReadinessCheck, Template, TemplateRegistry, DEFAULT_TEMPLATE_ID};
pub use workspace::{Workspace, WorkspaceFilters, WorkspaceStatus};
