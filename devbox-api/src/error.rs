use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use devbox_orchestrator::OrchestratorError;
use serde_json::json;
use tracing::error;

pub type ApiResult<T> = Result<T, ApiError>;

#[derive(Debug)]
pub enum ApiError {
    NotFound(String),
    BadRequest(String),
    ServiceUnavailable(String),
    Internal(String),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::ServiceUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = match self {
            ApiError::NotFound(msg)
            | ApiError::BadRequest(msg)
            | ApiError::ServiceUnavailable(msg)
            | ApiError::Internal(msg) => msg,
        };

        (status, Json(json!({ "error": message }))).into_response()
    }
}

impl From<OrchestratorError> for ApiError {
    fn from(err: OrchestratorError) -> Self {
        match err {
            OrchestratorError::NotFound(what) => ApiError::NotFound(format!("Not found: {}", what)),
            OrchestratorError::InvalidInput(msg) => ApiError::BadRequest(msg),
            OrchestratorError::DaemonUnavailable(msg) => {
                ApiError::ServiceUnavailable(format!("Container daemon unavailable: {}", msg))
            }
            other => {
                error!(error = %other, "Request failed");
                ApiError::Internal(other.to_string())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        let cases = [
            (OrchestratorError::NotFound("ws-1".into()), StatusCode::NOT_FOUND),
            (OrchestratorError::InvalidInput("bad path".into()), StatusCode::BAD_REQUEST),
            (
                OrchestratorError::DaemonUnavailable("socket refused".into()),
                StatusCode::SERVICE_UNAVAILABLE,
            ),
            (
                OrchestratorError::Provision {
                    workspace_id: "ws-1".into(),
                    reason: "pull failed".into(),
                },
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
            (
                OrchestratorError::Template("broken".into()),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];

        for (err, expected) in cases {
            assert_eq!(ApiError::from(err).status(), expected);
        }
    }

    #[test]
    fn test_message_preserved() {
        match ApiError::from(OrchestratorError::InvalidInput("path traversal".into())) {
            ApiError::BadRequest(msg) => assert_eq!(msg, "path traversal"),
            other => panic!("unexpected {:?}", other),
        }
    }
}
