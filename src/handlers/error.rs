// src/handlers/error.rs
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

use crate::store::StoreError;
use crate::workflow::PipelineError;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Resource not found: {0}")]
    NotFound(String),

    #[error("Invalid request: {0}")]
    BadRequest(String),

    #[error("Internal server error: {0}")]
    Internal(String),

    #[error(transparent)]
    Pipeline(#[from] PipelineError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

pub type ApiResult<T> = Result<T, ApiError>;

impl ApiError {
    fn parts(&self) -> (StatusCode, &'static str) {
        match self {
            ApiError::NotFound(_) => (StatusCode::NOT_FOUND, "NOT_FOUND"),
            ApiError::BadRequest(_) => (StatusCode::BAD_REQUEST, "BAD_REQUEST"),
            ApiError::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR"),
            ApiError::Pipeline(PipelineError::Store(_)) | ApiError::Store(_) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "STORE_ERROR")
            }
            ApiError::Pipeline(_) => (StatusCode::INTERNAL_SERVER_ERROR, "PIPELINE_FAILED"),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_code) = self.parts();
        let message = match &self {
            ApiError::Pipeline(err) => format!("Error in workflow: {}", err),
            other => other.to_string(),
        };

        if status.is_server_error() {
            tracing::error!("{} ({})", message, error_code);
        }

        let mut body = json!({
            "error": {
                "code": error_code,
                "message": message,
            }
        });
        if let ApiError::Pipeline(err) = &self {
            if let Some(kind) = err.failed_stage() {
                body["error"]["stage"] = json!(kind.as_str());
            }
        }

        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::StageKind;
    use crate::workflow::{StageError, StageFailure};

    #[test]
    fn test_status_codes() {
        assert_eq!(
            ApiError::NotFound("job".into()).into_response().status(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            ApiError::BadRequest("empty".into()).into_response().status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ApiError::Store(StoreError::SessionNotFound(4)).into_response().status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_pipeline_failure_names_the_stage() {
        let err = ApiError::from(PipelineError::Stage(StageFailure {
            kind: StageKind::Transcribe,
            attempts: 3,
            source: StageError::Transcription("timeout".into()),
        }));
        let (status, code) = err.parts();
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(code, "PIPELINE_FAILED");
        assert!(err.to_string().contains("timeout"));
    }
}
