// src/handlers/workflow.rs
//! Synchronous single-pipeline endpoint

use axum::{extract::Extension, routing::post, Json, Router};
use std::sync::Arc;

use super::{ApiError, ApiResult};
use crate::models::PipelineRequest;
use crate::workflow::PipelineReport;
use crate::AppState;

pub fn workflow_routes() -> Router {
    Router::new().route("/api/workflow/run", post(run_workflow))
}

/// Reject requests that could never get past the download stage.
pub fn validate_request(request: &PipelineRequest) -> Result<(), ApiError> {
    if request.source_url.trim().is_empty() {
        return Err(ApiError::BadRequest("UrlVideo must not be empty".to_string()));
    }
    Ok(())
}

/// POST /api/workflow/run - run one request to completion and return its report
pub async fn run_workflow(
    Extension(state): Extension<Arc<AppState>>,
    Json(request): Json<PipelineRequest>,
) -> ApiResult<Json<PipelineReport>> {
    validate_request(&request)?;

    tracing::info!("🎬 Workflow requested for {}", request.source_url);
    let report = state
        .orchestrator
        .run_request(state.provider.as_ref(), &request)
        .await?;
    Ok(Json(report))
}
