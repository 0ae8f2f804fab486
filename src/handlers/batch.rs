// src/handlers/batch.rs
//! Batch endpoints: background batches with polling, and a blocking variant

use axum::{
    extract::{Extension, Path},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use super::workflow::validate_request;
use super::{ApiError, ApiResult};
use crate::jobs::{spawn_batch, BatchJob, JobId};
use crate::models::PipelineRequest;
use crate::workflow::BatchReport;
use crate::AppState;

pub fn batch_routes() -> Router {
    Router::new()
        .route("/api/batch/start", post(start_batch))
        .route("/api/batch/run", post(run_batch))
        .route("/api/batch/jobs/:job_id", get(get_batch_job))
}

/// Either a bare list of requests or a wrapper that also overrides the wave size.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum BatchBody {
    Items(Vec<PipelineRequest>),
    Wrapped {
        items: Vec<PipelineRequest>,
        #[serde(default)]
        wave_size: Option<usize>,
    },
}

impl BatchBody {
    fn into_parts(self, default_wave_size: usize) -> (Vec<PipelineRequest>, usize) {
        match self {
            BatchBody::Items(items) => (items, default_wave_size),
            BatchBody::Wrapped { items, wave_size } => {
                (items, wave_size.unwrap_or(default_wave_size))
            }
        }
    }
}

/// Every item must be runnable; the first bad one is named in the error.
fn validate_items(items: &[PipelineRequest]) -> ApiResult<()> {
    for (index, item) in items.iter().enumerate() {
        validate_request(item).map_err(|e| match e {
            ApiError::BadRequest(msg) => ApiError::BadRequest(format!("item {}: {}", index, msg)),
            other => other,
        })?;
    }
    Ok(())
}

#[derive(Debug, Serialize)]
pub struct BatchAccepted {
    pub message: String,
    pub job_id: JobId,
    pub total_items: usize,
    pub wave_size: usize,
    pub status_url: String,
}

/// POST /api/batch/start - accept a batch and process it in the background
pub async fn start_batch(
    Extension(state): Extension<Arc<AppState>>,
    Json(body): Json<BatchBody>,
) -> ApiResult<impl IntoResponse> {
    let (items, wave_size) = body.into_parts(state.config.batch.wave_size);
    if items.is_empty() {
        return Err(ApiError::BadRequest("No items provided".to_string()));
    }
    validate_items(&items)?;
    let wave_size = state.batch.effective_wave_size(wave_size);

    let total_items = items.len();
    let job_id = spawn_batch(
        state.job_manager.clone(),
        state.batch.clone(),
        items,
        wave_size,
    )
    .await;
    tracing::info!("📥 Batch {} accepted with {} items", job_id, total_items);

    let response = BatchAccepted {
        message: format!(
            "Batch processing started for {} items in waves of {}",
            total_items, wave_size
        ),
        status_url: format!("/api/batch/jobs/{}", job_id),
        job_id,
        total_items,
        wave_size,
    };
    Ok((StatusCode::ACCEPTED, Json(response)))
}

/// POST /api/batch/run - process every item and answer with the aggregate report
pub async fn run_batch(
    Extension(state): Extension<Arc<AppState>>,
    Json(body): Json<BatchBody>,
) -> ApiResult<Json<BatchReport>> {
    let (items, wave_size) = body.into_parts(state.config.batch.wave_size);
    validate_items(&items)?;
    Ok(Json(state.batch.run_batch(items, wave_size).await))
}

/// GET /api/batch/jobs/:job_id - background batch status
pub async fn get_batch_job(
    Path(job_id): Path<JobId>,
    Extension(state): Extension<Arc<AppState>>,
) -> ApiResult<Json<BatchJob>> {
    state
        .job_manager
        .get_job(&job_id)
        .await
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("Batch job {}", job_id)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_batch_body_accepts_bare_list() {
        let body: BatchBody = serde_json::from_str(
            r#"[{"UrlVideo": "https://vimeo.com/1", "TipoResumenGrabacionOnline": [1]}]"#,
        )
        .unwrap();
        let (items, wave_size) = body.into_parts(10);
        assert_eq!(items.len(), 1);
        assert_eq!(wave_size, 10);
    }

    #[test]
    fn test_blank_url_item_is_rejected_with_its_index() {
        let items = vec![
            PipelineRequest::new("https://vimeo.com/1"),
            PipelineRequest::new(""),
        ];
        match validate_items(&items) {
            Err(ApiError::BadRequest(msg)) => assert!(msg.starts_with("item 1:")),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_batch_body_accepts_wave_override() {
        let body: BatchBody = serde_json::from_str(
            r#"{"items": [{"url": "a"}, {"url": "b"}], "wave_size": 1}"#,
        )
        .unwrap();
        let (items, wave_size) = body.into_parts(10);
        assert_eq!(items.len(), 2);
        assert_eq!(wave_size, 1);
    }
}
