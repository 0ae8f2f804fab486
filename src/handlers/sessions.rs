// src/handlers/sessions.rs
use axum::{
    extract::{Extension, Path},
    routing::get,
    Json, Router,
};
use serde::Serialize;
use std::sync::Arc;

use super::{ApiError, ApiResult};
use crate::models::{Deliverable, Session, SessionId, Stage};
use crate::AppState;

pub fn session_routes() -> Router {
    Router::new().route("/api/sessions/:session_id", get(get_session))
}

#[derive(Debug, Serialize)]
pub struct SessionDetails {
    pub session: Session,
    pub stages: Vec<Stage>,
    pub deliverables: Vec<Deliverable>,
}

/// GET /api/sessions/:session_id - session row with its stage history
pub async fn get_session(
    Path(session_id): Path<SessionId>,
    Extension(state): Extension<Arc<AppState>>,
) -> ApiResult<Json<SessionDetails>> {
    let store = state.provider.open().await?;
    let session = store
        .session(session_id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("Session {}", session_id)))?;
    let stages = store.stages(session_id).await?;
    let deliverables = store.deliverables(session_id).await?;

    Ok(Json(SessionDetails {
        session,
        stages,
        deliverables,
    }))
}
