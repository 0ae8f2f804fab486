// src/handlers/mod.rs
pub mod batch;
pub mod error;
pub mod health;
pub mod sessions;
pub mod workflow;

pub use error::{ApiError, ApiResult};

use axum::Router;

/// Every pipeline route, ready for the state and middleware layers.
pub fn api_routes() -> Router {
    Router::new()
        .merge(health::health_routes())
        .merge(workflow::workflow_routes())
        .merge(batch::batch_routes())
        .merge(sessions::session_routes())
}
