// src/handlers/health.rs
use axum::{extract::Extension, http::StatusCode, routing::get, Json, Router};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;

use crate::store::StoreError;
use crate::AppState;

const HEALTH_OPEN_TIMEOUT: Duration = Duration::from_secs(5);

pub fn health_routes() -> Router {
    Router::new().route("/health", get(health))
}

/// GET /health - store reachability plus the configured integrations
pub async fn health(Extension(state): Extension<Arc<AppState>>) -> (StatusCode, Json<Value>) {
    // Every handle may be held by a long pipeline; do not queue behind them
    let store_check = match tokio::time::timeout(HEALTH_OPEN_TIMEOUT, state.provider.open()).await {
        Ok(Ok(store)) => store.ping().await,
        Ok(Err(e)) => Err(e),
        Err(_) => Err(StoreError::Unavailable("no free store handle".to_string())),
    };

    let (status, store_status) = match store_check {
        Ok(()) => (StatusCode::OK, "ok".to_string()),
        Err(e) => {
            tracing::error!("Health check failed: {}", e);
            (StatusCode::SERVICE_UNAVAILABLE, e.to_string())
        }
    };

    (
        status,
        Json(json!({
            "status": if status.is_success() { "healthy" } else { "unhealthy" },
            "version": env!("CARGO_PKG_VERSION"),
            "store": {
                "backend": state.provider.backend(),
                "status": store_status,
            },
            "integrations": state.config.integration_summary(),
        })),
    )
}
