use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use serde_json::json;
use std::sync::Arc;

use crate::metrics;
use crate::services::AppState;

pub mod questions;
pub mod sessions;

pub async fn health_check(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let store_health = match tokio::time::timeout(
        std::time::Duration::from_secs(1),
        state.store.ping(),
    )
    .await
    {
        Ok(Ok(())) => json!({ "status": "healthy" }),
        Ok(Err(e)) => json!({ "status": "unhealthy", "error": format!("{:#}", e) }),
        Err(_) => json!({ "status": "unhealthy", "error": "Store ping timeout after 1s" }),
    };
    let healthy = store_health["status"] == "healthy";

    let status_code = if healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (
        status_code,
        Json(json!({
            "status": if healthy { "healthy" } else { "degraded" },
            "service": "questtutor-api",
            "version": env!("CARGO_PKG_VERSION"),
            "active_sessions": state.sessions.active_session_count().await,
            "dependencies": { "store": store_health },
        })),
    )
}

pub async fn metrics_handler() -> impl IntoResponse {
    match metrics::render_metrics() {
        Ok(metrics_text) => (StatusCode::OK, metrics_text),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("Failed to render metrics: {}", e),
        ),
    }
}
