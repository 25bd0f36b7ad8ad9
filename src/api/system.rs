use axum::{Json, extract::State, http::StatusCode};
use std::sync::Arc;

use super::types::HealthResponse;
use super::{ApiResponse, AppState};

/// GET /health
/// Reports 503 when the database is unreachable
pub async fn health(
    State(state): State<Arc<AppState>>,
) -> (StatusCode, Json<ApiResponse<HealthResponse>>) {
    let (status, database) = match state.store().ping().await {
        Ok(()) => (StatusCode::OK, "ok"),
        Err(e) => {
            tracing::error!(error = %e, "Health check database ping failed");
            (StatusCode::SERVICE_UNAVAILABLE, "unavailable")
        }
    };

    let body = HealthResponse {
        status: if status == StatusCode::OK { "ok" } else { "degraded" },
        version: env!("CARGO_PKG_VERSION"),
        uptime_seconds: state.start_time.elapsed().as_secs(),
        database,
    };

    (status, Json(ApiResponse::success(body)))
}
