use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use database_manager::db::ConnectionFactory;

use crate::state::AppState;

/// Liveness: the process is up, whatever the databases are doing
#[tracing::instrument]
pub async fn health_check() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}

/// Readiness: 200 only while every pool passes its health check
#[tracing::instrument(skip(state))]
pub async fn readiness_check<F: ConnectionFactory>(
    State(state): State<AppState<F>>,
) -> impl IntoResponse {
    let report = state.manager.readiness().await;
    let status = if report.ready {
        StatusCode::OK
    } else {
        tracing::warn!("Readiness probe failed");
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(report))
}
