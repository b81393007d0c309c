use axum::{routing::get, Router};
use database_manager::db::ConnectionFactory;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;

use crate::handlers;
use crate::state::AppState;

/// Create the application router: probes plus the pool status listing
pub fn create_router<F: ConnectionFactory>(state: AppState<F>) -> Router {
    Router::new()
        .route("/health", get(handlers::health::health_check))
        .route("/ready", get(handlers::health::readiness_check::<F>))
        .route("/pools", get(handlers::pools::list_pools::<F>))
        .layer(ServiceBuilder::new().layer(TraceLayer::new_for_http()))
        .with_state(state)
}
