use axum::{extract::State, Json};
use database_manager::db::ConnectionFactory;
use database_manager::{PoolStatus, RegistryError};

use super::ErrorResponse;
use crate::state::AppState;

/// Point-in-time status of every pool. Does not touch the databases.
#[tracing::instrument(skip(state))]
pub async fn list_pools<F: ConnectionFactory>(
    State(state): State<AppState<F>>,
) -> Result<Json<Vec<PoolStatus>>, ErrorResponse> {
    if state.manager.is_terminated() {
        return Err(RegistryError::Terminated.into());
    }
    Ok(Json(state.manager.statuses()))
}
