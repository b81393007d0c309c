pub mod health;
pub mod pools;

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use database_manager::errors::ApiError;

/// Error body returned by every handler, keyed by the stable `ApiError` code
#[derive(Debug)]
pub struct ErrorResponse(pub ApiError);

impl<E: Into<ApiError>> From<E> for ErrorResponse {
    fn from(error: E) -> Self {
        Self(error.into())
    }
}

impl IntoResponse for ErrorResponse {
    fn into_response(self) -> Response {
        let status = match self.0.code.as_str() {
            "RETRY_LATER" | "SERVICE_UNAVAILABLE" | "DATABASE_UNAVAILABLE" => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };

        (status, Json(self.0)).into_response()
    }
}
