//! Route handlers over the scheduler service.

pub mod config;
pub mod jobs;
pub mod status;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;

use ragmill_core::{Error, ErrorBody};

/// Wrapper mapping core errors onto HTTP responses
pub struct ApiError(pub Error);

impl From<Error> for ApiError {
    fn from(err: Error) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.0.status_code())
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        (status, Json(ErrorBody::from(&self.0))).into_response()
    }
}

pub type ApiResult<T> = std::result::Result<T, ApiError>;
