//! API error handling.
//!
//! Every failure leaves the API as an `ErrorResponse` body.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use f2f_core::{AppError, ErrorKind, ErrorResponse};
use tracing::error;

/// API error type that can be converted to HTTP responses.
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub body: ErrorResponse,
}

impl ApiError {
    pub fn new(status: StatusCode, body: ErrorResponse) -> Self {
        Self { status, body }
    }

    /// Create a 404 Not Found error.
    pub fn not_found(what: &str, id: &str) -> Self {
        Self::new(
            StatusCode::NOT_FOUND,
            ErrorResponse {
                kind: ErrorKind::ValidationError,
                message: format!("{} '{}' not found", what, id),
                suggestion: Some(format!("Check the {} id", what)),
            },
        )
    }

    /// Create a 400 Bad Request error.
    pub fn bad_request(message: impl Into<String>) -> Self {
        AppError::validation(message).into()
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let kind = self.body.kind;
        let mut response = (self.status, Json(self.body)).into_response();
        // Read back by the metrics middleware.
        response.extensions_mut().insert(kind);
        response
    }
}

impl From<AppError> for ApiError {
    fn from(err: AppError) -> Self {
        let status = match err.kind() {
            ErrorKind::ValidationError | ErrorKind::Canceled => StatusCode::BAD_REQUEST,
            ErrorKind::ResourceLimit => StatusCode::UNPROCESSABLE_ENTITY,
            ErrorKind::ToolError
            | ErrorKind::IoError
            | ErrorKind::DatabaseError
            | ErrorKind::Internal => {
                error!("Request failed: {}", err);
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        Self::new(status, err.to_response())
    }
}

pub type ApiResult<T> = Result<T, ApiError>;
