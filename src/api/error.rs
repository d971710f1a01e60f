use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

use crate::utils::ProtectionError;

/// Result type for management API handlers.
pub type ApiResult<T> = Result<T, ApiError>;

/// Wraps `ProtectionError` for the wire: invalid input surfaces as 400,
/// store-side failures (the whitelist conflict included) as 500. The typed
/// error code is propagated verbatim in the body.
#[derive(Debug)]
pub struct ApiError(pub ProtectionError);

impl From<ProtectionError> for ApiError {
    fn from(err: ProtectionError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            ProtectionError::InvalidKey(_) | ProtectionError::InvalidValue(_) => {
                StatusCode::BAD_REQUEST
            }
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };

        let body = json!({
            "error": self.0.to_string(),
            "code": self.0.code(),
        });

        (status, Json(body)).into_response()
    }
}
