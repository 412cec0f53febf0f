pub mod chats;
pub mod exports;
pub mod health;
pub mod scheduled;
pub mod tasks;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

use qce_core::QceError;

/// JSON error envelope shared by all API routes.
pub struct ApiError(pub QceError);

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match self.0.code() {
            "VALIDATION" => StatusCode::BAD_REQUEST,
            "NOT_FOUND" => StatusCode::NOT_FOUND,
            "UPSTREAM_TRANSIENT" => StatusCode::SERVICE_UNAVAILABLE,
            "UPSTREAM_FATAL" => StatusCode::BAD_GATEWAY,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        let body = Json(json!({
            "error": self.0.to_string(),
            "code": self.0.code(),
        }));
        (status, body).into_response()
    }
}

impl<E: Into<QceError>> From<E> for ApiError {
    fn from(e: E) -> Self {
        ApiError(e.into())
    }
}

pub type ApiResult<T> = std::result::Result<T, ApiError>;

/// 404 with the standard envelope.
pub fn not_found(what: &str) -> Response {
    (
        StatusCode::NOT_FOUND,
        Json(json!({ "error": format!("{what} not found"), "code": "NOT_FOUND" })),
    )
        .into_response()
}
