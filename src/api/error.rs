//! HTTP mapping for result store errors.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

use crate::results::ResultError;

impl IntoResponse for ResultError {
    fn into_response(self) -> Response {
        let status = match &self {
            ResultError::InvalidPayload(_) => StatusCode::BAD_REQUEST,
            ResultError::NotFound(_) => StatusCode::NOT_FOUND,
        };
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}
