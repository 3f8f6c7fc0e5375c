//! Maps [`sf_core::error::Error`] onto the HTTP boundary contract from §7:
//! every response body is `{error, status, [traceback]}`, with `traceback`
//! present only when the node was started with `INCLUDE_TRACEBACKS=1`.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use sf_core::error::Error;

pub struct ApiError {
    error: Error,
    include_traceback: bool,
}

impl ApiError {
    pub fn new(error: Error, include_traceback: bool) -> Self {
        Self {
            error,
            include_traceback,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.error.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let mut body = json!({
            "error": self.error.to_string(),
            "status": status.as_u16(),
        });
        if self.include_traceback {
            body["traceback"] = json!(format!("{:?}", self.error));
        }
        (status, Json(body)).into_response()
    }
}
