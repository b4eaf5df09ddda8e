//! HTTP error envelope returned by the gateway.
//!
//! Every error surfaced to an HTTP client is a JSON object of the form
//! `{"error":"<message>"}` followed by a trailing newline, paired with the
//! status code chosen at the boundary.

use axum::http::header::CONTENT_TYPE;
use axum::response::{IntoResponse, Response};
use hyper::StatusCode;

#[derive(Debug, Clone)]
pub struct ErrorResponse {
    pub status: StatusCode,
    pub message: String,
}

impl ErrorResponse {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    /// The terminal response when every forwarding attempt failed without a
    /// backend response.
    pub fn bad_gateway() -> Self {
        Self::new(StatusCode::BAD_GATEWAY, "Bad Gateway")
    }
}

impl IntoResponse for ErrorResponse {
    fn into_response(self) -> Response {
        let body = format!("{}\n", serde_json::json!({ "error": self.message }));
        (self.status, [(CONTENT_TYPE, "application/json")], body).into_response()
    }
}
