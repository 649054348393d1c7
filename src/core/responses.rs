//! The canonical JSON envelope emitted by the gateway itself.
//!
//! Upstream responses are relayed untouched; only gateway-originated errors
//! (routing misses, auth failures, rate limits, proxy errors) use this shape.
use axum::body::Body;
use http::{Response, StatusCode, header};
use serde::Serialize;

#[derive(Debug, Serialize)]
pub struct ErrorEnvelope {
    pub status: String,
    pub message: String,
    pub status_code: u16,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ErrorEnvelope {
    pub fn new(status: StatusCode, message: impl Into<String>, error: Option<String>) -> Self {
        Self {
            status: status.canonical_reason().unwrap_or("Unknown").to_string(),
            message: message.into(),
            status_code: status.as_u16(),
            error,
        }
    }
}

/// Build a JSON error response with the given status.
pub fn json_error(
    status: StatusCode,
    message: impl Into<String>,
    error: Option<String>,
) -> Response<Body> {
    let envelope = ErrorEnvelope::new(status, message, error);
    let body = serde_json::to_string(&envelope)
        .unwrap_or_else(|_| format!("{{\"status_code\":{}}}", status.as_u16()));

    Response::builder()
        .status(status)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body))
        .unwrap_or_else(|_| {
            let mut resp = Response::new(Body::from("internal server error"));
            *resp.status_mut() = StatusCode::INTERNAL_SERVER_ERROR;
            resp
        })
}
