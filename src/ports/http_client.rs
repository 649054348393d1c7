use async_trait::async_trait;
use axum::body::Body;
use hyper::{Request, Response};
use thiserror::Error;

/// Errors surfaced by the upstream transport. All of them map to a 502
/// envelope at the proxy layer.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum HttpClientError {
    /// Connection to the upstream failed (dial, DNS, TLS, reset).
    #[error("connection error: {0}")]
    ConnectionError(String),

    /// The upstream did not produce response headers in time.
    #[error("timeout after {0} seconds")]
    Timeout(u64),

    /// The rewritten request could not be sent as constructed.
    #[error("invalid request: {0}")]
    InvalidRequest(String),
}

pub type HttpClientResult<T> = Result<T, HttpClientError>;

/// The port the reverse proxy dispatches upstream requests through. One
/// implementation shares a pooled transport across every service.
#[async_trait]
pub trait HttpClient: Send + Sync + 'static {
    /// Send a fully-rewritten request to its upstream and return the response
    /// with a streaming body.
    async fn send_request(&self, req: Request<Body>) -> HttpClientResult<Response<Body>>;
}
