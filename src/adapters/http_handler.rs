//! The gateway dispatcher: one entrypoint per ingress request.
//!
//! Health endpoints short-circuit before anything else. Every other request is
//! prefix-matched against the current routing snapshot, tagged with a fresh
//! request id, and dispatched through the per-service middleware chain into
//! the cached reverse proxy.
use std::{net::SocketAddr, sync::Arc};

use axum::body::Body;
use http::{HeaderValue, Request, Response, StatusCode};
use uuid::Uuid;

use crate::{
    adapters::middleware::{
        BoxHandler, access_log, apply_middleware, auth, rate_limit, recover, security_headers,
    },
    core::{Gateway, auth::JwtAuthenticator, responses::json_error},
};

pub const REQUEST_ID_HEADER: &str = "X-Request-ID";

pub struct HttpHandler {
    gateway: Arc<Gateway>,
    authenticator: Arc<JwtAuthenticator>,
}

impl HttpHandler {
    pub fn new(gateway: Arc<Gateway>, authenticator: Arc<JwtAuthenticator>) -> Self {
        Self {
            gateway,
            authenticator,
        }
    }

    pub async fn handle_request(
        &self,
        mut req: Request<Body>,
        client_addr: Option<SocketAddr>,
    ) -> Response<Body> {
        let path = req.uri().path().to_string();

        // Liveness endpoints bypass the whole pipeline.
        if path == "/health" || path == "/healthz" {
            return Response::new(Body::from("ok"));
        }

        let Some(service) = self.gateway.service_for_path(&path) else {
            return json_error(StatusCode::NOT_FOUND, "404 not found", None);
        };

        let request_id = Uuid::new_v4().to_string();
        if let Ok(value) = HeaderValue::from_str(&request_id) {
            req.headers_mut().insert(REQUEST_ID_HEADER, value);
        }

        let proxy = self.gateway.proxy_for(&service).await;
        let limiter = self.gateway.limiter_for(&service);

        let terminal: BoxHandler = Box::new(move |req| {
            Box::pin(async move { proxy.forward(req, client_addr).await })
        });
        let chain = apply_middleware(
            terminal,
            vec![
                recover(),
                security_headers(),
                auth(self.authenticator.clone()),
                rate_limit(limiter, client_addr),
                access_log(service.name.clone()),
            ],
        );

        let mut response = chain(req).await;
        if let Ok(value) = HeaderValue::from_str(&request_id) {
            response.headers_mut().insert(REQUEST_ID_HEADER, value);
        }
        response
    }
}
