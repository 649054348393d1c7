#![allow(dead_code)]

use std::{net::SocketAddr, sync::Arc};

use aimas_gateway::{
    adapters::HttpHandler,
    config::{RateLimitConfig, RouteMap, ServiceEntry, loader::build_route_map},
    core::{Gateway, JwtAuthenticator, RequestSigner, auth::Claims},
    ports::http_client::{HttpClient, HttpClientResult},
};
use async_trait::async_trait;
use axum::body::Body;
use http::{Request, Response, StatusCode, header};
use jsonwebtoken::{EncodingKey, Header, encode, get_current_timestamp};

pub const JWT_SECRET: &str = "integration-test-secret";
pub const GATEWAY_SECRET: &str = "integration-gateway-secret";

/// A signed bearer token for the shared test secret.
pub fn bearer(user_id: &str) -> String {
    let claims = Claims {
        user_id: user_id.to_string(),
        exp: get_current_timestamp() + 3600,
        iat: None,
        iss: None,
    };
    let token = encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(JWT_SECRET.as_bytes()),
    )
    .unwrap();
    format!("Bearer {token}")
}

/// An authenticated GET request to the gateway.
pub fn authed_get(path: &str) -> Request<Body> {
    Request::builder()
        .uri(path)
        .header(header::AUTHORIZATION, bearer("user-1"))
        .body(Body::empty())
        .unwrap()
}

pub fn entry(name: &str, host: &str) -> ServiceEntry {
    ServiceEntry {
        name: name.to_string(),
        host: host.to_string(),
        prefix: None,
        strip_prefix: false,
        rate_limit: RateLimitConfig::default(),
    }
}

pub fn routes(entries: Vec<ServiceEntry>) -> RouteMap {
    build_route_map(entries).unwrap()
}

/// Build a full dispatcher over the given client and routing map.
pub async fn handler_with(client: Arc<dyn HttpClient>, routes: RouteMap) -> HttpHandler {
    let gateway = Arc::new(Gateway::new(client, RequestSigner::new(GATEWAY_SECRET)));
    gateway.install(routes).await;
    HttpHandler::new(gateway, Arc::new(JwtAuthenticator::new(JWT_SECRET)))
}

/// Serve an axum router on an ephemeral loopback port.
pub async fn spawn_upstream(router: axum::Router) -> SocketAddr {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    addr
}

/// In-memory upstream that always answers 200 `ok` with a known length.
pub struct OkClient;

#[async_trait]
impl HttpClient for OkClient {
    async fn send_request(&self, _req: Request<Body>) -> HttpClientResult<Response<Body>> {
        Ok(Response::builder()
            .status(StatusCode::OK)
            .header(header::CONTENT_LENGTH, "2")
            .body(Body::from("ok"))
            .unwrap())
    }
}
