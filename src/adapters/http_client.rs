use std::time::Duration;

use async_trait::async_trait;
use axum::body::Body;
use eyre::Result;
use hyper::{Request, Response, Version, header, header::HeaderValue};
use hyper_rustls::HttpsConnector;
use hyper_util::{
    client::legacy::{Client, connect::HttpConnector},
    rt::TokioExecutor,
};
use rustls_native_certs::load_native_certs;
use tokio::time::timeout;

use crate::ports::http_client::{HttpClient, HttpClientError, HttpClientResult};

/// How long to wait for upstream response headers. The body is deliberately
/// unbounded so long-lived streams (SSE) keep flowing.
const RESPONSE_HEADER_TIMEOUT_SECS: u64 = 30;

/// Shared upstream transport: one pooled hyper client behind rustls serving
/// every service, for both `http` and `https` targets.
pub struct HttpClientAdapter {
    client: Client<HttpsConnector<HttpConnector>, Body>,
}

impl HttpClientAdapter {
    pub fn new() -> Result<Self> {
        // Install default crypto provider for rustls if not already set.
        let _ = rustls::crypto::aws_lc_rs::default_provider().install_default();

        let mut http_connector = HttpConnector::new();
        http_connector.enforce_http(false);

        let mut root_cert_store = rustls::RootCertStore::empty();
        let native_certs = load_native_certs();
        for cert in native_certs.certs {
            if root_cert_store.add(cert).is_err() {
                tracing::warn!("failed to add a native certificate to the root store");
            }
        }
        if !native_certs.errors.is_empty() {
            tracing::warn!(errors = ?native_certs.errors, "some native certificates failed to load");
        }

        let tls_config = rustls::ClientConfig::builder()
            .with_root_certificates(root_cert_store)
            .with_no_client_auth();

        let https_connector = hyper_rustls::HttpsConnectorBuilder::new()
            .with_tls_config(tls_config)
            .https_or_http()
            .enable_http1()
            .wrap_connector(http_connector);

        let client = Client::builder(TokioExecutor::new())
            .pool_idle_timeout(Duration::from_secs(90))
            .build::<_, Body>(https_connector);

        Ok(Self { client })
    }
}

#[async_trait]
impl HttpClient for HttpClientAdapter {
    async fn send_request(&self, mut req: Request<Body>) -> HttpClientResult<Response<Body>> {
        if req.uri().host().is_none() {
            return Err(HttpClientError::InvalidRequest(format!(
                "outgoing URI has no host: {}",
                req.uri()
            )));
        }

        // Identify the gateway to backends unless the client already sent an
        // agent of its own; everything else round-trips untouched.
        if !req.headers().contains_key(header::USER_AGENT) {
            req.headers_mut().insert(
                header::USER_AGENT,
                HeaderValue::from_static("aimas-gateway/1.0"),
            );
        }

        let (mut parts, body) = req.into_parts();
        // Force HTTP/1.1 on the wire; ALPN still negotiates h2 where offered.
        parts.version = Version::HTTP_11;
        let method = parts.method.clone();
        let uri = parts.uri.clone();
        let outgoing = Request::from_parts(parts, body);

        let header_deadline = Duration::from_secs(RESPONSE_HEADER_TIMEOUT_SECS);
        match timeout(header_deadline, self.client.request(outgoing)).await {
            Ok(Ok(response)) => {
                let (parts, incoming) = response.into_parts();
                Ok(Response::from_parts(parts, Body::new(incoming)))
            }
            Ok(Err(e)) => Err(HttpClientError::ConnectionError(format!(
                "request to {method} {uri} failed: {e}"
            ))),
            Err(_) => Err(HttpClientError::Timeout(RESPONSE_HEADER_TIMEOUT_SECS)),
        }
    }
}
