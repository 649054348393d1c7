//! Per-service reverse proxy and the name-keyed proxy cache.
//!
//! A [`ServiceProxy`] is built once per service and reused for every request
//! to it: the director rewrites the URL and headers, the shared transport
//! dispatches upstream, and the response is relayed back either in bulk or
//! chunk-by-chunk for streaming bodies.
use std::{net::SocketAddr, sync::Arc};

use axum::body::Body;
use eyre::{Result, WrapErr};
use futures_util::TryStreamExt;
use http::{HeaderMap, HeaderValue, Request, Response, StatusCode, header};
use http_body_util::BodyExt;

use crate::{
    config::{RouteMap, Service},
    core::{responses::json_error, signer::RequestSigner},
    ports::http_client::HttpClient,
};

/// Reverse proxy for a single service. Carries no per-request state; the
/// transport underneath owns the connection pool.
pub struct ServiceProxy {
    service: Arc<Service>,
    client: Arc<dyn HttpClient>,
    signer: Arc<RequestSigner>,
}

impl ServiceProxy {
    pub fn new(
        service: Arc<Service>,
        client: Arc<dyn HttpClient>,
        signer: Arc<RequestSigner>,
    ) -> Self {
        Self {
            service,
            client,
            signer,
        }
    }

    pub fn service(&self) -> &Arc<Service> {
        &self.service
    }

    /// Rewrite the request for the upstream and dispatch it, mapping transport
    /// failures to a 502 envelope naming the service.
    pub async fn forward(
        &self,
        mut req: Request<Body>,
        client_addr: Option<SocketAddr>,
    ) -> Response<Body> {
        if let Err(err) = self.direct(&mut req, client_addr) {
            tracing::error!(
                service = %self.service.name,
                error = %err,
                "failed to rewrite request for upstream"
            );
            return self.bad_gateway(err.to_string());
        }

        match self.client.send_request(req).await {
            Ok(resp) => self.relay(resp).await,
            Err(err) => {
                tracing::error!(
                    service = %self.service.name,
                    error = %err,
                    "upstream request failed"
                );
                self.bad_gateway(err.to_string())
            }
        }
    }

    /// The director: point the request at the upstream, rewrite the path when
    /// `strip_prefix` is set, append the client to `X-Forwarded-For`, rewrite
    /// `Host`, and attach the backend-auth signature.
    fn direct(&self, req: &mut Request<Body>, client_addr: Option<SocketAddr>) -> Result<()> {
        let path = req.uri().path();
        let new_path = if self.service.strip_prefix {
            match path.strip_prefix(self.service.prefix.as_str()) {
                Some("") => "/",
                Some(rest) => rest,
                None => path,
            }
        } else {
            path
        };

        let target = match req.uri().query() {
            Some(query) => format!(
                "{}://{}{}?{}",
                self.service.upstream_scheme(),
                self.service.upstream_authority(),
                new_path,
                query
            ),
            None => format!(
                "{}://{}{}",
                self.service.upstream_scheme(),
                self.service.upstream_authority(),
                new_path
            ),
        };
        *req.uri_mut() = target
            .parse()
            .wrap_err_with(|| format!("invalid upstream target: {target}"))?;

        if let Some(addr) = client_addr {
            let ip = addr.ip().to_string();
            let forwarded = match req
                .headers()
                .get("X-Forwarded-For")
                .and_then(|v| v.to_str().ok())
                .filter(|v| !v.trim().is_empty())
            {
                Some(existing) => format!("{existing}, {ip}"),
                None => ip,
            };
            if let Ok(value) = HeaderValue::from_str(&forwarded) {
                req.headers_mut().insert("X-Forwarded-For", value);
            }
        }

        let host = HeaderValue::from_str(self.service.upstream_authority())
            .wrap_err("upstream authority is not a valid header value")?;
        req.headers_mut().insert(header::HOST, host);

        self.signer.sign(&self.service.name, req.headers_mut());
        Ok(())
    }

    /// Copy the upstream status and headers downstream, relaying the body in
    /// bulk or — for streaming responses — frame by frame as it arrives.
    async fn relay(&self, resp: Response<Body>) -> Response<Body> {
        let (mut parts, body) = resp.into_parts();
        let streaming = is_streaming(&parts.headers);

        // hyper re-frames the relayed body itself.
        parts.headers.remove(header::TRANSFER_ENCODING);

        if streaming {
            let service = self.service.name.clone();
            let stream = TryStreamExt::inspect_err(body.into_data_stream(), move |err| {
                tracing::error!(
                    service = %service,
                    error = %err,
                    "upstream read error during streaming relay"
                );
            });
            return Response::from_parts(parts, Body::from_stream(stream));
        }

        match body.collect().await {
            Ok(collected) => Response::from_parts(parts, Body::from(collected.to_bytes())),
            Err(err) => {
                tracing::error!(
                    service = %self.service.name,
                    error = %err,
                    "failed to read upstream response body"
                );
                self.bad_gateway(err.to_string())
            }
        }
    }

    fn bad_gateway(&self, detail: String) -> Response<Body> {
        json_error(
            StatusCode::BAD_GATEWAY,
            format!("upstream service '{}' unavailable", self.service.name),
            Some(detail),
        )
    }
}

/// A response is relayed incrementally when the upstream marked it chunked,
/// declared it an event stream, or left its length unknown.
pub fn is_streaming(headers: &HeaderMap) -> bool {
    let chunked = headers
        .get(header::TRANSFER_ENCODING)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.to_ascii_lowercase().contains("chunked"));
    let event_stream = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.contains("text/event-stream"));

    chunked || event_stream || !headers.contains_key(header::CONTENT_LENGTH)
}

/// Service-name → proxy cache. Hits are lock-free; the build path is guarded
/// by a mutex with a re-check so concurrent first requests construct at most
/// one proxy per service.
pub struct ProxyCache {
    proxies: scc::HashMap<String, Arc<ServiceProxy>>,
    build_lock: tokio::sync::Mutex<()>,
}

impl ProxyCache {
    pub fn new() -> Self {
        Self {
            proxies: scc::HashMap::new(),
            build_lock: tokio::sync::Mutex::new(()),
        }
    }

    pub async fn get_or_build(
        &self,
        service: &Arc<Service>,
        client: &Arc<dyn HttpClient>,
        signer: &Arc<RequestSigner>,
    ) -> Arc<ServiceProxy> {
        if let Some(entry) = self.proxies.get_async(&service.name).await {
            return entry.get().clone();
        }

        let _guard = self.build_lock.lock().await;
        if let Some(entry) = self.proxies.get_async(&service.name).await {
            return entry.get().clone();
        }

        let proxy = Arc::new(ServiceProxy::new(
            service.clone(),
            client.clone(),
            signer.clone(),
        ));
        let _ = self
            .proxies
            .insert_async(service.name.clone(), proxy.clone())
            .await;
        proxy
    }

    /// Drop proxies whose service is no longer present in the new snapshot.
    pub async fn prune(&self, keep: &RouteMap) {
        self.proxies
            .retain_async(|name, _| {
                let keep_this = keep.values().any(|svc| svc.name == *name);
                if !keep_this {
                    tracing::info!(service = %name, "proxy cache entry evicted");
                }
                keep_this
            })
            .await;
    }

    pub fn len(&self) -> usize {
        self.proxies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.proxies.len() == 0
    }
}

impl Default for ProxyCache {
    fn default() -> Self {
        Self::new()
    }
}
