//! Core gateway state: the routing snapshot and the caches keyed off it.
//!
//! The `Gateway` aggregates the atomically-swapped routing table with the
//! per-service proxy cache and the rate-limiter registry. It performs no I/O
//! of its own; the HTTP handler adapter drives it per request and the config
//! watcher drives snapshot installs.
use std::sync::Arc;

use arc_swap::ArcSwap;

use crate::{
    config::{RouteMap, Service},
    core::{
        proxy::{ProxyCache, ServiceProxy},
        rate_limiter::{RateLimiterRegistry, ServiceLimiter},
        signer::RequestSigner,
    },
    ports::http_client::HttpClient,
};

pub struct Gateway {
    routes: ArcSwap<RouteMap>,
    proxies: ProxyCache,
    limiters: RateLimiterRegistry,
    http_client: Arc<dyn HttpClient>,
    signer: Arc<RequestSigner>,
}

impl Gateway {
    /// Start with an empty routing table; every request 404s until a snapshot
    /// is installed.
    pub fn new(http_client: Arc<dyn HttpClient>, signer: RequestSigner) -> Self {
        Self {
            routes: ArcSwap::from_pointee(RouteMap::new()),
            proxies: ProxyCache::new(),
            limiters: RateLimiterRegistry::new(),
            http_client,
            signer: Arc::new(signer),
        }
    }

    /// The live routing snapshot. The returned `Arc` stays valid for the
    /// caller's whole request even if a newer snapshot is installed meanwhile.
    pub fn current_routes(&self) -> Arc<RouteMap> {
        self.routes.load_full()
    }

    /// Atomically publish a new snapshot, then reconcile the proxy cache and
    /// limiter registry against it.
    pub async fn install(&self, routes: RouteMap) {
        let routes = Arc::new(routes);
        self.routes.store(routes.clone());
        self.proxies.prune(&routes).await;
        self.limiters.prune(&routes);
        tracing::info!(services = routes.len(), "routing table installed");
    }

    /// Resolve a request path to a service via first-segment prefix matching.
    pub fn service_for_path(&self, path: &str) -> Option<Arc<Service>> {
        let prefix = extract_prefix(path)?;
        self.current_routes().get(&prefix).cloned()
    }

    pub async fn proxy_for(&self, service: &Arc<Service>) -> Arc<ServiceProxy> {
        self.proxies
            .get_or_build(service, &self.http_client, &self.signer)
            .await
    }

    pub fn limiter_for(&self, service: &Service) -> Arc<ServiceLimiter> {
        self.limiters
            .for_service(&service.name, service.rate_limit.requests_per_minute)
    }

    /// Sweep idle client buckets across all service limiters.
    pub fn sweep_limiters(&self) {
        self.limiters.sweep();
    }

    pub fn proxy_cache_len(&self) -> usize {
        self.proxies.len()
    }
}

/// First path segment as the routing key: `/user/profile` → `/user`. Empty
/// and root paths yield no prefix.
pub fn extract_prefix(path: &str) -> Option<String> {
    let trimmed = path.trim().trim_matches('/');
    if trimmed.is_empty() {
        return None;
    }
    let first = trimmed.split('/').next().unwrap_or(trimmed);
    Some(format!("/{first}"))
}
