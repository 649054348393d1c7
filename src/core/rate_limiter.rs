//! Per-client token-bucket rate limiting, scoped per service.
//!
//! Each service gets one keyed limiter: capacity `rpm` tokens, replenished
//! smoothly at `rpm` per minute. Buckets are created on a client's first
//! request and swept once idle. The registry is mutex-guarded; the limiters
//! themselves are internally thread-safe.
use std::{
    collections::HashMap,
    net::SocketAddr,
    num::NonZeroU32,
    sync::{Arc, Mutex},
    time::Duration,
};

use governor::{
    Quota, RateLimiter,
    clock::{Clock, DefaultClock},
    state::keyed::DefaultKeyedStateStore,
};
use http::Request;

use crate::config::RouteMap;

/// Applied when a service configures `requests_per_minute: 0` or omits it.
pub const DEFAULT_RPM: u32 = 120;

pub type KeyedRateLimiterImpl<K> = RateLimiter<K, DefaultKeyedStateStore<K>, DefaultClock>;

/// Outcome of a rate-limit check.
#[derive(Debug)]
pub enum Decision {
    Allowed,
    /// Denied; `retry_after` is the wait until the next token is available.
    Limited { retry_after: Duration },
}

/// One service's keyed limiter plus the effective quota it was built with.
pub struct ServiceLimiter {
    limiter: KeyedRateLimiterImpl<String>,
    clock: DefaultClock,
    rpm: u32,
}

impl ServiceLimiter {
    fn new(configured_rpm: u32) -> Self {
        let rpm = if configured_rpm == 0 {
            DEFAULT_RPM
        } else {
            configured_rpm
        };
        let quota = Quota::per_minute(NonZeroU32::new(rpm).expect("rpm is non-zero"));
        Self {
            limiter: RateLimiter::keyed(quota),
            clock: DefaultClock::default(),
            rpm,
        }
    }

    pub fn rpm(&self) -> u32 {
        self.rpm
    }

    /// Consume one token for `client_id`, or report how long until one frees.
    pub fn check(&self, client_id: &str) -> Decision {
        match self.limiter.check_key(&client_id.to_string()) {
            Ok(()) => Decision::Allowed,
            Err(not_until) => Decision::Limited {
                retry_after: not_until.wait_time_from(self.clock.now()),
            },
        }
    }

    /// Drop bucket state for clients that have gone idle.
    pub fn sweep(&self) {
        self.limiter.retain_recent();
    }
}

/// Service-name → limiter registry owned by the gateway.
#[derive(Default)]
pub struct RateLimiterRegistry {
    limiters: Mutex<HashMap<String, Arc<ServiceLimiter>>>,
}

impl RateLimiterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fetch the limiter for a service, creating it on first use. A reload
    /// that changes the configured rpm rebuilds the limiter (and so resets its
    /// buckets); unchanged services keep their state.
    pub fn for_service(&self, name: &str, configured_rpm: u32) -> Arc<ServiceLimiter> {
        let effective = if configured_rpm == 0 {
            DEFAULT_RPM
        } else {
            configured_rpm
        };

        let mut limiters = self.limiters.lock().expect("rate limiter registry poisoned");
        match limiters.get(name) {
            Some(limiter) if limiter.rpm() == effective => limiter.clone(),
            _ => {
                let limiter = Arc::new(ServiceLimiter::new(configured_rpm));
                limiters.insert(name.to_string(), limiter.clone());
                limiter
            }
        }
    }

    /// Drop limiters for services absent from the new snapshot.
    pub fn prune(&self, keep: &RouteMap) {
        let mut limiters = self.limiters.lock().expect("rate limiter registry poisoned");
        limiters.retain(|name, _| keep.values().any(|svc| svc.name == *name));
    }

    /// Sweep idle client buckets in every registered limiter.
    pub fn sweep(&self) {
        let limiters = self.limiters.lock().expect("rate limiter registry poisoned");
        for limiter in limiters.values() {
            limiter.sweep();
        }
    }
}

/// `Retry-After` value for a denied request: the wait rounded up to whole
/// seconds, never below 1.
pub fn retry_after_secs(wait: Duration) -> u64 {
    let mut secs = wait.as_secs();
    if wait.subsec_nanos() > 0 {
        secs += 1;
    }
    secs.max(1)
}

/// Identify the client for rate-limit keying: `X-Api-Key` (with any `Bearer `
/// prefix stripped), else the first `X-Forwarded-For` entry, else the
/// transport-level remote IP. `X-Forwarded-For` is only as trustworthy as the
/// edge in front of this gateway.
pub fn extract_client_id<B>(req: &Request<B>, remote: Option<SocketAddr>) -> String {
    if let Some(key) = req
        .headers()
        .get("X-Api-Key")
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
    {
        return key.strip_prefix("Bearer ").unwrap_or(key).to_string();
    }

    if let Some(forwarded) = req
        .headers()
        .get("X-Forwarded-For")
        .and_then(|v| v.to_str().ok())
    {
        if let Some(first) = forwarded.split(',').next().map(str::trim).filter(|v| !v.is_empty()) {
            return first.to_string();
        }
    }

    if let Some(addr) = remote {
        return addr.ip().to_string();
    }

    "unknown-client".to_string()
}
