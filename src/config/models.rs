//! Configuration data structures for the gateway.
//!
//! The raw serde models map directly to the YAML file (`services:` sequence).
//! [`Service`] is the validated, immutable descriptor the rest of the gateway
//! works with; it is only produced by the loader.
use serde::Deserialize;
use url::Url;

/// Per-service rate limit settings. A zero (or omitted) value means "use the
/// gateway default".
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
pub struct RateLimitConfig {
    #[serde(default)]
    pub requests_per_minute: u32,
}

/// Root of the configuration file.
#[derive(Debug, Default, Deserialize)]
pub struct ConfigFile {
    #[serde(default)]
    pub services: Vec<ServiceEntry>,
}

/// One raw `services:` entry, before validation and normalization.
#[derive(Debug, Clone, Deserialize)]
pub struct ServiceEntry {
    pub name: String,
    pub host: String,
    #[serde(default)]
    pub prefix: Option<String>,
    #[serde(default)]
    pub strip_prefix: bool,
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
}

/// A validated service descriptor. Immutable after load; shared across
/// requests behind an `Arc`.
#[derive(Debug, Clone)]
pub struct Service {
    /// Unique identifier, used as the proxy-cache key and log tag.
    pub name: String,
    /// Upstream base URL as configured.
    pub host: String,
    /// Normalized routing prefix: exactly one leading `/`, no trailing `/`.
    pub prefix: String,
    /// Whether the director removes `prefix` from the path before dispatch.
    pub strip_prefix: bool,
    pub rate_limit: RateLimitConfig,
    /// Parsed view of `host` with a guaranteed scheme and authority.
    pub upstream: Url,
}

impl Service {
    /// The upstream authority (`host[:port]`) requests are rewritten to.
    pub fn upstream_authority(&self) -> &str {
        self.upstream.authority()
    }

    /// The upstream scheme (`http` or `https`).
    pub fn upstream_scheme(&self) -> &str {
        self.upstream.scheme()
    }
}
