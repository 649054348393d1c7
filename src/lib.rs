//! AIMAS Gateway - a reverse-proxy API gateway for a fleet of backend
//! services.
//!
//! The gateway matches each request to a service by its first path segment,
//! runs it through a per-service middleware chain (panic recovery, security
//! headers, JWT auth, per-client rate limiting, access logging) and forwards
//! it to the upstream through a cached reverse proxy, streaming the response
//! back. The routing table is loaded from a YAML file and hot-reloaded on
//! change; snapshots are swapped atomically so in-flight requests are never
//! disturbed.
//!
//! # Quick Example
//! ```no_run
//! use std::sync::Arc;
//!
//! use aimas_gateway::{
//!     adapters::{HttpClientAdapter, HttpHandler},
//!     config::load_route_map,
//!     core::{Gateway, JwtAuthenticator, RequestSigner},
//! };
//!
//! # #[tokio::main] async fn main() -> eyre::Result<()> {
//! let client = Arc::new(HttpClientAdapter::new()?);
//! let gateway = Arc::new(Gateway::new(client, RequestSigner::from_env()));
//! gateway.install(load_route_map("aimas.yml")?).await;
//! let handler = HttpHandler::new(gateway, Arc::new(JwtAuthenticator::from_env()));
//! // Wire `handler` into an axum catch-all route (see the binary crate).
//! # Ok(()) }
//! ```
//!
//! # Architecture
//! `core` holds the I/O-free routing, proxying and policy logic; `ports`
//! defines the upstream transport seam; `adapters` provides the hyper
//! transport, the HTTP dispatcher, the middleware chain and the config
//! watcher. Prefer the re-exports below over reaching into internals.
pub mod adapters;
pub mod config;
pub mod core;
pub mod ports;
pub mod tracing_setup;
pub mod utils;

pub use crate::{
    adapters::{ConfigWatcher, HttpClientAdapter, HttpHandler},
    core::{Gateway, JwtAuthenticator, RequestSigner},
    ports::http_client::HttpClient,
    utils::GracefulShutdown,
};
