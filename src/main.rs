use std::{net::SocketAddr, sync::Arc, time::Duration};

use aimas_gateway::{
    adapters::{ConfigWatcher, HttpClientAdapter, HttpHandler},
    config::load_route_map,
    core::{Gateway, JwtAuthenticator, RequestSigner},
    ports::http_client::HttpClient,
    tracing_setup,
    utils::GracefulShutdown,
};
use axum::{
    Router,
    extract::{ConnectInfo, Request},
    routing::any,
};
use clap::Parser;
use color_eyre::{Result, eyre::WrapErr};

#[derive(Parser, Debug)]
#[clap(author, version, about)]
struct Args {
    /// Path to the service configuration file
    #[clap(short, long, default_value = "aimas.yml")]
    config: String,
}

/// How long in-flight requests get to finish after a shutdown signal.
const DRAIN_PERIOD: Duration = Duration::from_secs(10);
/// Cadence for dropping idle rate-limit buckets.
const SWEEP_INTERVAL: Duration = Duration::from_secs(300);

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    color_eyre::install()?;

    let args = Args::parse();
    let _log_guard = tracing_setup::init_tracing()?;

    let http_client: Arc<dyn HttpClient> =
        Arc::new(HttpClientAdapter::new().context("failed to create HTTP client")?);
    let gateway = Arc::new(Gateway::new(http_client, RequestSigner::from_env()));
    let authenticator = Arc::new(JwtAuthenticator::from_env());

    // A failed initial load is non-fatal: the gateway serves 404s until the
    // watcher picks up a valid file.
    match load_route_map(&args.config) {
        Ok(routes) => gateway.install(routes).await,
        Err(e) => tracing::warn!(
            path = %args.config,
            error = %e,
            "initial config load failed; serving an empty routing table"
        ),
    }

    let shutdown = Arc::new(GracefulShutdown::new());
    {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            if let Err(e) = shutdown.run_signal_handler().await {
                tracing::error!(error = %e, "signal handler error");
            }
        });
    }

    let watcher = ConfigWatcher::new(&args.config).context("failed to start config watcher")?;
    tokio::spawn(watcher.run(gateway.clone(), shutdown.token()));

    {
        let gateway = gateway.clone();
        let mut token = shutdown.token();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(SWEEP_INTERVAL);
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = token.wait() => break,
                    _ = ticker.tick() => gateway.sweep_limiters(),
                }
            }
        });
    }

    let handler = Arc::new(HttpHandler::new(gateway.clone(), authenticator));
    let make_route = |handler: Arc<HttpHandler>| {
        any(
            move |ConnectInfo(client_addr): ConnectInfo<SocketAddr>, req: Request| {
                let handler = handler.clone();
                async move { handler.handle_request(req, Some(client_addr)).await }
            },
        )
    };
    let app = Router::new()
        .route("/{*path}", make_route(handler.clone()))
        .route("/", make_route(handler));

    let port = std::env::var("PORT")
        .ok()
        .and_then(|p| p.parse::<u16>().ok())
        .unwrap_or(8080);
    let addr = SocketAddr::from(([0, 0, 0, 0], port));

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;

    tracing::info!(
        addr = %addr,
        services = gateway.current_routes().len(),
        "gateway listening"
    );

    let serve_shutdown = {
        let mut token = shutdown.token();
        async move { token.wait().await }
    };
    let server = axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(serve_shutdown);

    let mut drain_token = shutdown.token();
    tokio::select! {
        result = async { server.await } => result.context("server error")?,
        _ = async { drain_token.wait().await; tokio::time::sleep(DRAIN_PERIOD).await } => {
            tracing::warn!("drain period elapsed; closing remaining connections");
        }
    }

    tracing::info!("shutdown complete");
    Ok(())
}
