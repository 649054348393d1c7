//! Hot-reload driver for the routing table.
//!
//! The watcher observes the directory containing the configuration file (the
//! file itself would stop matching after an editor's rename-replace write) and
//! funnels matching events into a debounce loop: each event re-arms a 200 ms
//! deadline, and only its expiry triggers a reload. Reloads are
//! all-or-nothing; a file that fails to parse or validate leaves the previous
//! snapshot serving.
use std::{
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};

use eyre::{Result, WrapErr};
use notify::{RecursiveMode, Watcher};
use tokio::sync::mpsc;

use crate::{config::loader::load_route_map, core::Gateway, utils::ShutdownToken};

const DEBOUNCE: Duration = Duration::from_millis(200);

pub struct ConfigWatcher {
    path: PathBuf,
    // Keeps the OS watcher alive for the lifetime of the reload loop.
    _watcher: notify::RecommendedWatcher,
    events: mpsc::Receiver<()>,
}

impl ConfigWatcher {
    pub fn new(path: impl Into<PathBuf>) -> Result<Self> {
        let path = std::path::absolute(path.into()).wrap_err("invalid config path")?;
        let file_name = path
            .file_name()
            .ok_or_else(|| eyre::eyre!("config path has no file name: {}", path.display()))?
            .to_owned();
        let (tx, events) = mpsc::channel(16);

        let mut watcher =
            notify::recommended_watcher(move |res: Result<notify::Event, notify::Error>| {
                match res {
                    Ok(event) => {
                        if (event.kind.is_modify()
                            || event.kind.is_create()
                            || event.kind.is_remove())
                            && event
                                .paths
                                .iter()
                                .any(|p| p.file_name() == Some(&file_name))
                        {
                            // Coalescing happens in the debounce loop; a full
                            // channel just means a reload is already pending.
                            let _ = tx.try_send(());
                        }
                    }
                    Err(e) => tracing::warn!(error = %e, "config file watch error"),
                }
            })?;

        let watch_dir = path.parent().unwrap_or_else(|| Path::new("."));
        watcher
            .watch(watch_dir, RecursiveMode::NonRecursive)
            .wrap_err("failed to watch config directory")?;

        Ok(Self {
            path,
            _watcher: watcher,
            events,
        })
    }

    /// Debounce events and drive reloads until shutdown.
    pub async fn run(mut self, gateway: Arc<Gateway>, mut shutdown: ShutdownToken) {
        tracing::info!(path = %self.path.display(), "config watcher started");
        let mut deadline: Option<tokio::time::Instant> = None;

        loop {
            tokio::select! {
                _ = shutdown.wait() => break,
                event = self.events.recv() => match event {
                    Some(()) => deadline = Some(tokio::time::Instant::now() + DEBOUNCE),
                    None => break,
                },
                _ = sleep_until_opt(deadline), if deadline.is_some() => {
                    deadline = None;
                    reload(&self.path, &gateway).await;
                }
            }
        }
        tracing::info!("config watcher stopped");
    }
}

async fn sleep_until_opt(deadline: Option<tokio::time::Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

/// One reload attempt: parse and validate the whole file, then install.
pub async fn reload(path: &Path, gateway: &Gateway) {
    let path_str = path.to_string_lossy();
    match load_route_map(&path_str) {
        Ok(routes) => {
            gateway.install(routes).await;
            tracing::info!(path = %path.display(), "configuration reloaded");
        }
        Err(e) => {
            tracing::warn!(
                path = %path.display(),
                error = %e,
                "config reload failed; keeping previous routing table"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use std::{fs, time::Instant};

    use async_trait::async_trait;
    use axum::body::Body;
    use http::{Request, Response};
    use tempfile::tempdir;

    use super::*;
    use crate::{
        core::RequestSigner,
        ports::http_client::{HttpClient, HttpClientResult},
        utils::GracefulShutdown,
    };

    struct NoopClient;

    #[async_trait]
    impl HttpClient for NoopClient {
        async fn send_request(&self, _req: Request<Body>) -> HttpClientResult<Response<Body>> {
            Ok(Response::new(Body::empty()))
        }
    }

    fn gateway() -> Arc<Gateway> {
        Arc::new(Gateway::new(Arc::new(NoopClient), RequestSigner::new("")))
    }

    const INITIAL: &str = r#"
services:
  - name: alpha
    host: "http://localhost:9001"
"#;

    const UPDATED: &str = r#"
services:
  - name: alpha
    host: "http://localhost:9001"
  - name: beta
    host: "http://localhost:9002"
"#;

    #[tokio::test(flavor = "multi_thread")]
    async fn test_file_change_triggers_reload() {
        let dir = tempdir().unwrap();
        let config_path = dir.path().join("aimas.yml");
        fs::write(&config_path, INITIAL).unwrap();

        let gw = gateway();
        reload(&config_path, &gw).await;
        assert!(gw.service_for_path("/alpha/x").is_some());
        assert!(gw.service_for_path("/beta/x").is_none());

        let watcher = ConfigWatcher::new(&config_path).unwrap();
        let shutdown = GracefulShutdown::new();
        let task = tokio::spawn(watcher.run(gw.clone(), shutdown.token()));

        // Let the watcher settle before mutating the file.
        tokio::time::sleep(Duration::from_millis(100)).await;
        fs::write(&config_path, UPDATED).unwrap();

        let deadline = Instant::now() + Duration::from_secs(3);
        while gw.service_for_path("/beta/x").is_none() {
            assert!(Instant::now() < deadline, "reload did not land in time");
            tokio::time::sleep(Duration::from_millis(50)).await;
        }

        shutdown.trigger();
        task.await.unwrap();
    }

    #[tokio::test]
    async fn test_failed_reload_keeps_previous_snapshot() {
        let dir = tempdir().unwrap();
        let config_path = dir.path().join("aimas.yml");
        fs::write(&config_path, INITIAL).unwrap();

        let gw = gateway();
        reload(&config_path, &gw).await;
        assert!(gw.service_for_path("/alpha/x").is_some());

        fs::write(&config_path, "services:\n  - name: broken\n    host: \"not a url\"\n").unwrap();
        reload(&config_path, &gw).await;

        assert!(gw.service_for_path("/alpha/x").is_some());
        assert!(gw.service_for_path("/broken/x").is_none());
    }
}
