use eyre::{Result, WrapErr};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{EnvFilter, Registry, layer::SubscriberExt, util::SubscriberInitExt};

/// Initialize logging according to `MODE`.
///
/// `MODE=debug` logs human-readable output to stdout only. Any other mode
/// logs JSON to stdout and to a daily-rotated `logs/gateway.log`. The returned
/// guard must be held for the life of the process so buffered file output is
/// flushed on exit.
pub fn init_tracing() -> Result<Option<WorkerGuard>> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let mode = std::env::var("MODE").unwrap_or_default();

    if mode.eq_ignore_ascii_case("debug") {
        Registry::default()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().pretty().with_target(true))
            .init();
        return Ok(None);
    }

    std::fs::create_dir_all("logs").wrap_err("failed to create log directory")?;
    let file_appender = tracing_appender::rolling::daily("logs", "gateway.log");
    let (file_writer, guard) = tracing_appender::non_blocking(file_appender);

    Registry::default()
        .with(env_filter)
        .with(
            tracing_subscriber::fmt::layer()
                .json()
                .with_current_span(false)
                .with_target(true),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .json()
                .with_current_span(false)
                .with_target(true)
                .with_ansi(false)
                .with_writer(file_writer),
        )
        .init();

    Ok(Some(guard))
}
