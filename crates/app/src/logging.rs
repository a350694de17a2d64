use std::path::Path;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

/// Install the global subscriber
///
/// Command output goes to stdout, so logs are written to stderr and, if
/// `log_dir` is set, to a daily rolling file. The returned guards flush the
/// writers and must live until the program exits.
pub fn init_logging(level: tracing::Level, log_dir: Option<&Path>) -> Vec<WorkerGuard> {
    let mut guards = Vec::new();

    let (stderr_writer, stderr_guard) = tracing_appender::non_blocking(std::io::stderr());
    guards.push(stderr_guard);

    let stderr_layer = tracing_subscriber::fmt::layer()
        .compact()
        .with_writer(stderr_writer)
        .with_filter(
            EnvFilter::builder()
                .with_default_directive(level.into())
                .from_env_lossy(),
        );

    let Some(log_dir) = log_dir else {
        tracing_subscriber::registry().with(stderr_layer).init();
        return guards;
    };

    if let Err(e) = std::fs::create_dir_all(log_dir) {
        eprintln!(
            "Warning: Failed to create log directory {:?}: {}",
            log_dir, e
        );
    }
    let file_appender = tracing_appender::rolling::daily(log_dir, "cask.log");
    let (file_writer, file_guard) = tracing_appender::non_blocking(file_appender);
    guards.push(file_guard);

    let file_layer = tracing_subscriber::fmt::layer()
        .with_writer(file_writer)
        .with_ansi(false)
        .with_filter(
            EnvFilter::builder()
                .with_default_directive(level.into())
                .from_env_lossy(),
        );

    tracing_subscriber::registry()
        .with(stderr_layer)
        .with(file_layer)
        .init();
    guards
}
