pub mod utils;

use std::path::Path;
use std::str::FromStr;

use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

pub const LOG_FILE_NAME: &str = "tessera.log";

/// Parse a configured level, falling back to `info`.
pub fn parse_level(level: &str) -> LevelFilter {
    match LevelFilter::from_str(level) {
        Ok(level) => level,
        Err(_) => {
            eprintln!("Warning: unknown log level {:?}, using info", level);
            LevelFilter::INFO
        }
    }
}

/// Initialize logging, panic handler, and build info reporting.
/// Returns guards that must be kept alive for the duration of the program.
pub fn init_logging(
    level: LevelFilter,
    log_dir: Option<&Path>,
) -> Vec<tracing_appender::non_blocking::WorkerGuard> {
    use tracing_subscriber::fmt::format::FmtSpan;

    let mut guards = Vec::new();

    // stdout carries command output
    let (stderr_writer, stderr_guard) = tracing_appender::non_blocking(std::io::stderr());
    guards.push(stderr_guard);

    let stderr_env_filter = EnvFilter::builder()
        .with_default_directive(level.into())
        .from_env_lossy();

    let stderr_layer = tracing_subscriber::fmt::layer()
        .compact()
        .with_writer(stderr_writer)
        .with_filter(stderr_env_filter);

    if let Some(log_dir) = log_dir {
        if let Err(e) = std::fs::create_dir_all(log_dir) {
            eprintln!(
                "Warning: Failed to create log directory {:?}: {}",
                log_dir, e
            );
        }

        let file_appender = tracing_appender::rolling::daily(log_dir, LOG_FILE_NAME);
        let (file_writer, file_guard) = tracing_appender::non_blocking(file_appender);
        guards.push(file_guard);

        let file_env_filter = EnvFilter::builder()
            .with_default_directive(level.into())
            .from_env_lossy();

        let file_layer = tracing_subscriber::fmt::layer()
            .with_writer(file_writer)
            .with_ansi(false)
            .with_span_events(FmtSpan::CLOSE)
            .with_filter(file_env_filter);

        tracing_subscriber::registry()
            .with(stderr_layer)
            .with(file_layer)
            .init();
    } else {
        tracing_subscriber::registry().with(stderr_layer).init();
    }

    utils::register_panic_logger();
    utils::report_build_info();

    guards
}
