//!
//! src/logging.rs
//!
//! Initializes logger so a tracking run leaves one structured
//! json line per event on stdout
//!
//!

use tracing_subscriber::{EnvFilter, fmt, prelude::*};
use tracing_error::ErrorLayer;
use tracing_appender::non_blocking;

use crate::config::LoggingConfig;
use crate::errors::TrackerError;

/// Flushes buffered log lines when dropped, hold it for the life of main
pub struct LoggingGuard(tracing_appender::non_blocking::WorkerGuard);

pub fn init_logging(cfg: &LoggingConfig) -> Result<LoggingGuard, TrackerError> {
    let (writer, guard) = non_blocking(std::io::stdout());
    let filter = std::env::var("RUST_LOG")
        .ok()
        .map(EnvFilter::new)
        .unwrap_or_else(|| EnvFilter::new(cfg.filter_directives.clone()));

    let time = fmt::time::UtcTime::rfc_3339();
    let fmt_layer = fmt::layer()
        .with_writer(writer)
        .with_timer(time)
        .with_target(cfg.include_target)
        .with_file(cfg.include_file_line)
        .with_line_number(cfg.include_file_line)
        .json()
        .flatten_event(true)
        .with_current_span(true)
        .with_span_list(true);

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt_layer)
        .with(ErrorLayer::default())
        .try_init()
        .map_err(|e| TrackerError::Config(format!("logger already set: {e}")))?;

    Ok( LoggingGuard(guard) )
}
