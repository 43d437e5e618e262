//! utitlity module
pub mod stream_utils;
#[cfg(test)]
pub mod testing;

use tracing::Level;
use tracing_indicatif::IndicatifLayer;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, EnvFilter};

///Intialize the application logger.
/// Log lines go through the indicatif writer so they don't tear progress bars apart.
/// # Arguements:
/// * verbose : Lower the default level from info to debug.
pub fn logger_init(verbose: bool) {
    let level = if verbose { Level::DEBUG } else { Level::INFO };
    let filter = EnvFilter::builder()
        .with_default_directive(level.into())
        .from_env_lossy(); // respects RUST_LOG if user set it
    let indicatif_layer = IndicatifLayer::new();

    tracing_subscriber::registry()
        .with(filter)
        .with(
            fmt::layer()
                .with_writer(indicatif_layer.get_stderr_writer())
                .with_ansi(true)
                .with_target(false)
                .compact(),
        )
        .with(indicatif_layer)
        .init();
}

///Intialize a logger for my tests.
/// Safe to call from every test, only the first call installs the subscriber.
/// # Arguements:
/// * level :This is the log level.
#[cfg(test)]
pub fn test_logger_init(level: Level) {
    let filter = EnvFilter::builder()
        .with_default_directive(level.into())
        .from_env_lossy();

    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(
            fmt::layer()
                .with_test_writer()
                .with_target(false)
                .with_file(false)
                .with_line_number(false)
                .compact(),
        )
        .try_init();
}
