//! Tracing bootstrap for embedders and tests.
//!
//! The monitor only emits `tracing` events; wiring a subscriber is the
//! embedder's business. This helper exists for binaries and tests that do
//! not bring their own.

use tracing_subscriber::EnvFilter;

/// Install a stderr subscriber. The `LOG` environment variable overrides
/// `verbosity`. A subscriber that is already installed wins silently.
pub fn init(verbosity: u8) {
    let filter = EnvFilter::builder()
        .with_default_directive(level_from_verbosity(verbosity).into())
        .with_env_var("LOG")
        .from_env_lossy();

    let _ = tracing_subscriber::fmt()
        .compact()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(true)
        .try_init();
}

fn level_from_verbosity(verbosity: u8) -> tracing::metadata::LevelFilter {
    match verbosity {
        0 => tracing::metadata::LevelFilter::ERROR,
        1 => tracing::metadata::LevelFilter::INFO,
        _ => tracing::metadata::LevelFilter::DEBUG,
    }
}
