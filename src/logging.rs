//! Logging setup for the binary.
//!
//! The library only emits `tracing` events; installing a subscriber is left
//! to whoever embeds it.

use tracing_subscriber::{fmt, EnvFilter};

/// Initialize logging with a specific level
///
/// `RUST_LOG` wins over `level` when set. Output goes to stderr so command
/// output on stdout stays machine-readable.
pub fn init_with_level(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    // a second init (tests, embedding) keeps the first subscriber
    let _ = fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}

/// Initialize logging for tests
pub fn init_test() {
    let _ = fmt()
        .with_env_filter(EnvFilter::new("debug"))
        .with_test_writer()
        .try_init();
}
