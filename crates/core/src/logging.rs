//! Process-wide logging initialization.
//!
//! Both binaries call [`init`] once at startup. Verbosity is controlled via
//! `RUST_LOG` (see `tracing_subscriber::EnvFilter`); when unset, a default
//! filter is applied instead of falling back to the crate's own built-in
//! level.

use tracing_subscriber::EnvFilter;

/// Install a global `tracing` subscriber writing to stderr.
///
/// `default_filter` is used when `RUST_LOG` is not set, e.g. `"info"` for
/// the coordinator and `"warn"` for the client.
pub fn init(default_filter: &str) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_filter.to_string()));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}
