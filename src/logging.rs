//! Structured logging setup.
//!
//! Installs a `tracing` subscriber writing to **stderr**, so stdout stays
//! free for callers that print results. `RUST_LOG` always wins; otherwise
//! the level is `debug` when `verbose` is set and `info` when not.
//!
//! Safe to call more than once: later calls are no-ops, which lets test
//! binaries and embedding applications both call it.

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Install the global subscriber. Returns `false` if one was already set.
pub fn init_logging(verbose: bool, json: bool) -> bool {
    let filter = if verbose {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug"))
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    let registry = tracing_subscriber::registry().with(filter);
    let result = if json {
        registry
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .try_init()
    } else {
        registry
            .with(fmt::layer().with_writer(std::io::stderr))
            .try_init()
    };
    result.is_ok()
}
