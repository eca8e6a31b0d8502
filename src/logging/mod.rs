//! Diagnostic logging setup.
//!
//! Uses `tracing` with an `EnvFilter`. `RUST_LOG` wins when set; otherwise
//! the level comes from the `[logging]` config section, with `debug = true`
//! forcing debug output for the whole bridge.

use crate::config::LoggingConfig;
use tracing_subscriber::prelude::*;
use tracing_subscriber::EnvFilter;

/// The directive used when `RUST_LOG` is not set.
pub fn default_directive(config: &LoggingConfig) -> String {
    if config.debug {
        "debug".to_string()
    } else {
        config.level.clone()
    }
}

/// Install the global subscriber. Call once, before the server starts.
pub fn init(config: &LoggingConfig) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_directive(config)))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(filter)
        .init();
}
