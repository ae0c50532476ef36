//! Tracing subscriber setup for applications embedding the client.

use tracing_subscriber::EnvFilter;

use crate::config::LoggingConfig;
use crate::error::{RestError, Result};

/// Install a global `tracing` subscriber.
///
/// `RUST_LOG` wins over `config.level` when set. Fails if a global subscriber
/// is already installed.
pub fn init_tracing(config: &LoggingConfig) -> Result<()> {
    let filter = build_env_filter(&config.level)?;
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(true);

    let installed = if config.json {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
    installed.map_err(|e| RestError::Config(format!("failed to install tracing subscriber: {}", e)))
}

fn build_env_filter(level: &str) -> Result<EnvFilter> {
    match EnvFilter::try_from_default_env() {
        Ok(filter) => Ok(filter),
        Err(_) => EnvFilter::try_new(level)
            .map_err(|e| RestError::Config(format!("invalid log level {:?}: {}", level, e))),
    }
}
