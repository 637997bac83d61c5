//! Tracing subscriber setup.

use crate::config::RuntimeConfig;
use tracing_subscriber::prelude::*;
use tracing_subscriber::EnvFilter;

/// Installs a global fmt subscriber.
///
/// `RUST_LOG` overrides `filter` when set. Returns false when a global
/// subscriber was already installed.
pub fn init_tracing(filter: &str, json: bool) -> bool {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

    let result = if json {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().json().with_target(true))
            .try_init()
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().with_target(true))
            .try_init()
    };

    match result {
        Ok(()) => {
            tracing::debug!(filter = %filter, json, "Tracing initialized");
            true
        }
        Err(_) => false,
    }
}

/// Installs a subscriber using the logging settings of `config`.
pub fn init_tracing_from_config(config: &RuntimeConfig) -> bool {
    init_tracing(&config.log_filter, config.json_logs)
}
