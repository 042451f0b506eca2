//! Tracing subscriber setup

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::LoggingConfig;

/// Build the filter: `RUST_LOG` wins, otherwise the configured level for qroute crates.
pub fn env_filter(config: &LoggingConfig) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        format!(
            "qroute_core={level},qroute_engine={level},qroute_rl={level}",
            level = config.level
        )
        .into()
    })
}

/// Install the global subscriber.
///
/// Returns `false` when a subscriber was already installed (e.g. by the host
/// process or an earlier test), which is not treated as an error.
pub fn init_tracing(config: &LoggingConfig) -> bool {
    let filter = env_filter(config);

    let installed = if config.json {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .try_init()
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .try_init()
    };

    installed.is_ok()
}
