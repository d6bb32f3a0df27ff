use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::LoggingConfig;
use crate::error::{ResolveError, ResolveResult};

/// Install the global tracing subscriber. A valid `RUST_LOG` overrides the
/// configured level. Fails if a subscriber is already installed.
///
/// Meant to be called once by the binary embedding the resolver.
pub fn init_tracing(config: &LoggingConfig) -> ResolveResult<()> {
    let env_filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => level_filter(&config.level)?,
    };

    let registry = tracing_subscriber::registry().with(env_filter);
    let installed = if config.json {
        registry
            .with(tracing_subscriber::fmt::layer().json())
            .try_init()
    } else {
        registry.with(tracing_subscriber::fmt::layer()).try_init()
    };

    installed.map_err(|e| ResolveError::Config(e.to_string()))
}

fn level_filter(level: &str) -> ResolveResult<EnvFilter> {
    EnvFilter::try_new(level)
        .map_err(|e| ResolveError::Config(format!("invalid log level {:?}: {}", level, e)))
}
