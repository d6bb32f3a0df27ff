//! Configuration for the resolver

use std::time::Duration;

use naming_types::{HostIdentifier, IdentifierError};
use serde::{Deserialize, Serialize};

/// Who writes the identity store. Fixed at startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StoreMode {
    /// This process is the only writer; the in-process cache is authoritative.
    #[default]
    SingleWriter,

    /// Several processes write the same store; the cache is bypassed.
    SharedWriter,
}

/// Main resolver configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResolverConfig {
    /// Host owned by this process. Its identity is minted locally.
    #[serde(default)]
    pub local_host: Option<String>,

    #[serde(default)]
    pub store_mode: StoreMode,

    /// Bound on successor hops in one resolution
    #[serde(default = "default_max_depth")]
    pub max_establishment_depth: usize,

    /// How long to wait for a concurrent establishment of the same identifier
    #[serde(default = "default_lock_timeout")]
    pub lock_timeout_ms: u64,

    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            local_host: None,
            store_mode: StoreMode::default(),
            max_establishment_depth: default_max_depth(),
            lock_timeout_ms: default_lock_timeout(),
            logging: LoggingConfig::default(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level or filter directive
    #[serde(default = "default_log_level")]
    pub level: String,

    /// JSON format
    #[serde(default)]
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

fn default_max_depth() -> usize {
    16
}

fn default_lock_timeout() -> u64 {
    30_000
}

fn default_log_level() -> String {
    "info".to_string()
}

impl ResolverConfig {
    /// Load configuration from defaults, an optional file and `NAMING_*`
    /// environment variables (`NAMING_STORE_MODE`, `NAMING_LOGGING__LEVEL`).
    pub fn load(path: Option<&str>) -> Result<Self, config::ConfigError> {
        let mut builder = config::Config::builder();

        builder = builder.add_source(config::Config::try_from(&ResolverConfig::default())?);

        if let Some(path) = path {
            builder = builder.add_source(config::File::with_name(path).required(false));
        }

        builder = builder.add_source(
            config::Environment::with_prefix("NAMING")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        builder.build()?.try_deserialize()
    }

    /// Configuration for a store shared between several writers
    pub fn shared_writer() -> Self {
        Self {
            store_mode: StoreMode::SharedWriter,
            ..Default::default()
        }
    }

    pub fn with_local_host(mut self, host: impl Into<String>) -> Self {
        self.local_host = Some(host.into());
        self
    }

    pub fn local_host(&self) -> Result<Option<HostIdentifier>, IdentifierError> {
        self.local_host
            .as_deref()
            .map(HostIdentifier::parse)
            .transpose()
    }

    pub fn lock_timeout(&self) -> Duration {
        Duration::from_millis(self.lock_timeout_ms)
    }
}
