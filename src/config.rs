//! Tunables for every component, loadable from TOML.
//!
//! Every section and every field is optional; anything left out keeps its
//! default. Durations are written in milliseconds.
//!
//! ```rust
//! use std::time::Duration;
//! use breakwater::ResilienceConfig;
//!
//! let config = ResilienceConfig::from_toml_str(r#"
//!     providers = ["anthropic", "openai"]
//!
//!     [breaker]
//!     failure_threshold = 3
//!     cooldown_ms = 10000
//!
//!     [retry]
//!     max_attempts = 5
//!
//!     [queue]
//!     storage_key = "pending_writes"
//! "#).unwrap();
//!
//! assert_eq!(config.breaker.failure_threshold, 3);
//! assert_eq!(config.breaker.cooldown, Duration::from_secs(10));
//! assert_eq!(config.retry.max_attempts(), 5);
//! assert_eq!(config.retry.base_delay(), Duration::from_secs(1));
//! assert_eq!(config.queue.max_retries, 3);
//! assert_eq!(config.logger.capacity, 100);
//! ```

use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::circuit::BreakerConfig;
use crate::classify::{ProviderRotation, DEFAULT_PROVIDERS};
use crate::logger::LoggerConfig;
use crate::queue::QueueConfig;
use crate::retry::RetryPolicy;

/// Failure loading a [`ResilienceConfig`].
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The file could not be read.
    #[error("failed to read config {path}")]
    Read {
        /// Path that was read.
        path: String,
        /// Underlying failure.
        #[source]
        source: std::io::Error,
    },

    /// The TOML was malformed or had wrongly typed fields.
    #[error("invalid config: {0}")]
    Parse(#[from] toml::de::Error),

    /// The provider list was empty.
    #[error("at least one provider must be configured")]
    NoProviders,
}

/// Settings for the whole [`Resilience`](crate::Resilience) context.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResilienceConfig {
    /// Circuit breaker settings.
    pub breaker: BreakerConfig,
    /// Default retry policy.
    pub retry: RetryPolicy,
    /// Offline queue settings.
    pub queue: QueueConfig,
    /// Error log settings.
    pub logger: LoggerConfig,
    /// Provider rotation order for fallbacks.
    pub providers: Vec<String>,
}

impl Default for ResilienceConfig {
    fn default() -> Self {
        Self {
            breaker: BreakerConfig::default(),
            retry: RetryPolicy::default(),
            queue: QueueConfig::default(),
            logger: LoggerConfig::default(),
            providers: DEFAULT_PROVIDERS.iter().map(|p| p.to_string()).collect(),
        }
    }
}

impl ResilienceConfig {
    /// Parse TOML, filling gaps with defaults.
    pub fn from_toml_str(source: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(source)?;
        config.validate()?;
        Ok(config)
    }

    /// Read and parse a TOML file.
    pub fn from_toml_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let source = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml_str(&source)
    }

    /// Replace the breaker settings.
    pub fn with_breaker(mut self, breaker: BreakerConfig) -> Self {
        self.breaker = breaker;
        self
    }

    /// Replace the default retry policy.
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Replace the queue settings.
    pub fn with_queue(mut self, queue: QueueConfig) -> Self {
        self.queue = queue;
        self
    }

    /// Replace the logger settings.
    pub fn with_logger(mut self, logger: LoggerConfig) -> Self {
        self.logger = logger;
        self
    }

    /// Replace the provider rotation.
    pub fn with_providers<I, S>(mut self, providers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.providers = providers.into_iter().map(Into::into).collect();
        self
    }

    /// The configured provider rotation.
    pub fn rotation(&self) -> ProviderRotation {
        ProviderRotation::new(self.providers.iter().cloned())
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.providers.is_empty() {
            return Err(ConfigError::NoProviders);
        }
        Ok(())
    }
}

/// `Duration` as integer milliseconds.
pub(crate) mod duration_ms {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(u64::try_from(value.as_millis()).unwrap_or(u64::MAX))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}
