//! Bus configuration.
//!
//! [`BusConfig`] is the serializable host-facing shape (JSON file or
//! environment); [`PublisherOptions`] and [`SubscriptionOptions`] are the
//! runtime values the publisher and listeners consume.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::broker::{ClientOptions, ConnectionString, RetryExponential};
use crate::error::ConfigError;

/// Environment variable holding the active connection string.
pub const ACTIVE_CONNECTION_ENV: &str = "TOPIC_BUS_ACTIVE_CONNECTION";
/// Environment variable holding the optional passive connection string.
pub const PASSIVE_CONNECTION_ENV: &str = "TOPIC_BUS_PASSIVE_CONNECTION";

/// Runtime options for a broker publisher.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PublisherOptions {
    /// Send attempts per delivery round
    pub max_send_attempts: u32,
    /// Fixed delay between attempts
    pub retry_delay: Duration,
    /// Minimum time between two connection swaps
    pub swap_cooldown: Duration,
    /// How long a publish waits for an in-flight swap before sending anyway
    pub swap_wait_timeout: Duration,
    pub client: ClientOptions,
}

impl Default for PublisherOptions {
    fn default() -> Self {
        Self {
            max_send_attempts: 5,
            retry_delay: Duration::from_secs(1),
            swap_cooldown: Duration::from_secs(30 * 60),
            swap_wait_timeout: Duration::from_secs(10),
            client: ClientOptions::default(),
        }
    }
}

/// Runtime options for broker listeners.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubscriptionOptions {
    /// Simultaneous in-flight messages per non-session listener
    pub max_concurrent_calls: usize,
    /// Upper bound on automatic lock renewal while a message is handled
    pub max_auto_renew: Duration,
    /// Receive poll interval; bounds how quickly a stop request is observed
    pub receive_timeout: Duration,
    /// Pause after a failed receive before trying again
    pub error_backoff: Duration,
    pub client: ClientOptions,
}

impl Default for SubscriptionOptions {
    fn default() -> Self {
        Self {
            max_concurrent_calls: 20,
            max_auto_renew: Duration::from_secs(60),
            receive_timeout: Duration::from_millis(250),
            error_backoff: Duration::from_secs(1),
            client: ClientOptions::new(
                Duration::from_secs(60),
                RetryExponential::new(Duration::from_secs(10), Duration::from_secs(60), 20),
            ),
        }
    }
}

/// Transport retry settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetryConfig {
    pub min_backoff_ms: u64,
    pub max_backoff_ms: u64,
    pub max_retries: u32,
}

impl From<&RetryConfig> for RetryExponential {
    fn from(config: &RetryConfig) -> Self {
        RetryExponential::new(
            Duration::from_millis(config.min_backoff_ms),
            Duration::from_millis(config.max_backoff_ms),
            config.max_retries,
        )
    }
}

impl From<RetryExponential> for RetryConfig {
    fn from(policy: RetryExponential) -> Self {
        Self {
            min_backoff_ms: policy.min_backoff.as_millis() as u64,
            max_backoff_ms: policy.max_backoff.as_millis() as u64,
            max_retries: policy.max_retries,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct PublisherConfig {
    pub max_send_attempts: u32,
    pub retry_delay_ms: u64,
    pub swap_cooldown_secs: u64,
    pub swap_wait_timeout_ms: u64,
    pub operation_timeout_secs: u64,
    pub retry: RetryConfig,
}

impl Default for PublisherConfig {
    fn default() -> Self {
        PublisherOptions::default().into()
    }
}

impl From<PublisherOptions> for PublisherConfig {
    fn from(options: PublisherOptions) -> Self {
        Self {
            max_send_attempts: options.max_send_attempts,
            retry_delay_ms: options.retry_delay.as_millis() as u64,
            swap_cooldown_secs: options.swap_cooldown.as_secs(),
            swap_wait_timeout_ms: options.swap_wait_timeout.as_millis() as u64,
            operation_timeout_secs: options.client.operation_timeout.as_secs(),
            retry: options.client.retry.into(),
        }
    }
}

impl From<&PublisherConfig> for PublisherOptions {
    fn from(config: &PublisherConfig) -> Self {
        Self {
            max_send_attempts: config.max_send_attempts,
            retry_delay: Duration::from_millis(config.retry_delay_ms),
            swap_cooldown: Duration::from_secs(config.swap_cooldown_secs),
            swap_wait_timeout: Duration::from_millis(config.swap_wait_timeout_ms),
            client: ClientOptions::new(
                Duration::from_secs(config.operation_timeout_secs),
                (&config.retry).into(),
            ),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SubscriptionConfig {
    pub max_concurrent_calls: usize,
    pub max_auto_renew_secs: u64,
    pub receive_timeout_ms: u64,
    pub error_backoff_ms: u64,
    pub operation_timeout_secs: u64,
    pub retry: RetryConfig,
}

impl Default for SubscriptionConfig {
    fn default() -> Self {
        SubscriptionOptions::default().into()
    }
}

impl From<SubscriptionOptions> for SubscriptionConfig {
    fn from(options: SubscriptionOptions) -> Self {
        Self {
            max_concurrent_calls: options.max_concurrent_calls,
            max_auto_renew_secs: options.max_auto_renew.as_secs(),
            receive_timeout_ms: options.receive_timeout.as_millis() as u64,
            error_backoff_ms: options.error_backoff.as_millis() as u64,
            operation_timeout_secs: options.client.operation_timeout.as_secs(),
            retry: options.client.retry.into(),
        }
    }
}

impl From<&SubscriptionConfig> for SubscriptionOptions {
    fn from(config: &SubscriptionConfig) -> Self {
        Self {
            max_concurrent_calls: config.max_concurrent_calls,
            max_auto_renew: Duration::from_secs(config.max_auto_renew_secs),
            receive_timeout: Duration::from_millis(config.receive_timeout_ms),
            error_backoff: Duration::from_millis(config.error_backoff_ms),
            client: ClientOptions::new(
                Duration::from_secs(config.operation_timeout_secs),
                (&config.retry).into(),
            ),
        }
    }
}

/// Host-facing bus configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BusConfig {
    pub active_connection: String,
    #[serde(default)]
    pub passive_connection: Option<String>,
    #[serde(default)]
    pub publisher: PublisherConfig,
    #[serde(default)]
    pub subscription: SubscriptionConfig,
}

impl BusConfig {
    pub fn new(active_connection: impl Into<String>) -> Self {
        Self {
            active_connection: active_connection.into(),
            ..Self::default()
        }
    }

    pub fn with_passive(mut self, passive_connection: impl Into<String>) -> Self {
        self.passive_connection = Some(passive_connection.into());
        self
    }

    /// Load connection strings from `TOPIC_BUS_ACTIVE_CONNECTION` and
    /// `TOPIC_BUS_PASSIVE_CONNECTION`; everything else takes its default.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Like [`BusConfig::from_env`] with a custom variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let active = lookup(ACTIVE_CONNECTION_ENV)
            .filter(|v| !v.trim().is_empty())
            .ok_or(ConfigError::Missing(ACTIVE_CONNECTION_ENV))?;
        let mut config = Self::new(active);
        config.passive_connection = lookup(PASSIVE_CONNECTION_ENV).filter(|v| !v.trim().is_empty());
        Ok(config)
    }

    /// Load configuration from a JSON file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|e| ConfigError::Io(e.to_string()))?;

        if path.extension().is_some_and(|ext| ext == "json") {
            serde_json::from_str(&contents).map_err(|e| ConfigError::Parse(e.to_string()))
        } else {
            Err(ConfigError::Parse(
                "only JSON configuration files are supported".into(),
            ))
        }
    }

    /// Check the settings that would make the bus unusable.
    ///
    /// An unusable passive connection is not an error here: the publisher
    /// disables failover and logs a warning instead.
    pub fn validate(&self) -> Result<(), ConfigError> {
        ConnectionString::parse(&self.active_connection)?;
        if self.publisher.max_send_attempts == 0 {
            return Err(ConfigError::Parse("maxSendAttempts must be at least 1".into()));
        }
        if self.subscription.max_concurrent_calls == 0 {
            return Err(ConfigError::Parse(
                "maxConcurrentCalls must be at least 1".into(),
            ));
        }
        Ok(())
    }

    pub fn publisher_options(&self) -> PublisherOptions {
        (&self.publisher).into()
    }

    pub fn subscription_options(&self) -> SubscriptionOptions {
        (&self.subscription).into()
    }
}
