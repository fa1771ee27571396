//! Application configuration.
//!
//! All recognized options with their defaults, loadable from environment
//! variables. Queue URLs default to LocalStack-style endpoints so a local
//! stack works out of the box; production deployments override them.

use std::time::Duration;

use thiserror::Error;

use crate::poller::PollerConfig;
use crate::retry::BackoffPolicy;

/// Errors that can occur during configuration operations.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// An environment variable has an invalid value.
    #[error("invalid value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    /// Configuration validation failed.
    #[error("configuration validation failed: {0}")]
    ValidationFailed(String),
}

/// Configuration for the archiver.
#[derive(Debug, Clone)]
pub struct AppConfig {
    // Queue settings
    /// URL of the source queue to drain.
    pub queue_url: String,
    /// URL of the dead-letter queue for exhausted messages.
    pub dead_letter_queue_url: String,

    // Storage settings
    /// Destination bucket for archived message bodies.
    pub bucket: String,

    // Retry settings
    /// Maximum attempts per message before diverting.
    pub max_attempts: u32,
    /// Backoff delay after the first failed attempt.
    pub initial_backoff: Duration,
    /// Upper bound on any backoff delay, applied before jitter.
    pub max_backoff: Duration,
    /// Floor applied to jittered delays.
    pub min_backoff: Duration,

    // Polling settings
    /// Maximum messages per receive call (SQS allows 1-10).
    pub batch_size: u32,
    /// Long-poll wait per receive call (SQS allows up to 20s).
    pub wait_time: Duration,
    /// Sleep between successful poll cycles.
    pub poll_interval: Duration,
    /// Sleep after a poll-level infrastructure error.
    pub error_backoff: Duration,

    // AWS settings
    /// AWS region.
    pub region: String,
    /// Optional endpoint override (LocalStack, MinIO).
    pub endpoint: Option<String>,
    /// Optional static access key; both key halves must be set to be used.
    pub access_key_id: Option<String>,
    /// Optional static secret key.
    pub secret_access_key: Option<String>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            queue_url: "http://localhost:4566/000000000000/sluice-queue".to_string(),
            dead_letter_queue_url: "http://localhost:4566/000000000000/sluice-dlq".to_string(),
            bucket: "sluice-archive".to_string(),

            max_attempts: 3,
            initial_backoff: Duration::from_millis(1000),
            max_backoff: Duration::from_millis(30_000),
            min_backoff: Duration::from_millis(100),

            batch_size: 10,
            wait_time: Duration::from_secs(20),
            poll_interval: Duration::from_secs(1),
            error_backoff: Duration::from_secs(5),

            region: "us-east-1".to_string(),
            endpoint: None,
            access_key_id: None,
            secret_access_key: None,
        }
    }
}

impl AppConfig {
    /// Creates a configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates configuration from environment variables.
    ///
    /// # Environment Variables
    ///
    /// - `SLUICE_QUEUE_URL`: source queue URL
    /// - `SLUICE_DLQ_URL`: dead-letter queue URL
    /// - `SLUICE_BUCKET`: destination bucket
    /// - `SLUICE_MAX_ATTEMPTS`: attempts per message (default: 3)
    /// - `SLUICE_INITIAL_BACKOFF_MS`: first backoff delay (default: 1000)
    /// - `SLUICE_MAX_BACKOFF_MS`: backoff cap (default: 30000)
    /// - `SLUICE_MIN_BACKOFF_MS`: backoff floor (default: 100)
    /// - `SLUICE_BATCH_SIZE`: messages per receive (default: 10)
    /// - `SLUICE_WAIT_TIME_SECS`: long-poll wait (default: 20)
    /// - `SLUICE_POLL_INTERVAL_MS`: inter-cycle sleep (default: 1000)
    /// - `SLUICE_ERROR_BACKOFF_MS`: error-cycle sleep (default: 5000)
    /// - `AWS_REGION`: region (default: us-east-1)
    /// - `AWS_ENDPOINT_URL`: endpoint override for LocalStack/MinIO
    /// - `AWS_ACCESS_KEY_ID` / `AWS_SECRET_ACCESS_KEY`: static credentials;
    ///   when absent the default provider chain is used
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if a variable has an invalid value or the
    /// resulting configuration fails validation.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Ok(val) = std::env::var("SLUICE_QUEUE_URL") {
            config.queue_url = val;
        }
        if let Ok(val) = std::env::var("SLUICE_DLQ_URL") {
            config.dead_letter_queue_url = val;
        }
        if let Ok(val) = std::env::var("SLUICE_BUCKET") {
            config.bucket = val;
        }

        if let Ok(val) = std::env::var("SLUICE_MAX_ATTEMPTS") {
            config.max_attempts = parse_env_value(&val, "SLUICE_MAX_ATTEMPTS")?;
        }
        if let Ok(val) = std::env::var("SLUICE_INITIAL_BACKOFF_MS") {
            let ms: u64 = parse_env_value(&val, "SLUICE_INITIAL_BACKOFF_MS")?;
            config.initial_backoff = Duration::from_millis(ms);
        }
        if let Ok(val) = std::env::var("SLUICE_MAX_BACKOFF_MS") {
            let ms: u64 = parse_env_value(&val, "SLUICE_MAX_BACKOFF_MS")?;
            config.max_backoff = Duration::from_millis(ms);
        }
        if let Ok(val) = std::env::var("SLUICE_MIN_BACKOFF_MS") {
            let ms: u64 = parse_env_value(&val, "SLUICE_MIN_BACKOFF_MS")?;
            config.min_backoff = Duration::from_millis(ms);
        }

        if let Ok(val) = std::env::var("SLUICE_BATCH_SIZE") {
            config.batch_size = parse_env_value(&val, "SLUICE_BATCH_SIZE")?;
        }
        if let Ok(val) = std::env::var("SLUICE_WAIT_TIME_SECS") {
            let secs: u64 = parse_env_value(&val, "SLUICE_WAIT_TIME_SECS")?;
            config.wait_time = Duration::from_secs(secs);
        }
        if let Ok(val) = std::env::var("SLUICE_POLL_INTERVAL_MS") {
            let ms: u64 = parse_env_value(&val, "SLUICE_POLL_INTERVAL_MS")?;
            config.poll_interval = Duration::from_millis(ms);
        }
        if let Ok(val) = std::env::var("SLUICE_ERROR_BACKOFF_MS") {
            let ms: u64 = parse_env_value(&val, "SLUICE_ERROR_BACKOFF_MS")?;
            config.error_backoff = Duration::from_millis(ms);
        }

        if let Ok(val) = std::env::var("AWS_REGION") {
            config.region = val;
        }
        config.endpoint = std::env::var("AWS_ENDPOINT_URL").ok();
        config.access_key_id = std::env::var("AWS_ACCESS_KEY_ID").ok();
        config.secret_access_key = std::env::var("AWS_SECRET_ACCESS_KEY").ok();

        config.validate()?;
        Ok(config)
    }

    /// Sets the source queue URL.
    pub fn with_queue_url(mut self, url: impl Into<String>) -> Self {
        self.queue_url = url.into();
        self
    }

    /// Sets the dead-letter queue URL.
    pub fn with_dead_letter_queue_url(mut self, url: impl Into<String>) -> Self {
        self.dead_letter_queue_url = url.into();
        self
    }

    /// Sets the destination bucket.
    pub fn with_bucket(mut self, bucket: impl Into<String>) -> Self {
        self.bucket = bucket.into();
        self
    }

    /// Sets the maximum attempts per message.
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    /// Validates the configuration values.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::ValidationFailed` if any values are invalid.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.queue_url.is_empty() {
            return Err(ConfigError::ValidationFailed(
                "queue_url cannot be empty".to_string(),
            ));
        }
        if self.dead_letter_queue_url.is_empty() {
            return Err(ConfigError::ValidationFailed(
                "dead_letter_queue_url cannot be empty".to_string(),
            ));
        }
        if self.bucket.is_empty() {
            return Err(ConfigError::ValidationFailed(
                "bucket cannot be empty".to_string(),
            ));
        }
        if self.max_attempts == 0 {
            return Err(ConfigError::ValidationFailed(
                "max_attempts must be at least 1".to_string(),
            ));
        }
        if self.batch_size == 0 || self.batch_size > 10 {
            return Err(ConfigError::ValidationFailed(
                "batch_size must be between 1 and 10".to_string(),
            ));
        }
        if self.wait_time > Duration::from_secs(20) {
            return Err(ConfigError::ValidationFailed(
                "wait_time must not exceed 20 seconds".to_string(),
            ));
        }
        if self.initial_backoff > self.max_backoff {
            return Err(ConfigError::ValidationFailed(
                "initial_backoff must not exceed max_backoff".to_string(),
            ));
        }
        Ok(())
    }

    /// Backoff policy configured from the retry settings.
    pub fn backoff_policy(&self) -> BackoffPolicy {
        BackoffPolicy::new(self.initial_backoff, self.max_backoff)
            .with_min_delay(self.min_backoff)
    }

    /// Poller configuration from the polling settings.
    pub fn poller_config(&self) -> PollerConfig {
        PollerConfig::default()
            .with_batch_size(self.batch_size)
            .with_wait_time(self.wait_time)
            .with_poll_interval(self.poll_interval)
            .with_error_backoff(self.error_backoff)
    }
}

/// Parse an environment variable value, reporting the variable on failure.
fn parse_env_value<T: std::str::FromStr>(value: &str, key: &str) -> Result<T, ConfigError> {
    value.parse().map_err(|_| ConfigError::InvalidValue {
        key: key.to_string(),
        message: format!("could not parse '{}'", value),
    })
}
