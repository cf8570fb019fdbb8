// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use crate::error::ClientError;
use crate::queue::OverflowPolicy;
use crate::retry::{Backoff, RetryStrategy};
use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use tracing::warn;

pub const DEFAULT_ENDPOINT: &str = "https://inbox.contextsuite.com/v1";
pub const DEFAULT_MAX_BATCH_SIZE: usize = 100;
pub const DEFAULT_SEND_INTERVAL: Duration = Duration::from_secs(10);
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Added to the send interval when no explicit shutdown timeout is configured, so the
/// scheduler can finish a wait cycle and still send its final batches.
pub const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

const VALID_LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

/// How the write key is presented to the endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AuthScheme {
    /// HTTP basic auth with the write key as both username and password.
    #[default]
    Basic,
    /// `Authorization: Bearer <write key>`.
    Bearer,
}

impl FromStr for AuthScheme {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "basic" => Ok(Self::Basic),
            "bearer" => Ok(Self::Bearer),
            other => Err(format!("unknown auth scheme '{other}'")),
        }
    }
}

/// Configuration for the delivery pipeline.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Write key identifying the source; used for endpoint authentication
    pub write_key: String,
    /// Collection endpoint URL events are posted to
    pub endpoint: String,
    pub auth_scheme: AuthScheme,
    /// Upper bound on records per batched request
    pub max_batch_size: usize,
    /// How long the scheduler waits for the first record of a batch
    pub send_interval: Duration,
    /// Unsent-event log file; stderr when absent
    pub unsent_log_path: Option<PathBuf>,
    /// Bound on `close`; `send_interval` + [`SHUTDOWN_GRACE`] when absent
    pub shutdown_timeout: Option<Duration>,
    /// Per-request HTTP timeout
    pub request_timeout: Duration,
    /// HTTPS proxy URL
    pub https_proxy: Option<String>,
    /// Queue bound; unbounded when absent
    pub queue_capacity: Option<usize>,
    pub overflow_policy: OverflowPolicy,
    pub retry: RetryStrategy,
    /// Application name reported in event context
    pub application: Option<String>,
    /// Log level (e.g., trace, debug, info, warn, error)
    pub log_level: String,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            write_key: String::new(),
            endpoint: DEFAULT_ENDPOINT.to_string(),
            auth_scheme: AuthScheme::default(),
            max_batch_size: DEFAULT_MAX_BATCH_SIZE,
            send_interval: DEFAULT_SEND_INTERVAL,
            unsent_log_path: None,
            shutdown_timeout: None,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            https_proxy: None,
            queue_capacity: None,
            overflow_policy: OverflowPolicy::default(),
            retry: RetryStrategy::default(),
            application: None,
            log_level: "info".to_string(),
        }
    }
}

impl ClientConfig {
    #[must_use]
    pub fn new(write_key: impl Into<String>, endpoint: impl Into<String>) -> Self {
        Self {
            write_key: write_key.into(),
            endpoint: endpoint.into(),
            ..Default::default()
        }
    }

    /// Create configuration from environment variables
    pub fn from_env() -> Result<Self, ClientError> {
        let defaults = Self::default();

        let write_key = env::var("CXS_WRITE_KEY").unwrap_or_default();
        let endpoint = env::var("CXS_ENDPOINT").unwrap_or(defaults.endpoint);
        let auth_scheme = parse_var("CXS_AUTH_SCHEME")?.unwrap_or(defaults.auth_scheme);
        let max_batch_size = parse_var("CXS_MAX_BATCH_SIZE")?.unwrap_or(defaults.max_batch_size);
        let send_interval = parse_var::<u64>("CXS_SEND_INTERVAL_MS")?
            .map_or(defaults.send_interval, Duration::from_millis);
        let unsent_log_path = env::var("CXS_UNSENT_LOG_PATH")
            .ok()
            .filter(|path| !path.trim().is_empty())
            .map(PathBuf::from);
        let shutdown_timeout =
            parse_var::<u64>("CXS_SHUTDOWN_TIMEOUT_MS")?.map(Duration::from_millis);
        let request_timeout = parse_var::<u64>("CXS_REQUEST_TIMEOUT_MS")?
            .map_or(defaults.request_timeout, Duration::from_millis);
        let https_proxy = env::var("CXS_PROXY_HTTPS")
            .or_else(|_| env::var("HTTPS_PROXY"))
            .ok();
        let queue_capacity = parse_var("CXS_QUEUE_CAPACITY")?;
        let overflow_policy =
            parse_var("CXS_QUEUE_OVERFLOW")?.unwrap_or(defaults.overflow_policy);
        let retry = RetryStrategy {
            max_attempts: parse_var("CXS_MAX_ATTEMPTS")?,
            backoff: parse_var::<Backoff>("CXS_RETRY_BACKOFF")?.unwrap_or_default(),
        };
        let application = env::var("CXS_APPLICATION").ok();
        let log_level = env::var("CXS_LOG_LEVEL")
            .map(|val| val.to_lowercase())
            .unwrap_or(defaults.log_level);

        let config = Self {
            write_key,
            endpoint,
            auth_scheme,
            max_batch_size,
            send_interval,
            unsent_log_path,
            shutdown_timeout,
            request_timeout,
            https_proxy,
            queue_capacity,
            overflow_policy,
            retry,
            application,
            log_level,
        };

        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ClientError> {
        if self.write_key.trim().is_empty() {
            return Err(ClientError::InvalidConfig(
                "write key cannot be empty".to_string(),
            ));
        }

        if let Err(e) = reqwest::Url::parse(&self.endpoint) {
            return Err(ClientError::InvalidConfig(format!(
                "invalid endpoint '{}': {e}",
                self.endpoint
            )));
        }

        if self.max_batch_size == 0 {
            return Err(ClientError::InvalidConfig(
                "max batch size must be greater than 0".to_string(),
            ));
        }

        if self.send_interval.is_zero() {
            return Err(ClientError::InvalidConfig(
                "send interval must be greater than 0".to_string(),
            ));
        }

        if self.queue_capacity == Some(0) {
            return Err(ClientError::InvalidConfig(
                "queue capacity must be greater than 0".to_string(),
            ));
        }

        if self.retry.max_attempts == Some(0) {
            return Err(ClientError::InvalidConfig(
                "max attempts must be greater than 0".to_string(),
            ));
        }

        if !VALID_LOG_LEVELS.contains(&self.log_level.as_str()) {
            return Err(ClientError::InvalidConfig(format!(
                "Invalid log level '{}'. Must be one of: trace, debug, info, warn, error",
                self.log_level
            )));
        }

        if self.queue_capacity.is_none() && self.overflow_policy != OverflowPolicy::default() {
            warn!("Queue overflow policy is ignored because the queue is unbounded");
        }

        Ok(())
    }

    /// Effective bound on `close`.
    #[must_use]
    pub fn effective_shutdown_timeout(&self) -> Duration {
        self.shutdown_timeout
            .unwrap_or(self.send_interval + SHUTDOWN_GRACE)
    }
}

fn parse_var<T>(name: &str) -> Result<Option<T>, ClientError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(name) {
        Ok(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|e| ClientError::InvalidConfig(format!("{name}: {e}"))),
        _ => Ok(None),
    }
}
