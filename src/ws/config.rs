#![expect(
    clippy::module_name_repetitions,
    reason = "Configuration types intentionally mirror the module name for clarity"
)]

use std::time::Duration;

use backoff::{ExponentialBackoff, ExponentialBackoffBuilder};
use bon::Builder;
use url::Url;

use super::policy::{ExponentialPolicy, FixedDelay};
use crate::Result;
use crate::error::Error;

const DEFAULT_MAX_RECONNECT_ATTEMPTS: u32 = 5;
const DEFAULT_RECONNECT_DELAY_DURATION: Duration = Duration::from_secs(3);
const DEFAULT_HEARTBEAT_INTERVAL_DURATION: Duration = Duration::from_secs(30);
const DEFAULT_INITIAL_BACKOFF_DURATION: Duration = Duration::from_secs(1);
const DEFAULT_MAX_BACKOFF_DURATION: Duration = Duration::from_secs(60);
const DEFAULT_BACKOFF_MULTIPLIER: f64 = 2.0;
const DEFAULT_BACKOFF_JITTER: f64 = 0.5;

/// Configuration for a [`ConnectionManager`](super::ConnectionManager).
///
/// Immutable once the manager is constructed. Only `url` is required:
///
/// ```
/// use std::time::Duration;
/// use realtime_link::ws::config::Config;
///
/// let config = Config::builder()
///     .url("wss://example.com/mcp-ws")
///     .max_reconnect_attempts(3)
///     .reconnect_delay(Duration::from_millis(500))
///     .build();
///
/// assert!(config.auto_reconnect);
/// assert!(config.validate().is_ok());
/// ```
#[non_exhaustive]
#[derive(Debug, Clone, Builder)]
pub struct Config {
    /// Fully formed `ws://` or `wss://` endpoint
    #[builder(into)]
    pub url: String,
    /// Whether closes and errors schedule another attempt
    #[builder(default = true)]
    pub auto_reconnect: bool,
    /// Consecutive failed attempts tolerated since the last successful open
    #[builder(default = DEFAULT_MAX_RECONNECT_ATTEMPTS)]
    pub max_reconnect_attempts: u32,
    /// Wait between a close/error and the next connection attempt
    #[builder(default = DEFAULT_RECONNECT_DELAY_DURATION)]
    pub reconnect_delay: Duration,
    /// Interval for sending `ping` envelopes while connected
    #[builder(default = DEFAULT_HEARTBEAT_INTERVAL_DURATION)]
    pub heartbeat_interval: Duration,
    /// Maximum silence from the server before the connection is considered dead.
    /// `None` disables liveness checking; pings are then best-effort only.
    pub heartbeat_timeout: Option<Duration>,
}

impl Config {
    /// Configuration for `url` with every other option at its default.
    #[must_use]
    pub fn new<S: Into<String>>(url: S) -> Self {
        Self::builder().url(url).build()
    }

    /// Check that the endpoint and timings are usable.
    pub fn validate(&self) -> Result<()> {
        let url = Url::parse(&self.url)?;
        if !matches!(url.scheme(), "ws" | "wss") {
            return Err(Error::validation(format!(
                "unsupported scheme `{}`, expected ws or wss",
                url.scheme()
            )));
        }

        if self.heartbeat_interval.is_zero() {
            return Err(Error::validation("heartbeat_interval must be non-zero"));
        }

        if self.heartbeat_timeout.is_some_and(|timeout| timeout.is_zero()) {
            return Err(Error::validation("heartbeat_timeout must be non-zero"));
        }

        Ok(())
    }

    /// The fixed-delay policy described by this configuration.
    #[must_use]
    pub fn reconnect_policy(&self) -> FixedDelay {
        FixedDelay::new(self.reconnect_delay, self.max_reconnect_attempts)
    }

    /// An exponential policy honouring this configuration's attempt ceiling.
    ///
    /// `reconnect_delay` becomes the initial backoff; the remaining knobs come from `backoff`.
    #[must_use]
    pub fn exponential_policy(&self, backoff: BackoffConfig) -> ExponentialPolicy {
        let backoff = BackoffConfig {
            initial_backoff: self.reconnect_delay,
            ..backoff
        };
        ExponentialPolicy::new(self.max_reconnect_attempts, backoff)
    }
}

/// Tuning for the exponential reconnection policy.
#[non_exhaustive]
#[derive(Debug, Clone, Copy)]
pub struct BackoffConfig {
    /// Initial backoff duration for first reconnection attempt
    pub initial_backoff: Duration,
    /// Maximum backoff duration
    pub max_backoff: Duration,
    /// Multiplier for exponential backoff
    pub backoff_multiplier: f64,
    /// Randomization factor in `[0, 1)`; `0.0` makes the policy deterministic
    pub jitter: f64,
}

impl BackoffConfig {
    /// Same curve without jitter.
    #[must_use]
    pub const fn without_jitter(self) -> Self {
        Self { jitter: 0.0, ..self }
    }
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            initial_backoff: DEFAULT_INITIAL_BACKOFF_DURATION,
            max_backoff: DEFAULT_MAX_BACKOFF_DURATION,
            backoff_multiplier: DEFAULT_BACKOFF_MULTIPLIER,
            jitter: DEFAULT_BACKOFF_JITTER,
        }
    }
}

impl From<BackoffConfig> for ExponentialBackoff {
    fn from(config: BackoffConfig) -> Self {
        ExponentialBackoffBuilder::default()
            .with_initial_interval(config.initial_backoff)
            .with_max_interval(config.max_backoff)
            .with_multiplier(config.backoff_multiplier)
            .with_randomization_factor(config.jitter)
            .with_max_elapsed_time(None) // We handle max attempts separately
            .build()
    }
}
