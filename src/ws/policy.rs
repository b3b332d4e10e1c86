//! Reconnection policies.
//!
//! A policy answers one question: how long to wait before reconnection attempt number
//! `attempt` (1-based), or whether to give up. The [`ConnectionManager`](super::ConnectionManager)
//! owns the attempt counter and consults the policy once per failure, so any policy can be
//! swapped in without touching the state machine.

use std::fmt::Debug;
use std::time::Duration;

use backoff::ExponentialBackoff;
use backoff::backoff::Backoff as _;

use super::config::BackoffConfig;

/// Decides the wait before the next connection attempt.
///
/// Implementations must return `None` exactly when `attempt` exceeds their attempt ceiling.
pub trait ReconnectPolicy: Debug + Send + Sync + 'static {
    /// Delay before attempt number `attempt`, or `None` to give up.
    fn next_delay(&self, attempt: u32) -> Option<Duration>;
}

/// Waits the same amount of time before every attempt.
#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FixedDelay {
    pub delay: Duration,
    pub max_attempts: u32,
}

impl FixedDelay {
    #[must_use]
    pub const fn new(delay: Duration, max_attempts: u32) -> Self {
        Self {
            delay,
            max_attempts,
        }
    }
}

impl ReconnectPolicy for FixedDelay {
    fn next_delay(&self, attempt: u32) -> Option<Duration> {
        (attempt <= self.max_attempts).then_some(self.delay)
    }
}

/// Exponential backoff with optional jitter, capped at [`BackoffConfig::max_backoff`].
///
/// The delay for attempt `n` is `initial * multiplier^(n - 1)`, capped, then randomized by
/// `± jitter`. With `jitter == 0.0` the policy is fully deterministic.
#[derive(Debug, Clone, Copy)]
pub struct ExponentialPolicy {
    max_attempts: u32,
    config: BackoffConfig,
}

impl ExponentialPolicy {
    #[must_use]
    pub fn new(max_attempts: u32, config: BackoffConfig) -> Self {
        Self {
            max_attempts,
            config,
        }
    }
}

impl ReconnectPolicy for ExponentialPolicy {
    fn next_delay(&self, attempt: u32) -> Option<Duration> {
        if attempt > self.max_attempts {
            return None;
        }

        // Replay the curve from scratch so the answer depends on `attempt` alone.
        let mut backoff: ExponentialBackoff = self.config.into();
        let mut delay = backoff.next_backoff();
        for _ in 1..attempt {
            delay = backoff.next_backoff();
        }
        delay
    }
}

impl<P: ReconnectPolicy + ?Sized> ReconnectPolicy for Box<P> {
    fn next_delay(&self, attempt: u32) -> Option<Duration> {
        (**self).next_delay(attempt)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixed_delay_gives_up_after_ceiling() {
        let policy = FixedDelay::new(Duration::from_millis(100), 2);

        assert_eq!(policy.next_delay(1), Some(Duration::from_millis(100)));
        assert_eq!(policy.next_delay(2), Some(Duration::from_millis(100)));
        assert_eq!(policy.next_delay(3), None);
        assert_eq!(policy.next_delay(u32::MAX), None);
    }

    #[test]
    fn fixed_delay_with_zero_attempts_never_retries() {
        let policy = FixedDelay::new(Duration::from_secs(1), 0);
        assert_eq!(policy.next_delay(1), None);
    }

    #[test]
    fn exponential_without_jitter_doubles_until_cap() {
        let config = BackoffConfig {
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_millis(500),
            backoff_multiplier: 2.0,
            jitter: 0.0,
        };
        let policy = ExponentialPolicy::new(10, config);

        assert_eq!(policy.next_delay(1), Some(Duration::from_millis(100)));
        assert_eq!(policy.next_delay(2), Some(Duration::from_millis(200)));
        assert_eq!(policy.next_delay(3), Some(Duration::from_millis(400)));
        assert_eq!(policy.next_delay(4), Some(Duration::from_millis(500)));
        assert_eq!(policy.next_delay(9), Some(Duration::from_millis(500)));
        assert_eq!(policy.next_delay(11), None);
    }

    #[test]
    fn exponential_is_repeatable_per_attempt() {
        let policy = ExponentialPolicy::new(5, BackoffConfig::default().without_jitter());

        assert_eq!(policy.next_delay(3), policy.next_delay(3));
    }

    #[test]
    fn exponential_jitter_stays_in_band() {
        let config = BackoffConfig {
            initial_backoff: Duration::from_millis(1000),
            max_backoff: Duration::from_secs(60),
            backoff_multiplier: 2.0,
            jitter: 0.5,
        };
        let policy = ExponentialPolicy::new(5, config);

        for _ in 0..20 {
            let delay = policy.next_delay(2).unwrap();
            assert!(delay >= Duration::from_millis(1000) && delay <= Duration::from_millis(3000));
        }
    }

    #[test]
    fn boxed_policy_delegates() {
        let policy: Box<dyn ReconnectPolicy> = Box::new(FixedDelay::new(Duration::from_secs(2), 1));

        assert_eq!(policy.next_delay(1), Some(Duration::from_secs(2)));
        assert_eq!(policy.next_delay(2), None);
    }
}
