// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Retry policy for records that failed a batch.
//!
//! Failed records go back to the queue tail. The strategy decides how many batch attempts a
//! record gets before it is written to the unsent-event log, and how long the scheduler
//! waits after a failed batch before forming the next one.
//!
//! Backoff strings follow the `name[,millis...]` convention used by the other duration
//! settings:
//!
//! - `"interval"` → wait one send interval (default)
//! - `"fixed,2000"` → wait 2 seconds
//! - `"linear,500"` → wait 500ms × attempt
//! - `"exponential,500,60000"` → wait 500ms × 2^(attempt-1), capped at 60 seconds

use std::str::FromStr;
use std::time::Duration;
use tracing::debug;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum Backoff {
    /// Wait one send interval, whatever the attempt count.
    #[default]
    Interval,
    /// Wait a constant number of milliseconds.
    Fixed(u64),
    /// Wait `step` milliseconds per failed attempt.
    Linear(u64),
    /// Double the wait on every failed attempt, starting at `base_ms`, never above `max_ms`.
    Exponential { base_ms: u64, max_ms: u64 },
}

impl Backoff {
    /// Delay before the next batch, given the highest attempt count in the failed batch.
    #[must_use]
    pub fn delay(&self, attempt: u32, send_interval: Duration) -> Duration {
        let attempt = attempt.max(1);
        match *self {
            Self::Interval => send_interval,
            Self::Fixed(ms) => Duration::from_millis(ms),
            Self::Linear(step) => Duration::from_millis(step.saturating_mul(u64::from(attempt))),
            Self::Exponential { base_ms, max_ms } => {
                let factor = 1u64.checked_shl(attempt - 1).unwrap_or(u64::MAX);
                Duration::from_millis(base_ms.saturating_mul(factor).min(max_ms))
            }
        }
    }
}

impl FromStr for Backoff {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let mut parts = value.trim().split(',').map(str::trim);
        let name = parts.next().unwrap_or_default().to_lowercase();
        let numbers: Vec<u64> = parts
            .map(|v| v.parse::<u64>().map_err(|_| format!("invalid backoff value '{v}'")))
            .collect::<Result<_, _>>()?;

        match (name.as_str(), numbers.as_slice()) {
            ("interval", []) => Ok(Self::Interval),
            ("fixed", [ms]) => Ok(Self::Fixed(*ms)),
            ("linear", [step]) => Ok(Self::Linear(*step)),
            ("exponential", [base_ms, max_ms]) if base_ms <= max_ms => Ok(Self::Exponential {
                base_ms: *base_ms,
                max_ms: *max_ms,
            }),
            _ => {
                debug!("Rejecting backoff configuration: {value}");
                Err(format!(
                    "invalid backoff '{value}', expected interval, fixed,MS, linear,MS or exponential,BASE,MAX"
                ))
            }
        }
    }
}

/// How many times a record may fail a batch, and how long to wait between batches.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub struct RetryStrategy {
    /// `None` retries until delivery or shutdown.
    pub max_attempts: Option<u32>,
    pub backoff: Backoff,
}

impl RetryStrategy {
    /// Whether a record that has failed `attempts` batches must stop being retried.
    #[must_use]
    pub fn is_exhausted(&self, attempts: u32) -> bool {
        self.max_attempts.is_some_and(|max| attempts >= max)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    const INTERVAL: Duration = Duration::from_secs(10);

    #[test]
    fn parse_interval() {
        assert_eq!("interval".parse::<Backoff>().unwrap(), Backoff::Interval);
    }

    #[test]
    fn parse_fixed_and_linear() {
        assert_eq!("fixed,2000".parse::<Backoff>().unwrap(), Backoff::Fixed(2000));
        assert_eq!("linear, 500".parse::<Backoff>().unwrap(), Backoff::Linear(500));
    }

    #[test]
    fn parse_exponential() {
        assert_eq!(
            "exponential,500,60000".parse::<Backoff>().unwrap(),
            Backoff::Exponential {
                base_ms: 500,
                max_ms: 60000
            }
        );
    }

    #[test]
    fn parse_invalid() {
        assert!("".parse::<Backoff>().is_err());
        assert!("fixed".parse::<Backoff>().is_err());
        assert!("fixed,abc".parse::<Backoff>().is_err());
        assert!("exponential,1000,10".parse::<Backoff>().is_err());
        assert!("jitter,10".parse::<Backoff>().is_err());
    }

    #[test]
    fn delay_interval_uses_send_interval() {
        assert_eq!(Backoff::Interval.delay(7, INTERVAL), INTERVAL);
    }

    #[test]
    fn delay_linear_grows_with_attempts() {
        let backoff = Backoff::Linear(100);
        assert_eq!(backoff.delay(1, INTERVAL), Duration::from_millis(100));
        assert_eq!(backoff.delay(3, INTERVAL), Duration::from_millis(300));
        assert_eq!(backoff.delay(0, INTERVAL), Duration::from_millis(100));
    }

    #[test]
    fn delay_exponential_is_capped() {
        let backoff = Backoff::Exponential {
            base_ms: 100,
            max_ms: 1000,
        };
        assert_eq!(backoff.delay(1, INTERVAL), Duration::from_millis(100));
        assert_eq!(backoff.delay(2, INTERVAL), Duration::from_millis(200));
        assert_eq!(backoff.delay(4, INTERVAL), Duration::from_millis(800));
        assert_eq!(backoff.delay(5, INTERVAL), Duration::from_millis(1000));
        assert_eq!(backoff.delay(200, INTERVAL), Duration::from_millis(1000));
    }

    #[test]
    fn unlimited_attempts_never_exhaust() {
        let strategy = RetryStrategy::default();
        assert!(!strategy.is_exhausted(u32::MAX));
    }

    #[test]
    fn bounded_attempts_exhaust() {
        let strategy = RetryStrategy {
            max_attempts: Some(3),
            backoff: Backoff::Interval,
        };
        assert!(!strategy.is_exhausted(2));
        assert!(strategy.is_exhausted(3));
    }
}
