//! Delivery throttling for live subscriptions.

use crate::error::{EventLogError, Result};
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};

/// Raw value meaning "no throttling".
pub const RATE_INFINITE: u32 = u32::MAX;

/// Length of one throttling window.
pub const RATE_WINDOW: Duration = Duration::from_secs(1);

/// A validated throttle setting.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RateLimit {
    #[default]
    Infinite,
    /// At most this many events per [`RATE_WINDOW`].
    PerWindow(u32),
}

impl RateLimit {
    /// Raw value, with [`RATE_INFINITE`] for no throttling.
    pub fn value(self) -> u32 {
        match self {
            RateLimit::Infinite => RATE_INFINITE,
            RateLimit::PerWindow(n) => n,
        }
    }
}

/// The set of accepted finite rate limits.
///
/// A finite value is accepted when it lies in `min..=max` and is a multiple
/// of `step`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitPolicy {
    pub min: u32,
    pub max: u32,
    pub step: u32,
}

impl Default for RateLimitPolicy {
    fn default() -> Self {
        Self {
            min: 10,
            max: 100_000,
            step: 10,
        }
    }
}

impl RateLimitPolicy {
    /// Validate a raw value into a [`RateLimit`].
    pub fn validate(&self, value: u32) -> Result<RateLimit> {
        if value == RATE_INFINITE {
            return Ok(RateLimit::Infinite);
        }
        let in_range = value >= self.min && value <= self.max;
        let on_step = self.step <= 1 || value % self.step == 0;
        if in_range && on_step {
            Ok(RateLimit::PerWindow(value))
        } else {
            Err(EventLogError::invalid_argument(format!(
                "Specify a multiple of {} between {} and {}, or RATE_INFINITE (got {})",
                self.step, self.min, self.max, value
            )))
        }
    }

    /// Re-check an already constructed limit (e.g. one loaded from config).
    pub fn check(&self, limit: RateLimit) -> Result<RateLimit> {
        self.validate(limit.value())
    }
}

/// Windowed delivery counter.
#[derive(Clone, Debug)]
pub struct RateLimiter {
    limit: RateLimit,
    window_start: Option<Instant>,
    delivered: u32,
}

impl RateLimiter {
    pub fn new(limit: RateLimit) -> Self {
        Self {
            limit,
            window_start: None,
            delivered: 0,
        }
    }

    pub fn limit(&self) -> RateLimit {
        self.limit
    }

    /// Change the limit and start a fresh window.
    pub fn set_limit(&mut self, limit: RateLimit) {
        self.limit = limit;
        self.reset();
    }

    pub fn reset(&mut self) {
        self.window_start = None;
        self.delivered = 0;
    }

    /// Whether the current window's budget is spent.
    pub fn is_exceeded(&mut self, now: Instant) -> bool {
        let max = match self.limit {
            RateLimit::Infinite => return false,
            RateLimit::PerWindow(n) => n,
        };
        match self.window_start {
            Some(start) if now.saturating_duration_since(start) < RATE_WINDOW => {
                self.delivered >= max
            }
            _ => {
                self.reset();
                false
            }
        }
    }

    /// Account for `count` delivered events.
    pub fn record(&mut self, now: Instant, count: u32) {
        if self.limit == RateLimit::Infinite {
            return;
        }
        if self.window_start.is_none() {
            self.window_start = Some(now);
        }
        self.delivered = self.delivered.saturating_add(count);
    }

    /// Events still allowed in the current window.
    pub fn remaining(&mut self, now: Instant) -> Option<u32> {
        match self.limit {
            RateLimit::Infinite => None,
            RateLimit::PerWindow(n) => {
                if self.is_exceeded(now) {
                    Some(0)
                } else {
                    Some(n.saturating_sub(self.delivered))
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_policy_accepts_infinite_and_steps() {
        let policy = RateLimitPolicy::default();
        assert_eq!(policy.validate(RATE_INFINITE).unwrap(), RateLimit::Infinite);
        assert_eq!(policy.validate(50).unwrap(), RateLimit::PerWindow(50));
        assert_eq!(policy.validate(10).unwrap(), RateLimit::PerWindow(10));
        assert_eq!(policy.validate(100_000).unwrap(), RateLimit::PerWindow(100_000));
    }

    #[test]
    fn test_policy_rejects_out_of_band() {
        let policy = RateLimitPolicy::default();
        for value in [0, 3, 33, 9, 100_010, RATE_INFINITE - 1] {
            let err = policy.validate(value).unwrap_err();
            assert!(matches!(err, EventLogError::InvalidArgument(_)), "{}", value);
        }
    }

    #[test]
    fn test_custom_policy() {
        let policy = RateLimitPolicy {
            min: 1,
            max: 5,
            step: 1,
        };
        assert!(policy.validate(3).is_ok());
        assert!(policy.validate(6).is_err());
    }

    #[test]
    fn test_limiter_window() {
        let start = Instant::now();
        let mut limiter = RateLimiter::new(RateLimit::PerWindow(2));

        assert!(!limiter.is_exceeded(start));
        limiter.record(start, 1);
        assert!(!limiter.is_exceeded(start));
        limiter.record(start, 1);
        assert!(limiter.is_exceeded(start + Duration::from_millis(500)));
        assert_eq!(limiter.remaining(start + Duration::from_millis(500)), Some(0));

        // New window
        let later = start + RATE_WINDOW + Duration::from_millis(1);
        assert!(!limiter.is_exceeded(later));
        assert_eq!(limiter.remaining(later), Some(2));
    }

    #[test]
    fn test_infinite_never_exceeded() {
        let now = Instant::now();
        let mut limiter = RateLimiter::new(RateLimit::Infinite);
        limiter.record(now, u32::MAX);
        assert!(!limiter.is_exceeded(now));
        assert_eq!(limiter.remaining(now), None);
    }

    proptest! {
        #[test]
        fn prop_accepted_values_read_back(k in 1u32..=10_000) {
            let value = k * 10;
            let policy = RateLimitPolicy::default();
            prop_assert_eq!(policy.validate(value).unwrap().value(), value);
        }

        #[test]
        fn prop_off_step_values_rejected(v in 0u32..100_000) {
            prop_assume!(v % 10 != 0);
            prop_assert!(RateLimitPolicy::default().validate(v).is_err());
        }
    }
}
