// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Retry backoff policy.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Exponential backoff applied after failed poll cycles.
///
/// After `n` consecutive failures the next attempt is delayed by
/// `interval × multiplier^(n-1)`, capped at `max_delay`, plus up to
/// `jitter × delay` of random offset. There is no retry limit: a failed
/// device is retried at the capped delay until it is unregistered.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
/// use pollbind::config::BackoffPolicy;
///
/// let policy = BackoffPolicy::new()
///     .with_multiplier(2.0)
///     .with_max_delay(Duration::from_secs(60))
///     .without_jitter();
///
/// let interval = Duration::from_secs(10);
/// assert_eq!(policy.delay_for(interval, 0), Duration::from_secs(10));
/// assert_eq!(policy.delay_for(interval, 2), Duration::from_secs(20));
/// assert_eq!(policy.delay_for(interval, 5), Duration::from_secs(60));
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackoffPolicy {
    /// Growth factor per consecutive failure.
    pub multiplier: f32,
    /// Upper bound for the backoff delay.
    #[serde(rename = "max_delay_ms", with = "super::millis")]
    pub max_delay: Duration,
    /// Fraction of the delay added as random jitter (0.0 - 1.0).
    pub jitter: f32,
}

impl BackoffPolicy {
    /// Default cap on the backoff delay.
    pub const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(300);

    /// Creates a policy with default settings.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the growth factor.
    #[must_use]
    pub fn with_multiplier(mut self, multiplier: f32) -> Self {
        self.multiplier = multiplier;
        self
    }

    /// Sets the maximum delay.
    #[must_use]
    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Sets the jitter fraction.
    #[must_use]
    pub fn with_jitter(mut self, jitter: f32) -> Self {
        self.jitter = jitter;
        self
    }

    /// Disables jitter.
    #[must_use]
    pub fn without_jitter(self) -> Self {
        self.with_jitter(0.0)
    }

    /// Calculates the delay before the next attempt, without jitter.
    ///
    /// `failures` is the number of consecutive failed cycles so far; zero
    /// means the last cycle succeeded and the plain interval applies.
    #[must_use]
    pub fn delay_for(&self, interval: Duration, failures: u32) -> Duration {
        if failures == 0 {
            return interval;
        }

        let exponent = i32::try_from(failures - 1).unwrap_or(i32::MAX);
        let factor = f64::from(self.multiplier).powi(exponent);
        let delay_ms = interval.as_secs_f64() * 1000.0 * factor;

        if !delay_ms.is_finite() || delay_ms >= self.max_delay.as_secs_f64() * 1000.0 {
            return self.max_delay.max(interval);
        }

        // Safe: delay_ms is positive and below max_delay here
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let delay = Duration::from_millis(delay_ms as u64);

        delay.min(self.max_delay).max(interval)
    }

    /// Validates the policy values.
    pub(crate) fn validate(&self) -> Result<(), String> {
        if self.multiplier.is_nan() || self.multiplier < 1.0 {
            return Err(format!(
                "backoff multiplier must be at least 1.0, got {}",
                self.multiplier
            ));
        }
        if !(0.0..=1.0).contains(&self.jitter) {
            return Err(format!(
                "jitter must be between 0.0 and 1.0, got {}",
                self.jitter
            ));
        }
        Ok(())
    }
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            multiplier: 2.0,
            max_delay: Self::DEFAULT_MAX_DELAY,
            jitter: 0.1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_policy() {
        let policy = BackoffPolicy::default();
        assert!((policy.multiplier - 2.0).abs() < f32::EPSILON);
        assert_eq!(policy.max_delay, Duration::from_secs(300));
        assert!(policy.validate().is_ok());
    }

    #[test]
    fn delay_doubles_per_failure_and_caps() {
        let policy = BackoffPolicy::new()
            .with_max_delay(Duration::from_secs(60))
            .without_jitter();
        let interval = Duration::from_secs(10);

        assert_eq!(policy.delay_for(interval, 0), Duration::from_secs(10));
        assert_eq!(policy.delay_for(interval, 1), Duration::from_secs(10));
        assert_eq!(policy.delay_for(interval, 2), Duration::from_secs(20));
        assert_eq!(policy.delay_for(interval, 3), Duration::from_secs(40));
        assert_eq!(policy.delay_for(interval, 4), Duration::from_secs(60));
        assert_eq!(policy.delay_for(interval, 50), Duration::from_secs(60));
        assert_eq!(policy.delay_for(interval, u32::MAX), Duration::from_secs(60));
    }

    #[test]
    fn delay_is_monotonic() {
        let policy = BackoffPolicy::new().with_multiplier(1.5);
        let interval = Duration::from_millis(750);
        let mut previous = Duration::ZERO;
        for failures in 0..40 {
            let delay = policy.delay_for(interval, failures);
            assert!(delay >= previous, "delay shrank at {failures}");
            assert!(delay <= policy.max_delay);
            previous = delay;
        }
    }

    #[test]
    fn cap_below_interval_keeps_interval() {
        let policy = BackoffPolicy::new().with_max_delay(Duration::from_secs(1));
        let interval = Duration::from_secs(5);
        assert_eq!(policy.delay_for(interval, 3), interval);
    }

    #[test]
    fn validate_rejects_bad_values() {
        assert!(BackoffPolicy::new().with_multiplier(0.5).validate().is_err());
        assert!(BackoffPolicy::new().with_jitter(1.5).validate().is_err());
        assert!(BackoffPolicy::new().with_multiplier(f32::NAN).validate().is_err());
    }

    #[test]
    fn deserializes_with_defaults() {
        let policy: BackoffPolicy = serde_json::from_str(r#"{"max_delay_ms": 30000}"#).unwrap();
        assert_eq!(policy.max_delay, Duration::from_secs(30));
        assert!((policy.jitter - 0.1).abs() < f32::EPSILON);
    }
}
