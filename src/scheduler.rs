// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Per-device poll timing.

use std::time::Duration;

use rand::Rng;

use crate::config::{BackoffPolicy, DeviceConfig};

/// Decides when a device is polled next.
///
/// While polls succeed the delay is the configured interval. After `n`
/// consecutive failed cycles it grows to `interval × multiplier^(n-1)`,
/// capped at the policy's maximum, plus a random offset of up to
/// `jitter × delay` so that devices sharing a network don't retry in
/// lockstep. One success resets it.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
/// use pollbind::config::BackoffPolicy;
/// use pollbind::scheduler::PollSchedule;
///
/// let mut schedule = PollSchedule::new(
///     Duration::from_secs(10),
///     BackoffPolicy::new().with_max_delay(Duration::from_secs(60)).without_jitter(),
/// );
///
/// schedule.record_failure();
/// schedule.record_failure();
/// assert_eq!(schedule.next_delay(), Duration::from_secs(20));
///
/// schedule.record_success();
/// assert_eq!(schedule.next_delay(), Duration::from_secs(10));
/// ```
#[derive(Debug, Clone)]
pub struct PollSchedule {
    interval: Duration,
    backoff: BackoffPolicy,
    failures: u32,
}

impl PollSchedule {
    /// Creates a schedule with no recorded failures.
    #[must_use]
    pub fn new(interval: Duration, backoff: BackoffPolicy) -> Self {
        Self {
            interval,
            backoff,
            failures: 0,
        }
    }

    /// Creates a schedule from a device configuration.
    #[must_use]
    pub fn from_config(config: &DeviceConfig) -> Self {
        Self::new(config.poll_interval, config.backoff.clone())
    }

    /// Returns the healthy poll interval.
    #[must_use]
    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Returns the number of consecutive failed cycles.
    #[must_use]
    pub fn failures(&self) -> u32 {
        self.failures
    }

    /// Records a successful cycle.
    pub fn record_success(&mut self) {
        self.failures = 0;
    }

    /// Records a failed cycle.
    pub fn record_failure(&mut self) {
        self.failures = self.failures.saturating_add(1);
    }

    /// Returns the delay after `failures` consecutive failures, without
    /// jitter.
    #[must_use]
    pub fn delay_for(&self, failures: u32) -> Duration {
        self.backoff.delay_for(self.interval, failures)
    }

    /// Returns the next delay using `sample` (in `0.0..1.0`) as the random
    /// jitter draw.
    ///
    /// Jitter only applies while backing off; a healthy device is polled at
    /// exactly its interval.
    #[must_use]
    pub fn delay_with(&self, sample: f64) -> Duration {
        let delay = self.delay_for(self.failures);
        if self.failures == 0 || self.backoff.jitter <= 0.0 {
            return delay;
        }

        let ratio = f64::from(self.backoff.jitter) * sample.clamp(0.0, 1.0);
        let offset =
            Duration::try_from_secs_f64(delay.as_secs_f64() * ratio).unwrap_or(Duration::MAX);
        delay.saturating_add(offset)
    }

    /// Returns the next delay with a random jitter draw.
    #[must_use]
    pub fn next_delay(&self) -> Duration {
        let sample = if self.failures == 0 {
            0.0
        } else {
            rand::thread_rng().r#gen::<f64>()
        };
        self.delay_with(sample)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn schedule(jitter: f32) -> PollSchedule {
        PollSchedule::new(
            Duration::from_secs(10),
            BackoffPolicy::new()
                .with_max_delay(Duration::from_secs(60))
                .with_jitter(jitter),
        )
    }

    #[test]
    fn healthy_device_uses_interval() {
        let schedule = schedule(0.5);
        assert_eq!(schedule.failures(), 0);
        assert_eq!(schedule.next_delay(), Duration::from_secs(10));
        assert_eq!(schedule.delay_with(0.99), Duration::from_secs(10));
    }

    #[test]
    fn failures_back_off_and_success_resets() {
        let mut schedule = schedule(0.0);
        let mut delays = Vec::new();
        for _ in 0..5 {
            schedule.record_failure();
            delays.push(schedule.next_delay());
        }

        assert_eq!(
            delays,
            [10, 20, 40, 60, 60].map(Duration::from_secs).to_vec()
        );

        schedule.record_success();
        assert_eq!(schedule.next_delay(), Duration::from_secs(10));
    }

    #[test]
    fn jitter_is_bounded() {
        let mut schedule = schedule(0.25);
        schedule.record_failure();
        schedule.record_failure();

        assert_eq!(schedule.delay_with(0.0), Duration::from_secs(20));
        assert_eq!(schedule.delay_with(0.5), Duration::from_millis(22_500));
        assert_eq!(schedule.delay_with(7.0), Duration::from_secs(25));

        for _ in 0..100 {
            let delay = schedule.next_delay();
            assert!(delay >= Duration::from_secs(20));
            assert!(delay <= Duration::from_secs(25));
        }
    }

    #[test]
    fn huge_delays_saturate() {
        let mut schedule = PollSchedule::new(
            Duration::MAX,
            BackoffPolicy::new()
                .with_max_delay(Duration::MAX)
                .with_jitter(1.0),
        );
        assert_eq!(schedule.next_delay(), Duration::MAX);

        schedule.record_failure();
        assert_eq!(schedule.delay_with(1.0), Duration::MAX);
        assert_eq!(schedule.next_delay(), Duration::MAX);
    }

    #[test]
    fn from_config_uses_poll_interval() {
        let config = DeviceConfig::tcp("h", 1).with_poll_interval(Duration::from_secs(3));
        let schedule = PollSchedule::from_config(&config);
        assert_eq!(schedule.interval(), Duration::from_secs(3));
        assert_eq!(schedule.delay_for(0), Duration::from_secs(3));
    }
}
