// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Per-session counters.

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Poll and command counters for one device session.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SessionStats {
    /// Polls that produced a state snapshot.
    pub polls_succeeded: u64,
    /// Polls that failed for any reason.
    pub polls_failed: u64,
    /// Commands the device accepted.
    pub commands_succeeded: u64,
    /// Commands that failed for any reason.
    pub commands_failed: u64,
    /// Successful transport opens.
    pub connects: u64,
    /// Consecutive link failures since the last success.
    pub consecutive_failures: u32,
    /// When the device last answered successfully.
    pub last_success: Option<DateTime<Utc>>,
    /// The most recent error message.
    pub last_error: Option<String>,
}

impl SessionStats {
    pub(crate) fn record_connect(&mut self) {
        self.connects += 1;
    }

    pub(crate) fn record_poll_success(&mut self) {
        self.polls_succeeded += 1;
        self.record_success();
    }

    pub(crate) fn record_poll_failure(&mut self, error: &impl ToString) {
        self.polls_failed += 1;
        self.last_error = Some(error.to_string());
    }

    pub(crate) fn record_command_success(&mut self) {
        self.commands_succeeded += 1;
        self.record_success();
    }

    pub(crate) fn record_command_failure(&mut self, error: &impl ToString) {
        self.commands_failed += 1;
        self.last_error = Some(error.to_string());
    }

    /// Counts a link failure and returns the new streak length.
    pub(crate) fn record_link_failure(&mut self, error: &impl ToString) -> u32 {
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);
        self.last_error = Some(error.to_string());
        self.consecutive_failures
    }

    fn record_success(&mut self) {
        self.consecutive_failures = 0;
        self.last_success = Some(Utc::now());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn success_resets_streak() {
        let mut stats = SessionStats::default();
        assert_eq!(stats.record_link_failure(&"timeout"), 1);
        assert_eq!(stats.record_link_failure(&"timeout"), 2);

        stats.record_poll_success();
        assert_eq!(stats.consecutive_failures, 0);
        assert_eq!(stats.polls_succeeded, 1);
        assert!(stats.last_success.is_some());
        assert_eq!(stats.last_error.as_deref(), Some("timeout"));
    }

    #[test]
    fn failures_are_counted_per_operation() {
        let mut stats = SessionStats::default();
        stats.record_poll_failure(&"bad checksum");
        stats.record_command_failure(&"queue full");
        stats.record_command_success();

        assert_eq!(stats.polls_failed, 1);
        assert_eq!(stats.commands_failed, 1);
        assert_eq!(stats.commands_succeeded, 1);
        assert_eq!(stats.last_error.as_deref(), Some("queue full"));
    }
}
