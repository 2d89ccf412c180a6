// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Connection health of a device session.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Connection state of a device session.
///
/// ```text
/// Disconnected -> Connecting -> Connected
///       ^             |             |
///       |             v             v
///       +--------- Failed <---------+
/// ```
///
/// `Failed` is entered once the failure budget is exhausted and carries the
/// last error for status displays. The next scheduled attempt moves the
/// session back to `Connecting`.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "status", content = "reason", rename_all = "snake_case")]
pub enum ConnectionState {
    /// No connection is open.
    #[default]
    Disconnected,
    /// A connection attempt is in progress.
    Connecting,
    /// The transport is open and the device answers.
    Connected,
    /// Repeated failures; the reason is shown to users.
    Failed(String),
}

impl ConnectionState {
    /// Returns true if the device is connected.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        matches!(self, Self::Connected)
    }

    /// Returns true if the device is in a failed state.
    #[must_use]
    pub fn is_failed(&self) -> bool {
        matches!(self, Self::Failed(_))
    }

    /// Returns the failure reason, if any.
    #[must_use]
    pub fn failure_reason(&self) -> Option<&str> {
        match self {
            Self::Failed(reason) => Some(reason),
            _ => None,
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Disconnected => f.write_str("disconnected"),
            Self::Connecting => f.write_str("connecting"),
            Self::Connected => f.write_str("connected"),
            Self::Failed(reason) => write!(f, "failed: {reason}"),
        }
    }
}
