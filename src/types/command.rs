// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Outbound device commands.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::OnOff;

/// Correlation id carried by every command.
///
/// Transports that acknowledge commands asynchronously echo this id back so
/// the reply can be matched to the command that caused it.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CorrelationId(Uuid);

impl CorrelationId {
    /// Creates a new random correlation id.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Creates a correlation id from an existing UUID.
    #[must_use]
    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Returns the underlying UUID.
    #[must_use]
    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for CorrelationId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for CorrelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // First 8 characters are enough to tell commands apart in logs
        let short = &self.0.to_string()[..8];
        write!(f, "CorrelationId({short}...)")
    }
}

impl fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// What a command asks the device to do.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CommandKind {
    /// Switch a channel on or off.
    Switch {
        /// Target channel.
        channel: String,
        /// Desired position.
        state: OnOff,
    },
    /// Set a percentage level, optionally ramping over time.
    SetLevel {
        /// Target channel.
        channel: String,
        /// Desired level, 0-100.
        level: u8,
        /// Ramp duration, when the device supports it.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        ramp: Option<Duration>,
    },
    /// Set a numeric setpoint.
    SetNumber {
        /// Target channel.
        channel: String,
        /// Desired value.
        value: f64,
    },
    /// Set a text or enumerated value.
    SetText {
        /// Target channel.
        channel: String,
        /// Desired value.
        value: String,
    },
    /// Ask the device for a fresh state snapshot.
    Refresh,
}

impl CommandKind {
    /// Returns a short name for logs and errors.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Switch { .. } => "switch",
            Self::SetLevel { .. } => "set_level",
            Self::SetNumber { .. } => "set_number",
            Self::SetText { .. } => "set_text",
            Self::Refresh => "refresh",
        }
    }

    /// Returns the target channel, if the command has one.
    #[must_use]
    pub fn channel(&self) -> Option<&str> {
        match self {
            Self::Switch { channel, .. }
            | Self::SetLevel { channel, .. }
            | Self::SetNumber { channel, .. }
            | Self::SetText { channel, .. } => Some(channel),
            Self::Refresh => None,
        }
    }
}

/// Typed outbound instruction for a device.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
/// use pollbind::types::{Command, CommandKind, OnOff};
///
/// let on = Command::switch("relay1", OnOff::On);
/// assert_eq!(on.kind().channel(), Some("relay1"));
///
/// let ramp = Command::set_level("dimmer", 60, Some(Duration::from_secs(2)));
/// assert!(matches!(ramp.kind(), CommandKind::SetLevel { level: 60, .. }));
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Command {
    correlation_id: CorrelationId,
    #[serde(flatten)]
    kind: CommandKind,
}

impl Command {
    /// Creates a command with a fresh correlation id.
    #[must_use]
    pub fn new(kind: CommandKind) -> Self {
        Self {
            correlation_id: CorrelationId::new(),
            kind,
        }
    }

    /// Creates a command with a known correlation id.
    #[must_use]
    pub fn with_correlation_id(kind: CommandKind, correlation_id: CorrelationId) -> Self {
        Self {
            correlation_id,
            kind,
        }
    }

    /// Creates a switch command.
    #[must_use]
    pub fn switch(channel: impl Into<String>, state: OnOff) -> Self {
        Self::new(CommandKind::Switch {
            channel: channel.into(),
            state,
        })
    }

    /// Creates a level command.
    #[must_use]
    pub fn set_level(channel: impl Into<String>, level: u8, ramp: Option<Duration>) -> Self {
        Self::new(CommandKind::SetLevel {
            channel: channel.into(),
            level,
            ramp,
        })
    }

    /// Creates a numeric setpoint command.
    #[must_use]
    pub fn set_number(channel: impl Into<String>, value: f64) -> Self {
        Self::new(CommandKind::SetNumber {
            channel: channel.into(),
            value,
        })
    }

    /// Creates a text command.
    #[must_use]
    pub fn set_text(channel: impl Into<String>, value: impl Into<String>) -> Self {
        Self::new(CommandKind::SetText {
            channel: channel.into(),
            value: value.into(),
        })
    }

    /// Creates a refresh request.
    #[must_use]
    pub fn refresh() -> Self {
        Self::new(CommandKind::Refresh)
    }

    /// Returns the correlation id.
    #[must_use]
    pub fn correlation_id(&self) -> CorrelationId {
        self.correlation_id
    }

    /// Returns what the command does.
    #[must_use]
    pub fn kind(&self) -> &CommandKind {
        &self.kind
    }

    /// Returns `true` for a refresh request.
    #[must_use]
    pub fn is_refresh(&self) -> bool {
        matches!(self.kind, CommandKind::Refresh)
    }
}
