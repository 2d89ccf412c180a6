// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Device state snapshots.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Two-position switch value.
///
/// # Examples
///
/// ```
/// use pollbind::types::OnOff;
///
/// assert_eq!("on".parse::<OnOff>(), Ok(OnOff::On));
/// assert_eq!(OnOff::from(false), OnOff::Off);
/// assert_eq!(OnOff::On.as_str(), "ON");
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OnOff {
    /// Switched off.
    Off,
    /// Switched on.
    On,
}

impl OnOff {
    /// Returns the wire string representation.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Off => "OFF",
            Self::On => "ON",
        }
    }

    /// Returns `true` if switched on.
    #[must_use]
    pub const fn is_on(&self) -> bool {
        matches!(self, Self::On)
    }
}

impl fmt::Display for OnOff {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OnOff {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "OFF" | "0" | "FALSE" => Ok(Self::Off),
            "ON" | "1" | "TRUE" => Ok(Self::On),
            _ => Err(s.to_string()),
        }
    }
}

impl From<bool> for OnOff {
    fn from(value: bool) -> Self {
        if value { Self::On } else { Self::Off }
    }
}

/// A single typed channel value reported by a device.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum StateValue {
    /// Switch position (relay, zone armed flag).
    Switch(OnOff),
    /// Percentage level, 0-100 (dimmer, shutter position).
    Level(u8),
    /// Arbitrary numeric reading.
    Number(f64),
    /// Free text or enumerated label.
    Text(String),
}

impl StateValue {
    /// Returns the switch position, if this is a switch value.
    #[must_use]
    pub fn as_switch(&self) -> Option<OnOff> {
        match self {
            Self::Switch(v) => Some(*v),
            _ => None,
        }
    }

    /// Returns the level, if this is a level value.
    #[must_use]
    pub fn as_level(&self) -> Option<u8> {
        match self {
            Self::Level(v) => Some(*v),
            _ => None,
        }
    }

    /// Returns a numeric view of switch, level and number values.
    #[must_use]
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Switch(v) => Some(if v.is_on() { 1.0 } else { 0.0 }),
            Self::Level(v) => Some(f64::from(*v)),
            Self::Number(v) => Some(*v),
            Self::Text(_) => None,
        }
    }

    /// Returns the text, if this is a text value.
    #[must_use]
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(v) => Some(v),
            _ => None,
        }
    }
}

impl fmt::Display for StateValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Switch(v) => write!(f, "{v}"),
            Self::Level(v) => write!(f, "{v}"),
            Self::Number(v) => write!(f, "{v}"),
            Self::Text(v) => f.write_str(v),
        }
    }
}

/// Immutable snapshot of device-reported values.
///
/// A `State` is produced by a codec from one complete poll response and
/// replaces the previous snapshot wholesale. There is no partial merge:
/// a channel missing from a snapshot is unknown, not "unchanged".
///
/// # Examples
///
/// ```
/// use pollbind::types::{OnOff, State, StateValue};
///
/// let state = State::builder()
///     .switch("power", OnOff::On)
///     .level("dimmer", 40)
///     .number("temperature", 21.5)
///     .build();
///
/// assert_eq!(state.get("power"), Some(&StateValue::Switch(OnOff::On)));
/// assert_eq!(state.len(), 3);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct State {
    values: BTreeMap<String, StateValue>,
    received_at: DateTime<Utc>,
}

impl State {
    /// Creates a snapshot from channel values, stamped with the current time.
    #[must_use]
    pub fn new(values: BTreeMap<String, StateValue>) -> Self {
        Self {
            values,
            received_at: Utc::now(),
        }
    }

    /// Starts building a snapshot.
    #[must_use]
    pub fn builder() -> StateBuilder {
        StateBuilder::default()
    }

    /// Returns the value for a channel.
    #[must_use]
    pub fn get(&self, channel: &str) -> Option<&StateValue> {
        self.values.get(channel)
    }

    /// Iterates over channels in name order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &StateValue)> {
        self.values.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Returns the number of channels in the snapshot.
    #[must_use]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Returns `true` if the snapshot carries no channels.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Returns when the snapshot was decoded.
    #[must_use]
    pub fn received_at(&self) -> DateTime<Utc> {
        self.received_at
    }

    /// Returns `true` if both snapshots carry the same channel values,
    /// ignoring the timestamp.
    #[must_use]
    pub fn same_values(&self, other: &State) -> bool {
        self.values == other.values
    }
}

/// Builder for [`State`] snapshots, used by codecs.
#[derive(Debug, Default)]
pub struct StateBuilder {
    values: BTreeMap<String, StateValue>,
}

impl StateBuilder {
    /// Sets a channel to an arbitrary value.
    #[must_use]
    pub fn value(mut self, channel: impl Into<String>, value: StateValue) -> Self {
        self.values.insert(channel.into(), value);
        self
    }

    /// Sets a switch channel.
    #[must_use]
    pub fn switch(self, channel: impl Into<String>, value: OnOff) -> Self {
        self.value(channel, StateValue::Switch(value))
    }

    /// Sets a level channel.
    #[must_use]
    pub fn level(self, channel: impl Into<String>, value: u8) -> Self {
        self.value(channel, StateValue::Level(value))
    }

    /// Sets a numeric channel.
    #[must_use]
    pub fn number(self, channel: impl Into<String>, value: f64) -> Self {
        self.value(channel, StateValue::Number(value))
    }

    /// Sets a text channel.
    #[must_use]
    pub fn text(self, channel: impl Into<String>, value: impl Into<String>) -> Self {
        self.value(channel, StateValue::Text(value.into()))
    }

    /// Inserts a value in place, for codecs that build in a loop.
    pub fn insert(&mut self, channel: impl Into<String>, value: StateValue) {
        self.values.insert(channel.into(), value);
    }

    /// Finishes the snapshot.
    #[must_use]
    pub fn build(self) -> State {
        State::new(self.values)
    }
}
