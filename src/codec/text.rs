// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Delimited `channel=value` text payloads.

use std::collections::BTreeSet;
use std::time::Duration;

use crate::error::{DecodeError, EncodeError};
use crate::types::{Command, CommandKind, OnOff, State, StateValue};

use super::{Codec, SymmetricCodec};

/// Pseudo-channel carrying the ramp of a level command.
const RAMP_KEY: &str = "ramp_ms";

/// Codec for line protocols such as `power=ON;volume=35;input=hdmi1`.
///
/// Values decode as switches (`ON`/`OFF`), numbers, or text. Channels
/// declared with [`with_level_channel`](Self::with_level_channel) decode as
/// 0-100 levels.
///
/// # Examples
///
/// ```
/// use pollbind::codec::{Codec, TextCodec};
/// use pollbind::types::{Command, OnOff, StateValue};
///
/// let codec = TextCodec::new()
///     .with_level_channel("volume")
///     .with_terminator("\r");
///
/// let state = codec.decode(b"power=ON;volume=35;input=hdmi1")?;
/// assert_eq!(state.get("volume"), Some(&StateValue::Level(35)));
///
/// let bytes = codec.encode(&Command::switch("power", OnOff::Off))?;
/// assert_eq!(bytes, b"power=OFF\r");
/// # Ok::<(), Box<dyn std::error::Error>>(())
/// ```
#[derive(Debug, Clone)]
pub struct TextCodec {
    pair_separator: char,
    value_separator: char,
    terminator: String,
    level_channels: BTreeSet<String>,
    poll_request: Option<Vec<u8>>,
}

impl Default for TextCodec {
    fn default() -> Self {
        Self {
            pair_separator: ';',
            value_separator: '=',
            terminator: String::new(),
            level_channels: BTreeSet::new(),
            poll_request: None,
        }
    }
}

impl TextCodec {
    /// Creates a codec using `;` between pairs and `=` inside them.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the separators between pairs and between channel and value.
    #[must_use]
    pub fn with_separators(mut self, pair: char, value: char) -> Self {
        self.pair_separator = pair;
        self.value_separator = value;
        self
    }

    /// Appends a terminator to every encoded command.
    #[must_use]
    pub fn with_terminator(mut self, terminator: impl Into<String>) -> Self {
        self.terminator = terminator.into();
        self
    }

    /// Decodes the given channel as a 0-100 level.
    #[must_use]
    pub fn with_level_channel(mut self, channel: impl Into<String>) -> Self {
        self.level_channels.insert(channel.into());
        self
    }

    /// Writes the given request before each poll read.
    #[must_use]
    pub fn with_poll_request(mut self, request: impl Into<Vec<u8>>) -> Self {
        self.poll_request = Some(request.into());
        self
    }

    /// Splits a payload into trimmed `(channel, value)` pairs.
    fn pairs<'a>(&self, bytes: &'a [u8]) -> Result<Vec<(&'a str, &'a str)>, DecodeError> {
        let text = std::str::from_utf8(bytes).map_err(|_| DecodeError::InvalidUtf8)?;

        text.split(|c| c == self.pair_separator || c == '\n' || c == '\r')
            .map(str::trim)
            .filter(|pair| !pair.is_empty())
            .map(|pair| {
                pair.split_once(self.value_separator)
                    .map(|(channel, value)| (channel.trim(), value.trim()))
                    .filter(|(channel, _)| !channel.is_empty())
                    .ok_or_else(|| DecodeError::MalformedPacket {
                        reason: format!("expected channel{}value, got {pair:?}", self.value_separator),
                    })
            })
            .collect()
    }

    fn parse_value(&self, channel: &str, raw: &str) -> Result<StateValue, DecodeError> {
        if self.level_channels.contains(channel) {
            return parse_level(channel, raw).map(StateValue::Level);
        }

        if raw.eq_ignore_ascii_case("on") {
            return Ok(StateValue::Switch(OnOff::On));
        }
        if raw.eq_ignore_ascii_case("off") {
            return Ok(StateValue::Switch(OnOff::Off));
        }
        match raw.parse::<f64>() {
            Ok(n) if n.is_finite() => Ok(StateValue::Number(n)),
            _ => Ok(StateValue::Text(raw.to_string())),
        }
    }

    fn check_text(&self, channel: &str, value: &str) -> Result<(), EncodeError> {
        let forbidden = [self.pair_separator, self.value_separator, '\n', '\r'];
        if channel.is_empty() || channel.contains(forbidden) {
            return Err(EncodeError::InvalidValue {
                channel: channel.to_string(),
                reason: "channel name is empty or contains a separator".to_string(),
            });
        }
        if value.contains(forbidden) {
            return Err(EncodeError::InvalidValue {
                channel: channel.to_string(),
                reason: format!("value {value:?} contains a separator"),
            });
        }
        Ok(())
    }
}

fn parse_level(channel: &str, raw: &str) -> Result<u8, DecodeError> {
    let value = raw.parse::<i64>().map_err(|_| DecodeError::MalformedPacket {
        reason: format!("level {channel} is not an integer: {raw:?}"),
    })?;
    u8::try_from(value)
        .ok()
        .filter(|l| *l <= 100)
        .ok_or_else(|| DecodeError::UnknownFieldValue {
            field: channel.to_string(),
            value,
        })
}

impl Codec for TextCodec {
    fn decode(&self, bytes: &[u8]) -> Result<State, DecodeError> {
        let pairs = self.pairs(bytes)?;
        if pairs.is_empty() {
            return Err(DecodeError::MalformedPacket {
                reason: "no channel values".to_string(),
            });
        }

        let mut builder = State::builder();
        for (channel, raw) in pairs {
            builder.insert(channel, self.parse_value(channel, raw)?);
        }
        Ok(builder.build())
    }

    fn encode(&self, command: &Command) -> Result<Vec<u8>, EncodeError> {
        let sep = self.value_separator;

        let mut text = match command.kind() {
            CommandKind::Switch { channel, state } => {
                self.check_text(channel, "")?;
                format!("{channel}{sep}{state}")
            }
            CommandKind::SetLevel {
                channel,
                level,
                ramp,
            } => {
                self.check_text(channel, "")?;
                if *level > 100 {
                    return Err(EncodeError::InvalidValue {
                        channel: channel.clone(),
                        reason: format!("level {level} exceeds 100"),
                    });
                }
                match ramp {
                    Some(ramp) => format!(
                        "{channel}{sep}{level}{}{RAMP_KEY}{sep}{}",
                        self.pair_separator,
                        ramp.as_millis()
                    ),
                    None => format!("{channel}{sep}{level}"),
                }
            }
            CommandKind::SetNumber { channel, value } => {
                self.check_text(channel, "")?;
                if !value.is_finite() {
                    return Err(EncodeError::InvalidValue {
                        channel: channel.clone(),
                        reason: format!("{value} is not a finite number"),
                    });
                }
                format!("{channel}{sep}{value}")
            }
            CommandKind::SetText { channel, value } => {
                self.check_text(channel, value)?;
                format!("{channel}{sep}{value}")
            }
            CommandKind::Refresh => {
                return match &self.poll_request {
                    Some(request) => Ok(request.clone()),
                    None => Err(EncodeError::Unsupported {
                        kind: command.kind().name().to_string(),
                    }),
                };
            }
        };

        text.push_str(&self.terminator);
        Ok(text.into_bytes())
    }

    fn poll_request(&self) -> Option<Vec<u8>> {
        self.poll_request.clone()
    }
}

impl SymmetricCodec for TextCodec {
    fn decode_command(&self, bytes: &[u8]) -> Result<Command, DecodeError> {
        if self.poll_request.as_deref() == Some(bytes) {
            return Ok(Command::refresh());
        }

        let pairs = self.pairs(bytes)?;
        let (target, ramp) = match pairs.as_slice() {
            [target] => (*target, None),
            [target, (RAMP_KEY, ms)] => {
                let ms = ms.parse::<u64>().map_err(|_| DecodeError::MalformedPacket {
                    reason: format!("invalid ramp {ms:?}"),
                })?;
                (*target, Some(Duration::from_millis(ms)))
            }
            _ => {
                return Err(DecodeError::MalformedPacket {
                    reason: "expected a single channel assignment".to_string(),
                });
            }
        };

        let (channel, raw) = target;
        let kind = match self.parse_value(channel, raw)? {
            StateValue::Switch(state) => CommandKind::Switch {
                channel: channel.to_string(),
                state,
            },
            StateValue::Level(level) => CommandKind::SetLevel {
                channel: channel.to_string(),
                level,
                ramp,
            },
            StateValue::Number(value) => CommandKind::SetNumber {
                channel: channel.to_string(),
                value,
            },
            StateValue::Text(value) => CommandKind::SetText {
                channel: channel.to_string(),
                value,
            },
        };

        Ok(Command::new(kind))
    }
}
