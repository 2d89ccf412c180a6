// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Fixed-offset binary frames with an XOR checksum.
//!
//! Frame layout:
//!
//! ```text
//! +------+-----+-------------------+----------+
//! | 0xA5 | len | payload (len B)   | checksum |
//! +------+-----+-------------------+----------+
//! ```
//!
//! The checksum is the XOR of the length byte and every payload byte.
//! Status frames carry field values at the offsets of a [`FieldLayout`].
//! Command frames carry `[opcode, field index, arguments..]`.

use std::time::Duration;

use crate::error::{DecodeError, EncodeError};
use crate::types::{Command, CommandKind, OnOff, State, StateValue};

use super::{Codec, EnumTable, SymmetricCodec};

const START: u8 = 0xA5;

const OP_SWITCH: u8 = 0x01;
const OP_LEVEL: u8 = 0x02;
const OP_NUMBER: u8 = 0x03;
const OP_TEXT: u8 = 0x04;
const OP_QUERY: u8 = 0x05;

/// Ramp resolution on the wire.
const RAMP_UNIT_MS: u128 = 100;

/// How one field is stored in a status frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldKind {
    /// One byte, `0` or `1`.
    Switch,
    /// One byte, 0-100.
    Level,
    /// Two bytes, big-endian unsigned.
    U16,
    /// One byte naming an entry of the table.
    Enum(EnumTable),
}

impl FieldKind {
    const fn width(&self) -> usize {
        match self {
            Self::U16 => 2,
            Self::Switch | Self::Level | Self::Enum(_) => 1,
        }
    }

    const fn name(&self) -> &'static str {
        match self {
            Self::Switch => "switch",
            Self::Level => "level",
            Self::U16 => "u16",
            Self::Enum(_) => "enum",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Field {
    channel: String,
    offset: usize,
    kind: FieldKind,
}

/// Positions of the channels in a status frame payload.
///
/// # Examples
///
/// ```
/// use pollbind::codec::{EnumTable, FieldKind, FieldLayout};
///
/// let layout = FieldLayout::new()
///     .field("power", 0, FieldKind::Switch)
///     .field("brightness", 1, FieldKind::Level)
///     .field("lamp_hours", 2, FieldKind::U16)
///     .field("input", 4, FieldKind::Enum(EnumTable::new(["hdmi1", "hdmi2", "vga"])));
///
/// assert_eq!(layout.len(), 4);
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FieldLayout {
    fields: Vec<Field>,
}

impl FieldLayout {
    /// Creates an empty layout.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a field at a payload offset.
    #[must_use]
    pub fn field(mut self, channel: impl Into<String>, offset: usize, kind: FieldKind) -> Self {
        self.fields.push(Field {
            channel: channel.into(),
            offset,
            kind,
        });
        self
    }

    /// Returns the number of fields.
    #[must_use]
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// Returns `true` if the layout has no fields.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    fn find(&self, channel: &str) -> Option<(usize, &Field)> {
        self.fields
            .iter()
            .enumerate()
            .find(|(_, f)| f.channel == channel)
    }
}

/// Codec for checksummed binary frames.
///
/// By default every poll first writes a query frame, as serial devices
/// only report when asked.
#[derive(Debug, Clone)]
pub struct BinaryCodec {
    layout: FieldLayout,
    query_on_poll: bool,
}

impl BinaryCodec {
    /// Creates a codec for the given status layout.
    #[must_use]
    pub fn new(layout: FieldLayout) -> Self {
        Self {
            layout,
            query_on_poll: true,
        }
    }

    /// Reads status frames without querying first.
    #[must_use]
    pub fn without_poll_request(mut self) -> Self {
        self.query_on_poll = false;
        self
    }

    fn decode_field(field: &Field, payload: &[u8]) -> Result<StateValue, DecodeError> {
        let end = field.offset + field.kind.width();
        let bytes = payload
            .get(field.offset..end)
            .ok_or_else(|| DecodeError::MalformedPacket {
                reason: format!(
                    "payload of {} bytes is too short for {} at offset {}",
                    payload.len(),
                    field.channel,
                    field.offset
                ),
            })?;

        let unknown = |value: u8| DecodeError::UnknownFieldValue {
            field: field.channel.clone(),
            value: i64::from(value),
        };

        match &field.kind {
            FieldKind::Switch => match bytes[0] {
                0 => Ok(StateValue::Switch(OnOff::Off)),
                1 => Ok(StateValue::Switch(OnOff::On)),
                other => Err(unknown(other)),
            },
            FieldKind::Level => match bytes[0] {
                level @ 0..=100 => Ok(StateValue::Level(level)),
                other => Err(unknown(other)),
            },
            FieldKind::U16 => Ok(StateValue::Number(f64::from(u16::from_be_bytes([
                bytes[0], bytes[1],
            ])))),
            FieldKind::Enum(table) => table
                .lookup(&field.channel, i64::from(bytes[0]))
                .map(|name| StateValue::Text(name.to_string())),
        }
    }

    fn field_for<'a>(
        &'a self,
        channel: &str,
        command: &CommandKind,
        expected: &str,
    ) -> Result<(u8, &'a Field), EncodeError> {
        let (index, field) = self.layout.find(channel).ok_or_else(|| EncodeError::InvalidValue {
            channel: channel.to_string(),
            reason: "unknown channel".to_string(),
        })?;

        if field.kind.name() != expected {
            return Err(EncodeError::InvalidValue {
                channel: channel.to_string(),
                reason: format!(
                    "{} field does not accept {}",
                    field.kind.name(),
                    command.name()
                ),
            });
        }

        let index = u8::try_from(index).map_err(|_| EncodeError::InvalidValue {
            channel: channel.to_string(),
            reason: "field index does not fit in a frame".to_string(),
        })?;
        Ok((index, field))
    }
}

/// Wraps a payload in a frame.
fn frame(payload: &[u8]) -> Option<Vec<u8>> {
    let len = u8::try_from(payload.len()).ok()?;
    let mut bytes = Vec::with_capacity(payload.len() + 3);
    bytes.push(START);
    bytes.push(len);
    bytes.extend_from_slice(payload);
    bytes.push(checksum(len, payload));
    Some(bytes)
}

/// Validates a frame and returns its payload.
fn unframe(bytes: &[u8]) -> Result<&[u8], DecodeError> {
    let malformed = |reason: String| DecodeError::MalformedPacket { reason };

    let [start, len, rest @ ..] = bytes else {
        return Err(malformed(format!("frame of {} bytes is too short", bytes.len())));
    };
    if *start != START {
        return Err(malformed(format!("bad start byte 0x{start:02x}")));
    }

    let len = usize::from(*len);
    if rest.len() != len + 1 {
        return Err(malformed(format!(
            "length byte says {len} but frame carries {} payload bytes",
            rest.len().saturating_sub(1)
        )));
    }

    let (payload, tail) = rest.split_at(len);
    let expected = checksum(bytes[1], payload);
    if tail[0] != expected {
        return Err(malformed(format!(
            "checksum mismatch: expected 0x{expected:02x}, got 0x{:02x}",
            tail[0]
        )));
    }
    Ok(payload)
}

fn checksum(len: u8, payload: &[u8]) -> u8 {
    payload.iter().fold(len, |acc, b| acc ^ b)
}

impl Codec for BinaryCodec {
    fn decode(&self, bytes: &[u8]) -> Result<State, DecodeError> {
        let payload = unframe(bytes)?;
        if self.layout.is_empty() {
            return Err(DecodeError::Unsupported("empty field layout".to_string()));
        }

        let mut builder = State::builder();
        for field in &self.layout.fields {
            builder.insert(field.channel.clone(), Self::decode_field(field, payload)?);
        }
        Ok(builder.build())
    }

    fn encode(&self, command: &Command) -> Result<Vec<u8>, EncodeError> {
        let kind = command.kind();
        let payload = match kind {
            CommandKind::Switch { channel, state } => {
                let (index, _) = self.field_for(channel, kind, "switch")?;
                vec![OP_SWITCH, index, u8::from(state.is_on())]
            }
            CommandKind::SetLevel {
                channel,
                level,
                ramp,
            } => {
                let (index, _) = self.field_for(channel, kind, "level")?;
                if *level > 100 {
                    return Err(EncodeError::InvalidValue {
                        channel: channel.clone(),
                        reason: format!("level {level} exceeds 100"),
                    });
                }
                let units = ramp.map_or(0, |r| r.as_millis() / RAMP_UNIT_MS);
                let units = u16::try_from(units).map_err(|_| EncodeError::InvalidValue {
                    channel: channel.clone(),
                    reason: format!("ramp {ramp:?} is too long"),
                })?;
                let [hi, lo] = units.to_be_bytes();
                vec![OP_LEVEL, index, *level, hi, lo]
            }
            CommandKind::SetNumber { channel, value } => {
                let (index, _) = self.field_for(channel, kind, "u16")?;
                if !value.is_finite() || !(0.0..=65535.0).contains(value) || value.fract() > 0.0 {
                    return Err(EncodeError::InvalidValue {
                        channel: channel.clone(),
                        reason: format!("{value} is not an integer in 0-65535"),
                    });
                }
                // Range checked above
                #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
                let [hi, lo] = (*value as u16).to_be_bytes();
                vec![OP_NUMBER, index, hi, lo]
            }
            CommandKind::SetText { channel, value } => {
                let (index, field) = self.field_for(channel, kind, "enum")?;
                let FieldKind::Enum(table) = &field.kind else {
                    return Err(EncodeError::Unsupported {
                        kind: kind.name().to_string(),
                    });
                };
                let code = table
                    .position(value)
                    .and_then(|p| u8::try_from(p).ok())
                    .ok_or_else(|| EncodeError::InvalidValue {
                        channel: channel.clone(),
                        reason: format!("{value:?} is not a known value"),
                    })?;
                vec![OP_TEXT, index, code]
            }
            CommandKind::Refresh => vec![OP_QUERY],
        };

        frame(&payload).ok_or_else(|| EncodeError::Unsupported {
            kind: kind.name().to_string(),
        })
    }

    fn poll_request(&self) -> Option<Vec<u8>> {
        if self.query_on_poll {
            frame(&[OP_QUERY])
        } else {
            None
        }
    }
}

impl SymmetricCodec for BinaryCodec {
    fn decode_command(&self, bytes: &[u8]) -> Result<Command, DecodeError> {
        let payload = unframe(bytes)?;
        let malformed = |reason: &str| DecodeError::MalformedPacket {
            reason: reason.to_string(),
        };

        let [opcode, args @ ..] = payload else {
            return Err(malformed("empty command payload"));
        };
        if *opcode == OP_QUERY {
            return Ok(Command::refresh());
        }

        let [index, args @ ..] = args else {
            return Err(malformed("missing field index"));
        };
        let field = self
            .layout
            .fields
            .get(usize::from(*index))
            .ok_or_else(|| DecodeError::UnknownFieldValue {
                field: "field index".to_string(),
                value: i64::from(*index),
            })?;
        let channel = field.channel.clone();

        let kind = match (*opcode, args) {
            (OP_SWITCH, [value]) => CommandKind::Switch {
                channel,
                state: match value {
                    0 => OnOff::Off,
                    1 => OnOff::On,
                    other => {
                        return Err(DecodeError::UnknownFieldValue {
                            field: field.channel.clone(),
                            value: i64::from(*other),
                        });
                    }
                },
            },
            (OP_LEVEL, [level, hi, lo]) => {
                let units = u16::from_be_bytes([*hi, *lo]);
                CommandKind::SetLevel {
                    channel,
                    level: *level,
                    ramp: (units > 0).then(|| Duration::from_millis(u64::from(units) * 100)),
                }
            }
            (OP_NUMBER, [hi, lo]) => CommandKind::SetNumber {
                channel,
                value: f64::from(u16::from_be_bytes([*hi, *lo])),
            },
            (OP_TEXT, [code]) => {
                let FieldKind::Enum(table) = &field.kind else {
                    return Err(malformed("text command on a non-enum field"));
                };
                CommandKind::SetText {
                    value: table.lookup(&channel, i64::from(*code))?.to_string(),
                    channel,
                }
            }
            (OP_SWITCH | OP_LEVEL | OP_NUMBER | OP_TEXT, _) => {
                return Err(malformed("wrong argument length"));
            }
            (other, _) => {
                return Err(DecodeError::UnknownFieldValue {
                    field: "opcode".to_string(),
                    value: i64::from(other),
                });
            }
        };

        Ok(Command::new(kind))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn projector() -> BinaryCodec {
        BinaryCodec::new(
            FieldLayout::new()
                .field("power", 0, FieldKind::Switch)
                .field("brightness", 1, FieldKind::Level)
                .field("lamp_hours", 2, FieldKind::U16)
                .field(
                    "input",
                    4,
                    FieldKind::Enum(EnumTable::new(["hdmi1", "hdmi2", "vga"])),
                ),
        )
    }

    fn status(payload: &[u8]) -> Vec<u8> {
        frame(payload).unwrap()
    }

    #[test]
    fn decode_status_frame() {
        let state = projector().decode(&status(&[1, 80, 0x01, 0x2C, 2])).unwrap();

        assert_eq!(state.get("power"), Some(&StateValue::Switch(OnOff::On)));
        assert_eq!(state.get("brightness"), Some(&StateValue::Level(80)));
        assert_eq!(state.get("lamp_hours"), Some(&StateValue::Number(300.0)));
        assert_eq!(state.get("input"), Some(&StateValue::Text("vga".to_string())));
    }

    #[test]
    fn checksum_mismatch_is_malformed() {
        let mut bytes = status(&[1, 80, 0, 0, 0]);
        let last = bytes.len() - 1;
        bytes[last] ^= 0xFF;

        let err = projector().decode(&bytes).unwrap_err();
        assert!(matches!(err, DecodeError::MalformedPacket { ref reason } if reason.contains("checksum")));
    }

    #[test]
    fn bad_framing_is_malformed() {
        let codec = projector();
        assert!(matches!(
            codec.decode(&[START]),
            Err(DecodeError::MalformedPacket { .. })
        ));
        assert!(matches!(
            codec.decode(&[0x00, 0x01, 0x00, 0x01]),
            Err(DecodeError::MalformedPacket { .. })
        ));
        assert!(matches!(
            codec.decode(&[START, 0x05, 0x01, 0x04]),
            Err(DecodeError::MalformedPacket { .. })
        ));
    }

    #[test]
    fn short_payload_is_malformed() {
        let err = projector().decode(&status(&[1, 80])).unwrap_err();
        assert!(matches!(err, DecodeError::MalformedPacket { .. }));
    }

    #[test]
    fn unknown_enum_code_is_reported() {
        let err = projector().decode(&status(&[0, 10, 0, 0, 7])).unwrap_err();
        assert!(matches!(
            err,
            DecodeError::UnknownFieldValue { ref field, value: 7 } if field == "input"
        ));
    }

    #[test]
    fn out_of_range_switch_is_reported() {
        let err = projector().decode(&status(&[3, 10, 0, 0, 0])).unwrap_err();
        assert!(matches!(err, DecodeError::UnknownFieldValue { value: 3, .. }));
    }

    #[test]
    fn poll_request_is_query_frame() {
        assert_eq!(
            projector().poll_request(),
            Some(vec![START, 0x01, OP_QUERY, 0x01 ^ OP_QUERY])
        );
        assert_eq!(projector().without_poll_request().poll_request(), None);
    }

    #[test]
    fn encode_rejects_mismatched_fields() {
        let codec = projector();
        assert!(matches!(
            codec.encode(&Command::switch("brightness", OnOff::On)),
            Err(EncodeError::InvalidValue { .. })
        ));
        assert!(matches!(
            codec.encode(&Command::switch("missing", OnOff::On)),
            Err(EncodeError::InvalidValue { .. })
        ));
        assert!(matches!(
            codec.encode(&Command::set_number("lamp_hours", 1.5)),
            Err(EncodeError::InvalidValue { .. })
        ));
        assert!(matches!(
            codec.encode(&Command::set_text("input", "dvi")),
            Err(EncodeError::InvalidValue { .. })
        ));
    }

    #[test]
    fn commands_round_trip() {
        let codec = projector();
        let commands = [
            Command::switch("power", OnOff::On),
            Command::set_level("brightness", 45, Some(Duration::from_secs(2))),
            Command::set_level("brightness", 0, None),
            Command::set_number("lamp_hours", 1200.0),
            Command::set_text("input", "hdmi2"),
            Command::refresh(),
        ];

        for command in commands {
            let decoded = codec
                .decode_command(&codec.encode(&command).unwrap())
                .unwrap();
            assert_eq!(decoded.kind(), command.kind());
        }
    }
}
