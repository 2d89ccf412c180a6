// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! JSON object payloads.

use std::collections::BTreeSet;
use std::time::Duration;

use serde_json::{Map, Number, Value, json};
use uuid::Uuid;

use crate::error::{DecodeError, EncodeError};
use crate::types::{Command, CommandKind, CorrelationId, OnOff, State, StateBuilder, StateValue};

use super::{Codec, SymmetricCodec};

/// Reply key carrying the correlation id of the acknowledged command.
const ACK_KEY: &str = "ack";

/// Codec for devices that report state as a JSON object.
///
/// Every scalar member becomes a channel. Nested objects are flattened with
/// dotted names (`{"wifi": {"rssi": -60}}` becomes `wifi.rssi`), arrays and
/// nulls are ignored. Booleans and the strings `"ON"`/`"OFF"` decode as
/// switches, numbers as numbers, other strings as text. Channels declared
/// with [`with_level_channel`](Self::with_level_channel) decode as 0-100
/// levels.
///
/// Commands are encoded as
/// `{"id": "<correlation id>", "kind": "<kind>", "channel": "..", "value": ..}`.
///
/// # Examples
///
/// ```
/// use pollbind::codec::{Codec, JsonCodec};
/// use pollbind::types::{OnOff, StateValue};
///
/// let codec = JsonCodec::new().with_level_channel("dimmer");
/// let state = codec.decode(br#"{"power": "ON", "dimmer": 40, "wifi": {"rssi": -61}}"#)?;
///
/// assert_eq!(state.get("power"), Some(&StateValue::Switch(OnOff::On)));
/// assert_eq!(state.get("dimmer"), Some(&StateValue::Level(40)));
/// assert_eq!(state.get("wifi.rssi"), Some(&StateValue::Number(-61.0)));
/// # Ok::<(), pollbind::error::DecodeError>(())
/// ```
#[derive(Debug, Clone, Default)]
pub struct JsonCodec {
    level_channels: BTreeSet<String>,
    state_pointer: Option<String>,
    acknowledged: bool,
    poll_request: Option<Vec<u8>>,
}

impl JsonCodec {
    /// Creates a codec with default settings.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Decodes the given channel as a 0-100 level.
    #[must_use]
    pub fn with_level_channel(mut self, channel: impl Into<String>) -> Self {
        self.level_channels.insert(channel.into());
        self
    }

    /// Reads state from a nested object, addressed by a JSON pointer such as
    /// `/StatusSTS`.
    #[must_use]
    pub fn with_state_pointer(mut self, pointer: impl Into<String>) -> Self {
        self.state_pointer = Some(pointer.into());
        self
    }

    /// Expects every command to be answered with `{"ack": "<id>", ..}`.
    #[must_use]
    pub fn with_acknowledgements(mut self) -> Self {
        self.acknowledged = true;
        self
    }

    /// Writes the given request before each poll read.
    #[must_use]
    pub fn with_poll_request(mut self, request: impl Into<Vec<u8>>) -> Self {
        self.poll_request = Some(request.into());
        self
    }

    fn state_root<'a>(&self, value: &'a Value) -> Result<&'a Map<String, Value>, DecodeError> {
        let root = match &self.state_pointer {
            Some(pointer) => value
                .pointer(pointer)
                .ok_or_else(|| DecodeError::MissingField(pointer.clone()))?,
            None => value,
        };

        root.as_object().ok_or_else(|| DecodeError::MalformedPacket {
            reason: "expected a JSON object".to_string(),
        })
    }

    fn collect(
        &self,
        map: &Map<String, Value>,
        prefix: &str,
        builder: &mut StateBuilder,
    ) -> Result<(), DecodeError> {
        for (key, value) in map {
            if prefix.is_empty() && key == ACK_KEY {
                continue;
            }

            let channel = if prefix.is_empty() {
                key.clone()
            } else {
                format!("{prefix}.{key}")
            };

            let decoded = match value {
                Value::Object(nested) => {
                    self.collect(nested, &channel, builder)?;
                    continue;
                }
                Value::Null | Value::Array(_) => continue,
                Value::Bool(b) => StateValue::Switch(OnOff::from(*b)),
                Value::Number(n) => self.number_value(&channel, n)?,
                Value::String(s) => self.string_value(&channel, s)?,
            };
            builder.insert(channel, decoded);
        }
        Ok(())
    }

    fn number_value(&self, channel: &str, n: &Number) -> Result<StateValue, DecodeError> {
        if self.level_channels.contains(channel) {
            return match n.as_i64() {
                Some(raw) => level(channel, raw),
                None => Err(DecodeError::MalformedPacket {
                    reason: format!("level {channel} is not an integer"),
                }),
            };
        }

        n.as_f64()
            .map(StateValue::Number)
            .ok_or_else(|| DecodeError::MalformedPacket {
                reason: format!("number {channel} out of range"),
            })
    }

    fn string_value(&self, channel: &str, s: &str) -> Result<StateValue, DecodeError> {
        if self.level_channels.contains(channel) {
            let raw = s.trim().parse::<i64>().map_err(|_| DecodeError::MalformedPacket {
                reason: format!("level {channel} is not an integer: {s:?}"),
            })?;
            return level(channel, raw);
        }

        if s.eq_ignore_ascii_case("on") {
            Ok(StateValue::Switch(OnOff::On))
        } else if s.eq_ignore_ascii_case("off") {
            Ok(StateValue::Switch(OnOff::Off))
        } else {
            Ok(StateValue::Text(s.to_string()))
        }
    }

    fn decode_object(&self, value: &Value) -> Result<State, DecodeError> {
        let root = self.state_root(value)?;
        let mut builder = State::builder();
        self.collect(root, "", &mut builder)?;
        Ok(builder.build())
    }
}

fn level_percent(channel: &str, raw: i64) -> Result<u8, DecodeError> {
    u8::try_from(raw)
        .ok()
        .filter(|l| *l <= 100)
        .ok_or_else(|| DecodeError::UnknownFieldValue {
            field: channel.to_string(),
            value: raw,
        })
}

fn level(channel: &str, raw: i64) -> Result<StateValue, DecodeError> {
    level_percent(channel, raw).map(StateValue::Level)
}

fn member<'a>(value: &'a Value, name: &str) -> Result<&'a Value, DecodeError> {
    value
        .get(name)
        .ok_or_else(|| DecodeError::MissingField(name.to_string()))
}

fn member_str<'a>(value: &'a Value, name: &str) -> Result<&'a str, DecodeError> {
    member(value, name)?
        .as_str()
        .ok_or_else(|| DecodeError::MalformedPacket {
            reason: format!("{name} must be a string"),
        })
}

fn invalid(channel: &str, reason: impl Into<String>) -> EncodeError {
    EncodeError::InvalidValue {
        channel: channel.to_string(),
        reason: reason.into(),
    }
}

impl Codec for JsonCodec {
    fn decode(&self, bytes: &[u8]) -> Result<State, DecodeError> {
        let value: Value = serde_json::from_slice(bytes)?;
        let state = self.decode_object(&value)?;
        if state.is_empty() {
            return Err(DecodeError::MalformedPacket {
                reason: "no channel values".to_string(),
            });
        }
        Ok(state)
    }

    fn encode(&self, command: &Command) -> Result<Vec<u8>, EncodeError> {
        let id = command.correlation_id().to_string();
        let kind = command.kind().name();

        let body = match command.kind() {
            CommandKind::Switch { channel, state } => {
                json!({ "id": id, "kind": kind, "channel": channel, "value": state.as_str() })
            }
            CommandKind::SetLevel {
                channel,
                level,
                ramp,
            } => {
                if *level > 100 {
                    return Err(invalid(channel, format!("level {level} exceeds 100")));
                }
                let mut body =
                    json!({ "id": id, "kind": kind, "channel": channel, "value": level });
                if let Some(ramp) = ramp {
                    body["ramp_ms"] = json!(u64::try_from(ramp.as_millis()).unwrap_or(u64::MAX));
                }
                body
            }
            CommandKind::SetNumber { channel, value } => {
                if !value.is_finite() {
                    return Err(invalid(channel, format!("{value} is not a finite number")));
                }
                json!({ "id": id, "kind": kind, "channel": channel, "value": value })
            }
            CommandKind::SetText { channel, value } => {
                json!({ "id": id, "kind": kind, "channel": channel, "value": value })
            }
            CommandKind::Refresh => json!({ "id": id, "kind": kind }),
        };

        serde_json::to_vec(&body).map_err(|e| EncodeError::Unsupported {
            kind: format!("{kind} ({e})"),
        })
    }

    fn poll_request(&self) -> Option<Vec<u8>> {
        self.poll_request.clone()
    }

    fn reply_expected(&self, command: &Command) -> bool {
        self.acknowledged && !command.is_refresh()
    }

    fn decode_reply(&self, command: &Command, bytes: &[u8]) -> Result<Option<State>, DecodeError> {
        let value: Value = serde_json::from_slice(bytes)?;
        let expected = command.correlation_id().to_string();

        match value.get(ACK_KEY).and_then(Value::as_str) {
            Some(ack) if ack == expected => {}
            Some(ack) => {
                return Err(DecodeError::UnexpectedReply(format!(
                    "ack {ack} does not match command {expected}"
                )));
            }
            None => {
                return Err(DecodeError::UnexpectedReply(format!(
                    "reply to {expected} carries no ack"
                )));
            }
        }

        let state = match self.decode_object(&value) {
            Ok(state) => state,
            Err(DecodeError::MissingField(_)) => return Ok(None),
            Err(e) => return Err(e),
        };
        Ok((!state.is_empty()).then_some(state))
    }
}

impl SymmetricCodec for JsonCodec {
    fn decode_command(&self, bytes: &[u8]) -> Result<Command, DecodeError> {
        let value: Value = serde_json::from_slice(bytes)?;

        let id = Uuid::parse_str(member_str(&value, "id")?).map_err(|e| {
            DecodeError::MalformedPacket {
                reason: format!("invalid command id: {e}"),
            }
        })?;
        let kind = member_str(&value, "kind")?;

        let kind = match kind {
            "refresh" => CommandKind::Refresh,
            "switch" => CommandKind::Switch {
                channel: member_str(&value, "channel")?.to_string(),
                state: member_str(&value, "value")?
                    .parse()
                    .map_err(|v| DecodeError::MalformedPacket {
                        reason: format!("invalid switch value {v:?}"),
                    })?,
            },
            "set_level" => {
                let channel = member_str(&value, "channel")?.to_string();
                let raw = member(&value, "value")?.as_i64().ok_or_else(|| {
                    DecodeError::MalformedPacket {
                        reason: "level must be an integer".to_string(),
                    }
                })?;
                let level = level_percent(&channel, raw)?;
                let ramp = value
                    .get("ramp_ms")
                    .and_then(Value::as_u64)
                    .map(Duration::from_millis);
                CommandKind::SetLevel {
                    channel,
                    level,
                    ramp,
                }
            }
            "set_number" => CommandKind::SetNumber {
                channel: member_str(&value, "channel")?.to_string(),
                value: member(&value, "value")?.as_f64().ok_or_else(|| DecodeError::MalformedPacket {
                    reason: "value must be a number".to_string(),
                })?,
            },
            "set_text" => CommandKind::SetText {
                channel: member_str(&value, "channel")?.to_string(),
                value: member_str(&value, "value")?.to_string(),
            },
            other => {
                return Err(DecodeError::Unsupported(format!("command kind {other}")));
            }
        };

        Ok(Command::with_correlation_id(kind, CorrelationId::from_uuid(id)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_flattens_nested_objects() {
        let codec = JsonCodec::new();
        let state = codec
            .decode(br#"{"POWER": "OFF", "Wifi": {"RSSI": 78, "SSId": "home"}, "list": [1, 2], "gone": null}"#)
            .unwrap();

        assert_eq!(state.len(), 3);
        assert_eq!(state.get("POWER"), Some(&StateValue::Switch(OnOff::Off)));
        assert_eq!(state.get("Wifi.RSSI"), Some(&StateValue::Number(78.0)));
        assert_eq!(
            state.get("Wifi.SSId"),
            Some(&StateValue::Text("home".to_string()))
        );
    }

    #[test]
    fn decode_with_state_pointer() {
        let codec = JsonCodec::new().with_state_pointer("/StatusSTS");
        let state = codec
            .decode(br#"{"StatusSTS": {"POWER": "ON", "online": true}}"#)
            .unwrap();
        assert_eq!(state.get("POWER"), Some(&StateValue::Switch(OnOff::On)));
        assert_eq!(state.get("online"), Some(&StateValue::Switch(OnOff::On)));

        let err = codec.decode(br#"{"Status": {}}"#).unwrap_err();
        assert!(matches!(err, DecodeError::MissingField(ref p) if p == "/StatusSTS"));
    }

    #[test]
    fn level_channel_out_of_range() {
        let codec = JsonCodec::new().with_level_channel("dimmer");
        assert_eq!(
            codec.decode(br#"{"dimmer": "75"}"#).unwrap().get("dimmer"),
            Some(&StateValue::Level(75))
        );

        let err = codec.decode(br#"{"dimmer": 140}"#).unwrap_err();
        assert!(matches!(
            err,
            DecodeError::UnknownFieldValue { ref field, value: 140 } if field == "dimmer"
        ));
    }

    #[test]
    fn decode_rejects_non_objects_and_empty() {
        let codec = JsonCodec::new();
        assert!(matches!(
            codec.decode(b"[1,2,3]"),
            Err(DecodeError::MalformedPacket { .. })
        ));
        assert!(matches!(
            codec.decode(b"{}"),
            Err(DecodeError::MalformedPacket { .. })
        ));
        assert!(matches!(codec.decode(b"{not json"), Err(DecodeError::Json(_))));
    }

    #[test]
    fn encode_switch_command() {
        let command = Command::switch("relay1", OnOff::On);
        let bytes = JsonCodec::new().encode(&command).unwrap();
        let value: Value = serde_json::from_slice(&bytes).unwrap();

        assert_eq!(value["id"], command.correlation_id().to_string());
        assert_eq!(value["kind"], "switch");
        assert_eq!(value["channel"], "relay1");
        assert_eq!(value["value"], "ON");
    }

    #[test]
    fn encode_rejects_invalid_values() {
        let codec = JsonCodec::new();
        assert!(matches!(
            codec.encode(&Command::set_level("dimmer", 101, None)),
            Err(EncodeError::InvalidValue { .. })
        ));
        assert!(matches!(
            codec.encode(&Command::set_number("setpoint", f64::NAN)),
            Err(EncodeError::InvalidValue { .. })
        ));
    }

    #[test]
    fn commands_round_trip() {
        let codec = JsonCodec::new();
        let commands = [
            Command::switch("relay1", OnOff::Off),
            Command::set_level("dimmer", 55, Some(Duration::from_millis(1500))),
            Command::set_number("setpoint", 21.5),
            Command::set_text("mode", "eco"),
            Command::refresh(),
        ];

        for command in commands {
            let decoded = codec
                .decode_command(&codec.encode(&command).unwrap())
                .unwrap();
            assert_eq!(decoded, command);
        }
    }

    #[test]
    fn reply_must_match_correlation_id() {
        let codec = JsonCodec::new().with_acknowledgements();
        let command = Command::switch("relay1", OnOff::On);
        assert!(codec.reply_expected(&command));
        assert!(!codec.reply_expected(&Command::refresh()));

        let matching = format!(r#"{{"ack": "{}", "relay1": "ON"}}"#, command.correlation_id());
        let state = codec
            .decode_reply(&command, matching.as_bytes())
            .unwrap()
            .unwrap();
        assert_eq!(state.len(), 1);
        assert_eq!(state.get("relay1"), Some(&StateValue::Switch(OnOff::On)));

        let bare = format!(r#"{{"ack": "{}"}}"#, command.correlation_id());
        assert!(codec.decode_reply(&command, bare.as_bytes()).unwrap().is_none());

        let other = format!(r#"{{"ack": "{}"}}"#, CorrelationId::new());
        assert!(matches!(
            codec.decode_reply(&command, other.as_bytes()),
            Err(DecodeError::UnexpectedReply(_))
        ));
        assert!(matches!(
            codec.decode_reply(&command, br#"{"relay1": "ON"}"#),
            Err(DecodeError::UnexpectedReply(_))
        ));
    }
}
