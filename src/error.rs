// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Error types for the `pollbind` library.
//!
//! Every operation returns a single tagged error. Transport and codec errors
//! are local to one poll or command attempt; [`SessionError`] is what callers
//! of a device session and of [`DeviceManager`](crate::manager::DeviceManager)
//! see.

use std::time::Duration;

use thiserror::Error;

use crate::identity::DeviceIdentity;

/// The main error type for this library.
#[derive(Debug, Error)]
pub enum Error {
    /// A device identity could not be parsed.
    #[error("identity error: {0}")]
    Identity(#[from] IdentityError),

    /// A device could not be registered.
    #[error("register error: {0}")]
    Register(#[from] RegisterError),

    /// A poll or command failed.
    #[error("session error: {0}")]
    Session(#[from] SessionError),

    /// Configuration could not be loaded.
    #[error("config error: {0}")]
    Config(#[from] ConfigError),
}

/// Errors raised while establishing a transport connection.
///
/// These are transient: the scheduler retries them with backoff.
#[derive(Debug, Error)]
pub enum ConnectError {
    /// The device could not be reached.
    #[error("connection to {address} failed: {source}")]
    Unreachable {
        /// The address that was dialed.
        address: String,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The connection attempt did not complete in time.
    #[error("connection to {address} timed out after {timeout:?}")]
    Timeout {
        /// The address that was dialed.
        address: String,
        /// The connect timeout that elapsed.
        timeout: Duration,
    },

    /// The configured address is not usable.
    #[error("invalid address: {0}")]
    InvalidAddress(String),

    /// The transport does not match the connection configuration.
    #[error("unsupported connection: {0}")]
    Unsupported(String),

    /// The underlying client could not be created.
    #[error("client setup failed: {0}")]
    Setup(String),
}

/// Errors raised by an open transport during a read or write.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Low-level I/O failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A read did not complete within its timeout.
    #[error("read timed out after {0:?}")]
    Timeout(Duration),

    /// The transport is not open or the peer closed it.
    #[error("transport closed")]
    Closed,

    /// The device answered with a non-success status.
    #[error("device returned status {code}: {reason}")]
    Status {
        /// Numeric status code.
        code: u16,
        /// Human-readable reason.
        reason: String,
    },

    /// The device rejected the supplied credentials.
    #[error("authentication failed")]
    AuthenticationFailed,

    /// A delimited response grew past the frame limit without a delimiter.
    #[error("response exceeded {limit} bytes without a delimiter")]
    FrameTooLong {
        /// Frame limit in bytes.
        limit: usize,
    },

    /// HTTP request failed.
    #[cfg(feature = "http")]
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// MQTT client failure.
    #[cfg(feature = "mqtt")]
    #[error("MQTT error: {0}")]
    Mqtt(#[from] rumqttc::ClientError),
}

/// Errors raised while decoding device bytes into a typed value.
///
/// Decode errors are never retried at the transport level. The device
/// session stays connected when the link itself is healthy.
#[derive(Debug, Error)]
pub enum DecodeError {
    /// Frame structure or integrity check failed.
    #[error("malformed packet: {reason}")]
    MalformedPacket {
        /// What was wrong with the packet.
        reason: String,
    },

    /// The device reported a value outside the known set.
    #[error("unknown value {value} for field {field}")]
    UnknownFieldValue {
        /// The field being decoded.
        field: String,
        /// The raw value the device sent.
        value: i64,
    },

    /// A required field is missing.
    #[error("missing field: {0}")]
    MissingField(String),

    /// JSON payload could not be parsed.
    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),

    /// Payload is not valid UTF-8.
    #[error("payload is not valid UTF-8")]
    InvalidUtf8,

    /// A command reply did not match the command that was sent.
    #[error("unexpected reply: {0}")]
    UnexpectedReply(String),

    /// The codec cannot decode this kind of payload.
    #[error("decoding not supported: {0}")]
    Unsupported(String),
}

/// Errors raised while encoding a command into device bytes.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum EncodeError {
    /// The codec has no encoding for this command kind.
    #[error("command {kind} is not supported by this codec")]
    Unsupported {
        /// The command kind name.
        kind: String,
    },

    /// A command value cannot be represented on the wire.
    #[error("invalid value for {channel}: {reason}")]
    InvalidValue {
        /// The target channel.
        channel: String,
        /// Why the value was rejected.
        reason: String,
    },
}

/// Errors returned by device session operations.
#[derive(Debug, Error)]
pub enum SessionError {
    /// The session is not connected. Wait for the next reconnection.
    #[error("device is not connected")]
    Disconnected,

    /// Connecting the transport failed.
    #[error("connect failed: {0}")]
    Connect(#[from] ConnectError),

    /// Reading or writing the transport failed.
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// The device payload could not be decoded.
    #[error("decode error: {0}")]
    Decode(#[from] DecodeError),

    /// The command could not be encoded.
    #[error("encode error: {0}")]
    Encode(#[from] EncodeError),

    /// The device command queue is full.
    #[error("command queue is full")]
    Backpressure,

    /// No device with this identity is registered.
    #[error("unknown device: {0}")]
    UnknownDevice(DeviceIdentity),

    /// The device was unregistered or the manager shut down before the
    /// command was applied.
    #[error("device session was stopped")]
    Cancelled,
}

impl SessionError {
    /// Returns `true` if this error counts against the session's failure
    /// budget (the link itself is unhealthy).
    #[must_use]
    pub fn is_link_failure(&self) -> bool {
        matches!(self, Self::Connect(_) | Self::Transport(_))
    }
}

/// Errors returned by device registration.
#[derive(Debug, Error)]
pub enum RegisterError {
    /// A device with this identity is already registered.
    #[error("device {0} is already registered")]
    AlreadyRegistered(DeviceIdentity),

    /// The device configuration is not usable.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// The transport factory could not build a transport.
    #[error("transport setup failed: {0}")]
    Transport(#[from] ConnectError),

    /// The manager is shutting down.
    #[error("manager is shutting down")]
    ShuttingDown,
}

/// Errors raised when building a [`DeviceIdentity`].
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum IdentityError {
    /// The identity string is empty.
    #[error("device identity is empty")]
    Empty,

    /// The MAC address is not six hex octets.
    #[error("invalid MAC address: {mac}")]
    InvalidMac {
        /// The rejected value.
        mac: String,
    },
}

/// Errors raised while loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The configuration file could not be read.
    #[error("cannot read configuration: {0}")]
    Io(#[from] std::io::Error),

    /// The configuration is not valid JSON for the expected schema.
    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),

    /// A device entry failed validation.
    #[error("device {device}: {reason}")]
    Invalid {
        /// The offending device identity as written in the file.
        device: String,
        /// What was wrong.
        reason: String,
    },

    /// A device identity in the file is invalid.
    #[error("identity error: {0}")]
    Identity(#[from] IdentityError),
}

/// A specialized Result type for this library.
pub type Result<T> = std::result::Result<T, Error>;
