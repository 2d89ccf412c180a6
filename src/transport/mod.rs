// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Byte-level transports to physical devices.
//!
//! A [`Transport`] owns one connection to one device. It knows nothing about
//! payload formats; turning bytes into state is the job of a
//! [`Codec`](crate::codec::Codec).
//!
//! # Contract
//!
//! - [`open`](Transport::open) establishes the connection and is idempotent
//!   while the transport is open.
//! - [`read`](Transport::read) always takes a timeout and fails with
//!   [`TransportError::Timeout`] instead of hanging.
//! - [`close`](Transport::close) releases the connection. The session calls
//!   it on every exit path; implementations also release OS resources on
//!   drop, so an aborted session never leaks a socket.
//!
//! # Implementations
//!
//! | Transport | Connection | Feature |
//! |-----------|------------|---------|
//! | [`TcpTransport`] | Raw TCP stream | always |
//! | [`HttpTransport`] | HTTP request/response | `http` |
//! | [`MqttTransport`] | MQTT publish/subscribe | `mqtt` |

#[cfg(feature = "http")]
mod http;
#[cfg(feature = "mqtt")]
mod mqtt;
mod tcp;

use std::time::Duration;

use async_trait::async_trait;

use crate::config::{ConnectionConfig, DeviceConfig};
use crate::error::{ConnectError, TransportError};

#[cfg(feature = "http")]
pub use http::HttpTransport;
#[cfg(feature = "mqtt")]
pub use mqtt::MqttTransport;
pub use crate::config::Framing;
pub use tcp::TcpTransport;

/// A connection to one physical device.
///
/// Transports are driven by exactly one device session at a time, so
/// methods take `&mut self` and implementations need no internal locking.
#[async_trait]
pub trait Transport: Send {
    /// Opens the connection.
    ///
    /// # Errors
    ///
    /// Returns [`ConnectError`] if the device cannot be reached.
    async fn open(&mut self) -> Result<(), ConnectError>;

    /// Reads one response from the device, waiting at most `timeout`.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::Timeout`] when nothing arrives in time and
    /// [`TransportError::Closed`] if the transport is not open.
    async fn read(&mut self, timeout: Duration) -> Result<Vec<u8>, TransportError>;

    /// Writes one request to the device.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError`] if the write fails.
    async fn write(&mut self, bytes: &[u8]) -> Result<(), TransportError>;

    /// Drops a response the last write left buffered, if any.
    ///
    /// Request/response transports keep the reply to a write for the next
    /// read. The session calls this when no reply is expected, so the next
    /// poll reads fresh state.
    fn discard_reply(&mut self) {}

    /// Closes the connection. Closing a closed transport is a no-op.
    async fn close(&mut self);

    /// Returns `true` while the connection is open.
    fn is_open(&self) -> bool;
}

/// Builds a fresh transport for a device session.
pub trait TransportFactory: Send + Sync {
    /// Creates an unopened transport for the given configuration.
    ///
    /// # Errors
    ///
    /// Returns [`ConnectError`] if the configuration cannot be served.
    fn create(&self, config: &DeviceConfig) -> Result<Box<dyn Transport>, ConnectError>;
}

/// Default factory: picks the transport matching the
/// [`ConnectionConfig`] variant.
#[derive(Debug, Clone, Copy, Default)]
pub struct ConfiguredTransports;

impl TransportFactory for ConfiguredTransports {
    fn create(&self, config: &DeviceConfig) -> Result<Box<dyn Transport>, ConnectError> {
        match &config.connection {
            ConnectionConfig::Tcp {
                host,
                port,
                framing,
            } => Ok(Box::new(
                TcpTransport::new(format!("{host}:{port}"), config.timeout).with_framing(*framing),
            )),
            #[cfg(feature = "http")]
            ConnectionConfig::Http { .. } => {
                Ok(Box::new(HttpTransport::from_config(config)?))
            }
            #[cfg(feature = "mqtt")]
            ConnectionConfig::Mqtt { .. } => {
                Ok(Box::new(MqttTransport::from_config(config)?))
            }
            #[allow(unreachable_patterns)]
            other => Err(ConnectError::Unsupported(format!(
                "{} (transport feature disabled)",
                other.address()
            ))),
        }
    }
}
