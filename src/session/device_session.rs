// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Live connection to one device.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::codec::Codec;
use crate::config::DeviceConfig;
use crate::error::SessionError;
use crate::identity::DeviceIdentity;
use crate::transport::Transport;
use crate::types::{Command, State};

use super::{ConnectionState, SessionStats};

/// Callback invoked on every connection state transition, with the old and
/// the new state.
pub type TransitionObserver = Box<dyn FnMut(&ConnectionState, &ConnectionState) + Send>;

/// Owns one device's transport and codec and tracks its connection health.
///
/// Operations take `&mut self`, so a session runs at most one poll or
/// command at a time. The device manager gives each session its own worker
/// task; a session can also be driven directly.
///
/// # Failure handling
///
/// - Connect and transport errors close the transport and count against the
///   failure budget (`failure_threshold` consecutive failures). Below the
///   budget the session drops to `Disconnected`; at the budget it is
///   `Failed`. Either way the next [`connect`](Self::connect) retries.
/// - Decode errors leave the session `Connected`: the link is fine, the
///   payload was not.
/// - A successful poll or command resets the budget.
///
/// # Examples
///
/// ```no_run
/// use std::sync::Arc;
/// use pollbind::codec::TextCodec;
/// use pollbind::config::DeviceConfig;
/// use pollbind::session::DeviceSession;
/// use pollbind::transport::{ConfiguredTransports, TransportFactory};
/// use pollbind::DeviceIdentity;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let config = DeviceConfig::tcp("192.168.1.60", 4999);
/// let transport = ConfiguredTransports.create(&config)?;
/// let mut session = DeviceSession::new(
///     DeviceIdentity::new("amp")?,
///     transport,
///     Arc::new(TextCodec::new().with_poll_request(b"?\r".to_vec())),
///     &config,
/// );
///
/// session.connect().await?;
/// let state = session.poll().await?;
/// println!("{} channels", state.len());
/// session.disconnect().await;
/// # Ok(())
/// # }
/// ```
pub struct DeviceSession {
    id: DeviceIdentity,
    transport: Box<dyn Transport>,
    codec: Arc<dyn Codec>,
    timeout: Duration,
    failure_threshold: u32,
    state: ConnectionState,
    stats: SessionStats,
    observer: Option<TransitionObserver>,
}

impl DeviceSession {
    /// Creates a disconnected session.
    #[must_use]
    pub fn new(
        id: DeviceIdentity,
        transport: Box<dyn Transport>,
        codec: Arc<dyn Codec>,
        config: &DeviceConfig,
    ) -> Self {
        Self {
            id,
            transport,
            codec,
            timeout: config.timeout,
            failure_threshold: config.failure_threshold.max(1),
            state: ConnectionState::Disconnected,
            stats: SessionStats::default(),
            observer: None,
        }
    }

    /// Sets the callback that receives every state transition.
    #[must_use]
    pub fn with_observer(
        mut self,
        observer: impl FnMut(&ConnectionState, &ConnectionState) + Send + 'static,
    ) -> Self {
        self.observer = Some(Box::new(observer));
        self
    }

    /// Returns the device identity.
    #[must_use]
    pub fn id(&self) -> &DeviceIdentity {
        &self.id
    }

    /// Returns the current connection state.
    #[must_use]
    pub fn state(&self) -> &ConnectionState {
        &self.state
    }

    /// Returns true if the session is connected.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.state.is_connected()
    }

    /// Returns the session counters.
    #[must_use]
    pub fn stats(&self) -> &SessionStats {
        &self.stats
    }

    /// Opens the transport.
    ///
    /// Does nothing when already connected.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::Connect`] if the device cannot be reached.
    /// The session is then `Disconnected` or `Failed`.
    pub async fn connect(&mut self) -> Result<(), SessionError> {
        if self.state.is_connected() && self.transport.is_open() {
            return Ok(());
        }

        self.transition(ConnectionState::Connecting);
        tracing::debug!(device = %self.id, "Connecting");

        match self.transport.open().await {
            Ok(()) => {
                self.stats.record_connect();
                self.transition(ConnectionState::Connected);
                Ok(())
            }
            Err(e) => Err(self.link_failure(e.into()).await),
        }
    }

    /// Reads one state snapshot from the device.
    ///
    /// Writes the codec's poll request first, if it has one.
    ///
    /// # Errors
    ///
    /// - [`SessionError::Disconnected`] if the session is not connected
    /// - [`SessionError::Transport`] if the read or write failed
    /// - [`SessionError::Decode`] if the response was not understood; the
    ///   session stays connected
    pub async fn poll(&mut self) -> Result<State, SessionError> {
        self.ensure_connected()?;

        let bytes = match self.exchange(self.codec.poll_request()).await {
            Ok(bytes) => bytes,
            Err(e) => {
                self.stats.record_poll_failure(&e);
                return Err(e);
            }
        };

        match self.codec.decode(&bytes) {
            Ok(state) => {
                self.stats.record_poll_success();
                tracing::debug!(device = %self.id, channels = state.len(), "Polled state");
                Ok(state)
            }
            Err(e) => {
                tracing::warn!(device = %self.id, error = %e, "Discarding undecodable response");
                let e = SessionError::Decode(e);
                self.stats.record_poll_failure(&e);
                Err(e)
            }
        }
    }

    /// Sends a command to the device.
    ///
    /// A [`Refresh`](crate::types::CommandKind::Refresh) command polls. For
    /// other commands, the returned state is whatever the device reported in
    /// its reply, if the codec expects one.
    ///
    /// # Errors
    ///
    /// - [`SessionError::Disconnected`] if the session is not connected
    /// - [`SessionError::Encode`] if the codec cannot represent the command
    /// - [`SessionError::Transport`] if the write or reply read failed
    /// - [`SessionError::Decode`] if the reply did not match the command
    pub async fn send_command(&mut self, command: &Command) -> Result<Option<State>, SessionError> {
        if command.is_refresh() {
            return self.poll().await.map(Some);
        }

        self.ensure_connected()?;

        let result = self.apply(command).await;
        match &result {
            Ok(_) => self.stats.record_command_success(),
            Err(e) => self.stats.record_command_failure(e),
        }
        result
    }

    /// Closes the transport.
    pub async fn disconnect(&mut self) {
        self.transport.close().await;
        if self.state != ConnectionState::Disconnected {
            tracing::debug!(device = %self.id, "Disconnected");
            self.transition(ConnectionState::Disconnected);
        }
    }

    async fn apply(&mut self, command: &Command) -> Result<Option<State>, SessionError> {
        let bytes = self.codec.encode(command)?;

        tracing::debug!(
            device = %self.id,
            command = command.kind().name(),
            correlation_id = %command.correlation_id(),
            "Sending command"
        );

        if !self.codec.reply_expected(command) {
            if let Err(e) = self.transport.write(&bytes).await {
                return Err(self.link_failure(e.into()).await);
            }
            self.transport.discard_reply();
            return Ok(None);
        }

        let reply = self.exchange(Some(bytes)).await?;
        Ok(self.codec.decode_reply(command, &reply)?)
    }

    /// Writes an optional request and reads one response.
    async fn exchange(&mut self, request: Option<Vec<u8>>) -> Result<Vec<u8>, SessionError> {
        if let Some(request) = request
            && let Err(e) = self.transport.write(&request).await
        {
            return Err(self.link_failure(e.into()).await);
        }

        match self.transport.read(self.timeout).await {
            Ok(bytes) => Ok(bytes),
            Err(e) => Err(self.link_failure(e.into()).await),
        }
    }

    fn ensure_connected(&self) -> Result<(), SessionError> {
        if self.state.is_connected() {
            Ok(())
        } else {
            Err(SessionError::Disconnected)
        }
    }

    /// Closes the transport and charges the failure budget.
    async fn link_failure(&mut self, error: SessionError) -> SessionError {
        self.transport.close().await;

        let failures = self.stats.record_link_failure(&error);
        let next = if failures >= self.failure_threshold {
            tracing::warn!(
                device = %self.id,
                failures,
                error = %error,
                "Device failed"
            );
            ConnectionState::Failed(error.to_string())
        } else {
            tracing::debug!(
                device = %self.id,
                failures,
                error = %error,
                "Link failure"
            );
            ConnectionState::Disconnected
        };

        self.transition(next);
        error
    }

    fn transition(&mut self, to: ConnectionState) {
        if self.state == to {
            return;
        }
        let from = std::mem::replace(&mut self.state, to);
        if let Some(observer) = self.observer.as_mut() {
            observer(&from, &self.state);
        }
    }
}

impl fmt::Debug for DeviceSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceSession")
            .field("id", &self.id)
            .field("state", &self.state)
            .field("timeout", &self.timeout)
            .field("failure_threshold", &self.failure_threshold)
            .finish_non_exhaustive()
    }
}
